//! The aggregator processor.

use super::{
    AggregationConfig, AggregationGroup, AggregationStrategy, CompletedBy, CompletionPredicate,
    CorrelationExpression, CorrelationKey, TimeoutExpression,
};
use crate::cancellation::CancellationToken;
use crate::core::{keys, Exchange};
use crate::errors::{ExchangeFailure, RouteValidationError};
use crate::events::{self, EventSink};
use crate::observability::{AggregatorSnapshot, GroupSnapshot};
use crate::processor::{Completion, Processor};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const TRIGGERS: [CompletedBy; 5] = [
    CompletedBy::Strategy,
    CompletedBy::Predicate,
    CompletedBy::Size,
    CompletedBy::Timeout,
    CompletedBy::Force,
];

/// A group behind its lock. `None` once the group has completed; an arrival
/// that finds a closed slot retries against the index.
struct GroupSlot {
    group: Option<AggregationGroup>,
}

type SharedSlot = Arc<Mutex<GroupSlot>>;

#[derive(Debug, Default)]
struct AggregatorStats {
    merges: AtomicU64,
    completed: [AtomicU64; 5],
    discarded: AtomicU64,
}

impl AggregatorStats {
    fn record_completion(&self, trigger: CompletedBy) {
        if let Some(index) = TRIGGERS.iter().position(|t| *t == trigger) {
            self.completed[index].fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Groups correlated exchanges and emits merged exchanges downstream.
///
/// Arrivals for the same key are merged one at a time under the group's
/// lock; different keys proceed in parallel. Exchanges passing through the
/// aggregator as a pipeline step are handed back unchanged.
pub struct Aggregator {
    name: String,
    correlation: CorrelationExpression,
    strategy: Arc<dyn AggregationStrategy>,
    downstream: Arc<dyn Processor>,
    config: AggregationConfig,
    predicate: Option<CompletionPredicate>,
    timeout_expression: Option<TimeoutExpression>,
    groups: DashMap<CorrelationKey, SharedSlot>,
    stats: AggregatorStats,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    events: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("downstream", &self.downstream.name())
            .field("config", &self.config)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Creates an aggregator with default settings.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        correlation: CorrelationExpression,
        strategy: Arc<dyn AggregationStrategy>,
        downstream: Arc<dyn Processor>,
    ) -> Self {
        Self {
            name: name.into(),
            correlation,
            strategy,
            downstream,
            config: AggregationConfig::default(),
            predicate: None,
            timeout_expression: None,
            groups: DashMap::new(),
            stats: AggregatorStats::default(),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
            events: None,
        }
    }

    /// Replaces the serializable settings.
    #[must_use]
    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self
    }

    /// Completes a group once it holds `size` exchanges.
    #[must_use]
    pub fn with_completion_size(mut self, size: usize) -> Self {
        self.config.completion_size = Some(size);
        self
    }

    /// Completes a group after `timeout` of inactivity.
    #[must_use]
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.config.completion_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Computes the inactivity timeout from each arriving exchange.
    ///
    /// Falls back to the fixed timeout when the expression yields nothing.
    #[must_use]
    pub fn with_completion_timeout_expression(mut self, expression: TimeoutExpression) -> Self {
        self.timeout_expression = Some(expression);
        self
    }

    /// Completes a group when `predicate` matches the merged exchange.
    #[must_use]
    pub fn with_completion_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Exchange) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets how often the sweeper looks for timed-out groups.
    #[must_use]
    pub fn with_checker_interval(mut self, interval: Duration) -> Self {
        self.config.completion_timeout_checker_interval_ms =
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Passes exchanges without a correlation key through untouched.
    #[must_use]
    pub fn ignore_invalid_correlation_keys(mut self) -> Self {
        self.config.ignore_invalid_correlation_keys = true;
        self
    }

    /// Emits open groups when the aggregator stops.
    #[must_use]
    pub fn force_completion_on_stop(mut self) -> Self {
        self.config.force_completion_on_stop = true;
        self
    }

    /// Emits events to `sink` instead of the global sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Returns the settings.
    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), RouteValidationError> {
        self.config
            .validate()
            .map_err(|e| e.with_context_entry("aggregator", self.name.clone()))
    }

    /// Returns the number of open groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Returns true once the aggregator has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Describes every open group.
    #[must_use]
    pub fn group_snapshots(&self) -> Vec<GroupSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<GroupSnapshot> = self
            .slots()
            .into_iter()
            .filter_map(|(_, slot)| {
                let guard = slot.lock();
                guard.group.as_ref().map(|group| group.snapshot(now))
            })
            .collect();
        snapshots.sort_by(|a, b| a.correlation_key.cmp(&b.correlation_key));
        snapshots
    }

    /// Returns counters and open groups.
    #[must_use]
    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            groups: self.group_snapshots(),
            merges: self.stats.merges.load(Ordering::Relaxed),
            completed: TRIGGERS
                .iter()
                .zip(self.stats.completed.iter())
                .map(|(trigger, count)| (trigger.as_str().to_string(), count.load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
        }
    }

    /// Merges `incoming` into its group.
    ///
    /// Returns the completed exchange when this arrival completed the group.
    ///
    /// # Errors
    ///
    /// Returns a structural failure when the exchange has no correlation key
    /// and invalid keys are not ignored, or a cancelled failure once the
    /// aggregator is stopped.
    pub fn aggregate(&self, incoming: Exchange) -> Result<Option<Exchange>, ExchangeFailure> {
        if self.shutdown.is_cancelled() {
            return Err(
                ExchangeFailure::cancelled(format!("aggregator '{}' is stopped", self.name)).with_processor(&self.name),
            );
        }

        let Some(key) = (self.correlation)(&incoming) else {
            if self.config.ignore_invalid_correlation_keys {
                debug!(aggregator = %self.name, exchange_id = %incoming.id(), "Ignoring exchange without correlation key");
                return Ok(None);
            }
            return Err(ExchangeFailure::structural(format!(
                "Invalid correlation key for exchange {}",
                incoming.id()
            ))
            .with_processor(&self.name));
        };

        let timeout = self
            .timeout_expression
            .as_ref()
            .and_then(|expression| expression(&incoming))
            .or_else(|| self.config.completion_timeout());

        loop {
            let slot = Arc::clone(
                self.groups
                    .entry(key.clone())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(GroupSlot {
                            group: Some(AggregationGroup::new(key.clone(), timeout)),
                        }))
                    })
                    .value(),
            );
            let mut guard = slot.lock();

            let trigger = {
                let Some(group) = guard.group.as_mut() else {
                    continue;
                };
                let merged = self.strategy.aggregate(group.take_exchange(), incoming);
                group.record(merged, timeout);
                self.completion_trigger(group)
            };
            self.stats.merges.fetch_add(1, Ordering::Relaxed);

            let Some(trigger) = trigger else {
                return Ok(None);
            };

            let closed = guard.group.take();
            self.groups.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
            drop(guard);

            return Ok(closed.and_then(|group| self.complete(group, trigger)));
        }
    }

    fn completion_trigger(&self, group: &AggregationGroup) -> Option<CompletedBy> {
        let merged = group.exchange()?;

        if merged.property_flag(keys::AGGREGATION_COMPLETE_CURRENT_GROUP) {
            return Some(CompletedBy::Strategy);
        }
        if self.predicate.as_ref().is_some_and(|predicate| predicate(merged)) {
            return Some(CompletedBy::Predicate);
        }
        if self.config.completion_size.is_some_and(|size| group.size() >= size) {
            return Some(CompletedBy::Size);
        }
        None
    }

    fn complete(&self, mut group: AggregationGroup, trigger: CompletedBy) -> Option<Exchange> {
        let mut merged = group.take_exchange()?;
        let key = group.key();

        merged.remove_property(keys::AGGREGATION_COMPLETE_CURRENT_GROUP);
        merged.set_property(keys::AGGREGATED_SIZE, group.size());
        merged.set_property(keys::AGGREGATED_COMPLETED_BY, trigger.as_str());
        merged.set_property(keys::AGGREGATED_CORRELATION_KEY, key.as_str());
        self.stats.record_completion(trigger);

        info!(
            aggregator = %self.name,
            correlation_key = %key,
            size = group.size(),
            completed_by = %trigger,
            "Aggregation group completed"
        );
        let sink = self.events.clone().unwrap_or_else(events::get_event_sink);
        sink.try_emit(
            events::AGGREGATION_COMPLETED,
            Some(json!({
                "aggregator": self.name,
                "correlation_key": key.as_str(),
                "size": group.size(),
                "completed_by": trigger.as_str(),
            })),
        );

        Some(merged)
    }

    fn report_downstream(&self, result: &Exchange) {
        if let Some(failure) = result.failure() {
            warn!(
                aggregator = %self.name,
                downstream = %self.downstream.name(),
                exchange_id = %result.id(),
                failure = %failure,
                "Downstream failed on aggregated exchange"
            );
        }
    }

    async fn forward(&self, merged: Exchange) {
        let result = self.downstream.process(merged).await;
        self.report_downstream(&result);
    }

    fn slots(&self) -> Vec<(CorrelationKey, SharedSlot)> {
        self.groups
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn close_if(
        &self,
        key: &CorrelationKey,
        slot: &SharedSlot,
        condition: impl FnOnce(&AggregationGroup) -> bool,
    ) -> Option<AggregationGroup> {
        let mut guard = slot.lock();
        if !guard.group.as_ref().is_some_and(condition) {
            return None;
        }
        let closed = guard.group.take();
        self.groups.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
        closed
    }

    /// Completes every group idle past its timeout and forwards the results.
    ///
    /// Returns the number of groups completed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let completed: Vec<Exchange> = self
            .slots()
            .into_iter()
            .filter_map(|(key, slot)| self.close_if(&key, &slot, |group| group.is_expired(now)))
            .filter_map(|group| self.complete(group, CompletedBy::Timeout))
            .collect();

        let count = completed.len();
        for merged in completed {
            self.forward(merged).await;
        }
        count
    }

    fn uses_timeouts(&self) -> bool {
        self.config.completion_timeout_ms.is_some() || self.timeout_expression.is_some()
    }

    /// Starts the timeout sweeper. Does nothing without a timeout, when
    /// already running, or once stopped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if !self.uses_timeouts() {
            return;
        }
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let this = Arc::clone(self);
        *sweeper = Some(tokio::spawn(async move { this.run_sweeper().await }));
        debug!(
            aggregator = %self.name,
            interval_ms = self.config.completion_timeout_checker_interval_ms,
            "Timeout sweeper started"
        );
    }

    async fn run_sweeper(&self) {
        let period = self.config.checker_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let completed = self.sweep_expired().await;
                    if completed > 0 {
                        debug!(aggregator = %self.name, completed, "Timed-out groups completed");
                    }
                }
            }
        }
    }

    /// Stops the aggregator.
    ///
    /// The sweeper is cancelled and awaited. Open groups are then emitted
    /// when force completion is enabled, otherwise discarded.
    pub async fn shutdown(&self) {
        self.shutdown.cancel(format!("aggregator '{}' stopped", self.name));

        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(aggregator = %self.name, error = %e, "Timeout sweeper ended abnormally");
            }
        }

        let remaining: Vec<AggregationGroup> = self
            .slots()
            .into_iter()
            .filter_map(|(key, slot)| self.close_if(&key, &slot, |_| true))
            .collect();
        if remaining.is_empty() {
            return;
        }

        if self.config.force_completion_on_stop {
            let completed: Vec<Exchange> = remaining
                .into_iter()
                .filter_map(|group| self.complete(group, CompletedBy::Force))
                .collect();
            for merged in completed {
                self.forward(merged).await;
            }
        } else {
            let count = remaining.len();
            self.stats
                .discarded
                .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
            warn!(aggregator = %self.name, groups = count, "Discarding open aggregation groups on stop");
        }
    }
}

impl Processor for Aggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        let mut passthrough = exchange.clone();

        match self.aggregate(exchange) {
            Err(failure) => {
                passthrough.set_failure(failure);
                Completion::Sync(passthrough)
            }
            Ok(None) => Completion::Sync(passthrough),
            Ok(Some(merged)) => match self.downstream.process(merged) {
                Completion::Sync(result) => {
                    self.report_downstream(&result);
                    Completion::Sync(passthrough)
                }
                Completion::Async(future) => Completion::pending(async move {
                    let result = future.await;
                    self.report_downstream(&result);
                    passthrough
                }),
            },
        }
    }
}
