//! The error handler processor and its per-region builder.

use super::{RedeliveryDecision, RedeliveryMetrics, RedeliveryPolicy, RedeliveryState};
use crate::cancellation::CancellationToken;
use crate::core::{keys, Exchange};
use crate::errors::ExchangeFailure;
use crate::events::{self, EventSink};
use crate::processor::{Completion, Processor};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Describes the error handler of a pipeline region.
///
/// The builder is cheap to clone. Every step wrapped from the same builder
/// shares its policy, dead-letter destination and metrics.
#[derive(Clone)]
pub struct ErrorHandlerBuilder {
    policy: RedeliveryPolicy,
    dead_letter: Option<Arc<dyn Processor>>,
    metrics: Arc<RedeliveryMetrics>,
    events: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for ErrorHandlerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlerBuilder")
            .field("policy", &self.policy)
            .field("dead_letter", &self.dead_letter.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}

impl Default for ErrorHandlerBuilder {
    fn default() -> Self {
        Self::default_error_handler()
    }
}

impl ErrorHandlerBuilder {
    /// An error handler that redelivers and then returns the failure to the
    /// caller.
    #[must_use]
    pub fn default_error_handler() -> Self {
        Self {
            policy: RedeliveryPolicy::new(),
            dead_letter: None,
            metrics: Arc::new(RedeliveryMetrics::new()),
            events: None,
        }
    }

    /// An error handler that redelivers and then hands the exchange to
    /// `destination`.
    #[must_use]
    pub fn dead_letter_channel(destination: Arc<dyn Processor>) -> Self {
        Self {
            dead_letter: Some(destination),
            ..Self::default_error_handler()
        }
    }

    /// Replaces the redelivery policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shortcut for adjusting the maximum redeliveries of the policy.
    #[must_use]
    pub fn with_maximum_redeliveries(mut self, maximum: i32) -> Self {
        self.policy = self.policy.with_maximum_redeliveries(maximum);
        self
    }

    /// Shortcut for adjusting the initial delay of the policy.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: std::time::Duration) -> Self {
        self.policy = self.policy.with_initial_delay(delay);
        self
    }

    /// Emits events to `sink` instead of the global sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Returns the redelivery policy.
    #[must_use]
    pub fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    /// Returns the metrics shared by every wrapped step.
    #[must_use]
    pub fn metrics(&self) -> Arc<RedeliveryMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Wraps one step.
    #[must_use]
    pub fn wrap(&self, inner: Arc<dyn Processor>, shutdown: Arc<CancellationToken>) -> ErrorHandler {
        ErrorHandler {
            name: format!("errorHandler({})", inner.name()),
            inner,
            policy: self.policy.clone(),
            dead_letter: self.dead_letter.clone(),
            shutdown,
            metrics: Arc::clone(&self.metrics),
            events: self.events.clone(),
        }
    }
}

/// Applies redelivery and dead-letter handling around one processor.
pub struct ErrorHandler {
    name: String,
    inner: Arc<dyn Processor>,
    policy: RedeliveryPolicy,
    dead_letter: Option<Arc<dyn Processor>>,
    shutdown: Arc<CancellationToken>,
    metrics: Arc<RedeliveryMetrics>,
    events: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("inner", &self.inner.name())
            .field("policy", &self.policy)
            .field("dead_letter", &self.dead_letter.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    /// Wraps `inner` with `policy` and no dead-letter destination.
    #[must_use]
    pub fn new(inner: Arc<dyn Processor>, policy: RedeliveryPolicy) -> Self {
        ErrorHandlerBuilder::default_error_handler()
            .with_policy(policy)
            .wrap(inner, Arc::new(CancellationToken::new()))
    }

    /// Sets the dead-letter destination.
    #[must_use]
    pub fn with_dead_letter(mut self, destination: Arc<dyn Processor>) -> Self {
        self.dead_letter = Some(destination);
        self
    }

    /// Interrupts redelivery waits when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: Arc<CancellationToken>) -> Self {
        self.shutdown = token;
        self
    }

    /// Returns the wrapped processor.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Processor> {
        &self.inner
    }

    /// Returns the redelivery metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<RedeliveryMetrics> {
        &self.metrics
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        let sink = self.events.clone().unwrap_or_else(events::get_event_sink);
        sink.try_emit(event_type, Some(data));
    }

    fn tag_failure(&self, exchange: &mut Exchange) -> Option<ExchangeFailure> {
        let failure = exchange.clear_failure()?;
        let failure = if failure.processor.is_none() {
            failure.with_processor(self.inner.name())
        } else {
            failure
        };
        if let Some(processor) = failure.processor.clone() {
            exchange.set_property(keys::FAILURE_ENDPOINT, processor);
        }
        exchange.set_failure(failure.clone());
        Some(failure)
    }

    async fn recover(&self, mut exchange: Exchange) -> Exchange {
        let id = exchange.id();
        let Some(first) = self.tag_failure(&mut exchange) else {
            return exchange;
        };
        let mut state = RedeliveryState::new(first);
        let in_flight = self.metrics.in_flight_guard(id);

        loop {
            let Some(failure) = self.tag_failure(&mut exchange) else {
                return exchange;
            };

            let delay = match state.decide(&self.policy, &failure) {
                RedeliveryDecision::Redeliver(delay) => delay,
                decision => {
                    drop(in_flight);
                    return self.give_up(exchange, &state, &decision).await;
                }
            };

            in_flight.track(state.attempt);
            info!(
                exchange_id = %id,
                processor = %self.inner.name(),
                attempt = state.attempt,
                maximum = self.policy.maximum_redeliveries(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                failure = %failure,
                "Scheduling redelivery"
            );
            self.emit(
                events::EXCHANGE_REDELIVERY,
                json!({
                    "exchange_id": id.to_string(),
                    "processor": self.inner.name(),
                    "attempt": state.attempt,
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                }),
            );

            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                self.metrics.record_cancelled();
                warn!(
                    exchange_id = %id,
                    processor = %self.inner.name(),
                    attempt = state.attempt,
                    "Redelivery cancelled by shutdown"
                );
                let reason = self.shutdown.reason().unwrap_or_else(|| "shutdown".to_string());
                exchange.set_failure(
                    ExchangeFailure::cancelled(format!(
                        "redelivery cancelled ({reason}); last failure: {}",
                        failure.message
                    ))
                    .with_processor(self.inner.name()),
                );
                return exchange;
            }

            exchange.clear_failure();
            exchange.set_header(keys::REDELIVERED, true);
            exchange.set_header(keys::REDELIVERY_COUNTER, state.attempt);
            if !self.policy.is_unbounded() {
                exchange.set_header(keys::REDELIVERY_MAX_COUNTER, self.policy.maximum_redeliveries());
            }
            self.metrics.record_redelivery();

            exchange = self.inner.process(exchange).await;

            if !exchange.is_failed() {
                self.metrics.record_recovered();
                debug!(
                    exchange_id = %id,
                    processor = %self.inner.name(),
                    attempt = state.attempt,
                    "Redelivery succeeded"
                );
                return exchange;
            }
        }
    }

    async fn give_up(&self, mut exchange: Exchange, state: &RedeliveryState, decision: &RedeliveryDecision) -> Exchange {
        let reason = match decision {
            RedeliveryDecision::NotRetryable => "not_retryable",
            _ => "exhausted",
        };

        let Some(destination) = &self.dead_letter else {
            self.metrics.record_exhausted();
            warn!(
                exchange_id = %exchange.id(),
                processor = %self.inner.name(),
                redeliveries = state.attempt,
                reason,
                "Giving up; returning failure to caller"
            );
            self.emit(
                events::EXCHANGE_EXHAUSTED,
                json!({
                    "exchange_id": exchange.id().to_string(),
                    "processor": self.inner.name(),
                    "redeliveries": state.attempt,
                    "reason": reason,
                }),
            );
            return exchange;
        };

        let delivered = exchange.failure().cloned();
        self.metrics.record_dead_lettered();
        warn!(
            exchange_id = %exchange.id(),
            processor = %self.inner.name(),
            dead_letter = %destination.name(),
            redeliveries = state.attempt,
            reason,
            "Delivering exchange to dead letter"
        );
        self.emit(
            events::EXCHANGE_DEAD_LETTER,
            json!({
                "exchange_id": exchange.id().to_string(),
                "processor": self.inner.name(),
                "dead_letter": destination.name(),
                "redeliveries": state.attempt,
                "reason": reason,
            }),
        );

        exchange = destination.process(exchange).await;

        let Some(current) = exchange.failure() else {
            return exchange;
        };
        if delivered.as_ref().is_some_and(|original| original.same_failure(current)) {
            exchange.mark_failure_handled();
        } else {
            error!(
                exchange_id = %exchange.id(),
                dead_letter = %destination.name(),
                failure = %current,
                "Dead letter destination failed"
            );
        }
        exchange
    }
}

impl Processor for ErrorHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        self.metrics.record_attempt();

        match self.inner.process(exchange) {
            Completion::Sync(exchange) if !exchange.is_failed() => Completion::Sync(exchange),
            Completion::Sync(exchange) => Completion::pending(self.recover(exchange)),
            Completion::Async(future) => Completion::pending(async move {
                let exchange = future.await;
                if exchange.is_failed() {
                    self.recover(exchange).await
                } else {
                    exchange
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::events::CollectingEventSink;
    use crate::processor::FnProcessor;
    use crate::testing::{AsyncDelayProcessor, FailingProcessor, MockProcessor};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn quick(maximum: i32) -> RedeliveryPolicy {
        RedeliveryPolicy::new()
            .with_maximum_redeliveries(maximum)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_always_failing_step_gets_n_plus_one_attempts_and_one_dead_letter() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Infrastructure));
        let dead = Arc::new(MockProcessor::new("dead"));
        let handler = ErrorHandlerBuilder::dead_letter_channel(dead.clone())
            .with_policy(quick(3))
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("Hello")).await;

        assert_eq!(step.calls(), 4);
        assert_eq!(dead.received_count(), 1);
        assert!(exchange.is_failed());
        assert!(exchange.is_failure_handled());
        assert_eq!(exchange.failure().unwrap().processor.as_deref(), Some("flaky"));
        assert_eq!(exchange.property(keys::FAILURE_ENDPOINT), Some(&json!("flaky")));

        let delivered = &dead.received_exchanges()[0];
        assert_eq!(delivered.failure().unwrap().kind, FailureKind::Infrastructure);
        assert_eq!(delivered.header(keys::REDELIVERY_COUNTER), Some(&json!(3)));
        assert_eq!(delivered.header(keys::REDELIVERY_MAX_COUNTER), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business).fail_first(2));
        let dead = Arc::new(MockProcessor::new("dead"));
        let handler = ErrorHandlerBuilder::dead_letter_channel(dead.clone())
            .with_policy(quick(5))
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("Hello")).await;

        assert!(!exchange.is_failed());
        assert_eq!(step.calls(), 3);
        assert_eq!(dead.received_count(), 0);
        assert_eq!(exchange.header(keys::REDELIVERED), Some(&json!(true)));
        assert_eq!(exchange.header(keys::REDELIVERY_COUNTER), Some(&json!(2)));
        assert_eq!(handler.metrics().snapshot().recovered, 1);
    }

    #[tokio::test]
    async fn test_counter_starts_fresh_for_each_exchange() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business).fail_first(1));
        let handler = ErrorHandlerBuilder::default_error_handler()
            .with_policy(quick(2))
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let first = handler.process(Exchange::with_body("one")).await;
        assert_eq!(first.header(keys::REDELIVERY_COUNTER), Some(&json!(1)));

        let second = handler.process(Exchange::with_body("two")).await;
        assert!(!second.is_failed());
        assert!(second.header(keys::REDELIVERY_COUNTER).is_none());
        assert_eq!(handler.metrics().in_flight(), 0);
        assert_eq!(handler.metrics().attempt_of(second.id()), None);
    }

    #[tokio::test]
    async fn test_exhausted_without_dead_letter_returns_unhandled_failure() {
        let sink = Arc::new(CollectingEventSink::new());
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business));
        let handler = ErrorHandlerBuilder::default_error_handler()
            .with_policy(quick(1))
            .with_event_sink(sink.clone())
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("x")).await;

        assert_eq!(step.calls(), 2);
        assert!(exchange.is_failed());
        assert!(!exchange.is_failure_handled());
        assert_eq!(sink.events_of_type(events::EXCHANGE_REDELIVERY).len(), 1);
        assert_eq!(sink.events_of_type(events::EXCHANGE_EXHAUSTED).len(), 1);
        let redelivery = sink.last_of_type(events::EXCHANGE_REDELIVERY).unwrap();
        assert_eq!(redelivery.field("attempt"), Some(&json!(1)));
        assert_eq!(redelivery.field("processor"), Some(&json!("flaky")));
        assert_eq!(handler.metrics().exhausted(), 1);
    }

    #[tokio::test]
    async fn test_structural_failure_skips_redelivery() {
        let step = Arc::new(FailingProcessor::new("validator", FailureKind::Structural));
        let dead = Arc::new(MockProcessor::new("dead"));
        let handler = ErrorHandlerBuilder::dead_letter_channel(dead.clone())
            .with_policy(quick(5))
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("x")).await;

        assert_eq!(step.calls(), 1);
        assert_eq!(dead.received_count(), 1);
        assert!(exchange.is_failure_handled());
    }

    #[tokio::test]
    async fn test_dead_letter_clearing_failure_wins() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business));
        let dead: Arc<dyn Processor> = Arc::new(FnProcessor::new("recovering-dead", |ex: &mut Exchange| {
            ex.clear_failure();
            ex.set_body("compensated");
            Ok(())
        }));
        let handler = ErrorHandlerBuilder::dead_letter_channel(dead)
            .with_policy(quick(0))
            .wrap(step, Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("x")).await;
        assert!(!exchange.is_failed());
        assert_eq!(exchange.body_string().as_deref(), Some("compensated"));
    }

    #[tokio::test]
    async fn test_dead_letter_new_failure_is_not_handled() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business));
        let dead: Arc<dyn Processor> = Arc::new(FnProcessor::new("broken-dead", |_ex: &mut Exchange| {
            Err(ExchangeFailure::infrastructure("dead letter store offline"))
        }));
        let handler = ErrorHandlerBuilder::dead_letter_channel(dead)
            .with_policy(quick(0))
            .wrap(step, Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("x")).await;
        let failure = exchange.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Infrastructure);
        assert_eq!(failure.processor.as_deref(), Some("broken-dead"));
        assert!(!exchange.is_failure_handled());
    }

    #[tokio::test]
    async fn test_async_step_is_redelivered() {
        let step = Arc::new(
            AsyncDelayProcessor::new("async", Duration::from_millis(5))
                .with_reply("order accepted")
                .fail_first_attempts(2),
        );
        let handler = ErrorHandlerBuilder::default_error_handler()
            .with_policy(quick(3))
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("order 42")).await;

        assert!(!exchange.is_failed());
        assert_eq!(step.calls(), 3);
        assert_eq!(exchange.body_string().as_deref(), Some("order accepted"));
    }

    #[tokio::test]
    async fn test_attempt_is_observable_while_waiting() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business));
        let policy = RedeliveryPolicy::new()
            .unbounded()
            .with_initial_delay(Duration::from_millis(200));
        let builder = ErrorHandlerBuilder::default_error_handler().with_policy(policy);
        let token = Arc::new(CancellationToken::new());
        let handler = Arc::new(builder.wrap(step, Arc::clone(&token)));

        let exchange = Exchange::with_body("x");
        let id = exchange.id();
        let running = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.process(exchange).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(builder.metrics().attempt_of(id), Some(1));

        token.cancel("route stopped");
        let exchange = running.await.unwrap();
        assert_eq!(exchange.failure().unwrap().kind, FailureKind::Cancelled);
        assert!(exchange.failure().unwrap().message.contains("route stopped"));
        assert_eq!(builder.metrics().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_wait_leaves_nothing_in_flight() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business));
        let handler = ErrorHandlerBuilder::default_error_handler()
            .with_policy(RedeliveryPolicy::new().with_maximum_redeliveries(3).with_initial_delay(Duration::from_secs(5)))
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let waiting = handler.process(Exchange::with_body("x"));
        let outcome = tokio::time::timeout(Duration::from_millis(50), waiting).await;

        assert!(outcome.is_err());
        assert_eq!(step.calls(), 1);
        assert_eq!(handler.metrics().in_flight(), 0);
        assert!(handler.metrics().snapshot().in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_negative_maximum_does_not_redeliver() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business));
        let dead = Arc::new(MockProcessor::new("dead"));
        let builder = ErrorHandlerBuilder::dead_letter_channel(dead.clone())
            .with_maximum_redeliveries(-5)
            .with_initial_delay(Duration::from_millis(1));
        assert!(builder.policy().validate().is_err());

        let handler = builder.wrap(step.clone(), Arc::new(CancellationToken::new()));
        let exchange = handler.process(Exchange::with_body("x")).await;

        assert_eq!(step.calls(), 1);
        assert_eq!(dead.received_count(), 1);
        assert!(exchange.is_failure_handled());
    }

    #[tokio::test]
    async fn test_unbounded_redelivery_omits_max_header() {
        let step = Arc::new(FailingProcessor::new("flaky", FailureKind::Business).fail_first(3));
        let handler = ErrorHandlerBuilder::default_error_handler()
            .with_policy(quick(0).unbounded())
            .wrap(step.clone(), Arc::new(CancellationToken::new()));

        let exchange = handler.process(Exchange::with_body("x")).await;

        assert!(!exchange.is_failed());
        assert_eq!(step.calls(), 4);
        assert!(exchange.header(keys::REDELIVERY_MAX_COUNTER).is_none());
    }

    #[tokio::test]
    async fn test_success_passes_through_synchronously() {
        let step = Arc::new(MockProcessor::new("ok"));
        let handler = ErrorHandler::new(step.clone(), quick(3));

        let completion = handler.process(Exchange::with_body("x"));
        assert!(completion.is_sync());
        assert_eq!(step.received_count(), 1);
        assert_eq!(handler.metrics().total_attempts(), 1);
    }
}
