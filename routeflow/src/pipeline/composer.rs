//! The pipeline composer.

use crate::aggregator::Aggregator;
use crate::cancellation::CancellationToken;
use crate::core::{keys, Exchange};
use crate::events::{self, EventSink};
use crate::observability::SpanTimer;
use crate::processor::{Completion, Processor};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One entry of a pipeline.
#[derive(Debug, Clone)]
pub struct Step {
    id: String,
    processor: Arc<dyn Processor>,
    enabled: bool,
}

impl Step {
    /// Creates an enabled step.
    #[must_use]
    pub fn new(id: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        Self {
            id: id.into(),
            processor,
            enabled: true,
        }
    }

    /// Marks the step as disabled. It keeps its position but is skipped.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns the step id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the processor the step runs.
    #[must_use]
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    /// Returns true if the step runs.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Runs steps in order over one exchange.
///
/// Disabled steps are skipped. Traversal stops at the first step that
/// leaves a failure on the exchange, unless the pipeline is failure-aware
/// (dead-letter pipelines are built that way).
pub struct Pipeline {
    name: String,
    steps: Vec<Step>,
    failure_aware: bool,
    shutdown: Arc<CancellationToken>,
    aggregators: Vec<Arc<Aggregator>>,
    events: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_ids())
            .field("failure_aware", &self.failure_aware)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline over prepared steps.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            failure_aware: false,
            shutdown: Arc::new(CancellationToken::new()),
            aggregators: Vec::new(),
            events: None,
        }
    }

    pub(crate) fn assemble(
        name: String,
        steps: Vec<Step>,
        failure_aware: bool,
        shutdown: Arc<CancellationToken>,
        aggregators: Vec<Arc<Aggregator>>,
        events: Option<Arc<dyn EventSink>>,
    ) -> Self {
        Self {
            name,
            steps,
            failure_aware,
            shutdown,
            aggregators,
            events,
        }
    }

    /// Keeps running steps after a failure.
    #[must_use]
    pub fn failure_aware(mut self) -> Self {
        self.failure_aware = true;
        self
    }

    /// Emits step events to `sink` instead of the global sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of steps, disabled ones included.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Number of steps that run.
    #[must_use]
    pub fn enabled_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.enabled).count()
    }

    /// Returns the steps in order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the step ids in order.
    #[must_use]
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Returns the token error handlers in this pipeline observe.
    #[must_use]
    pub fn shutdown_token(&self) -> &Arc<CancellationToken> {
        &self.shutdown
    }

    /// Returns the aggregators placed in this pipeline, nested ones included.
    #[must_use]
    pub fn aggregators(&self) -> &[Arc<Aggregator>] {
        &self.aggregators
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        let sink = self.events.clone().unwrap_or_else(events::get_event_sink);
        sink.try_emit(event_type, Some(data));
    }

    fn stops_on(&self, exchange: &Exchange) -> bool {
        !self.failure_aware && exchange.is_failed()
    }

    fn run_from<'a>(&'a self, start: usize, mut exchange: Exchange) -> Completion<'a> {
        for (index, step) in self.steps.iter().enumerate().skip(start) {
            if !step.enabled {
                debug!(pipeline = %self.name, step = %step.id, "Skipping disabled step");
                continue;
            }
            if self.stops_on(&exchange) {
                break;
            }

            exchange.set_property(keys::STEP_ID, step.id.as_str());
            self.emit(
                events::STEP_STARTED,
                json!({"pipeline": self.name, "step": step.id, "exchange_id": exchange.id().to_string()}),
            );
            let timer = SpanTimer::start(&step.id);

            match step.processor.process(exchange) {
                Completion::Sync(done) => exchange = self.after_step(step, done, timer),
                Completion::Async(future) => {
                    return Completion::pending(async move {
                        let done = self.after_step(step, future.await, timer);
                        self.run_from(index + 1, done).await
                    });
                }
            }
        }
        Completion::Sync(exchange)
    }

    fn after_step(&self, step: &Step, mut exchange: Exchange, timer: SpanTimer) -> Exchange {
        let duration_ms = timer.finish();

        let Some(failure) = exchange.clear_failure() else {
            self.emit(
                events::STEP_COMPLETED,
                json!({
                    "pipeline": self.name,
                    "step": step.id,
                    "exchange_id": exchange.id().to_string(),
                    "duration_ms": duration_ms,
                }),
            );
            return exchange;
        };

        let failure = if failure.processor.is_none() {
            failure.with_processor(step.processor.name())
        } else {
            failure
        };
        if exchange.property(keys::FAILURE_ENDPOINT).is_none() {
            if let Some(processor) = &failure.processor {
                exchange.set_property(keys::FAILURE_ENDPOINT, processor.as_str());
            }
        }

        debug!(
            pipeline = %self.name,
            step = %step.id,
            exchange_id = %exchange.id(),
            failure = %failure,
            handled = failure.handled,
            "Step failed"
        );
        self.emit(
            events::STEP_FAILED,
            json!({
                "pipeline": self.name,
                "step": step.id,
                "exchange_id": exchange.id().to_string(),
                "duration_ms": duration_ms,
                "kind": failure.kind,
                "handled": failure.handled,
            }),
        );

        exchange.set_failure(failure);
        exchange
    }
}

impl Processor for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(&'a self, exchange: Exchange) -> Completion<'a> {
        self.run_from(0, exchange)
    }
}
