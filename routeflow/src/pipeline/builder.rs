//! Pipeline builder with error handler regions.

use super::{Pipeline, Step};
use crate::aggregator::Aggregator;
use crate::cancellation::CancellationToken;
use crate::errorhandler::{ErrorHandlerBuilder, RedeliveryMetrics};
use crate::errors::RouteValidationError;
use crate::events::EventSink;
use crate::processor::Processor;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
enum StepTarget {
    Processor(Arc<dyn Processor>),
    Aggregator(Arc<Aggregator>),
    Pipeline(PipelineBuilder),
}

impl StepTarget {
    fn name(&self) -> &str {
        match self {
            Self::Processor(p) => p.name(),
            Self::Aggregator(a) => a.name(),
            Self::Pipeline(b) => &b.name,
        }
    }
}

#[derive(Clone)]
struct StepDefinition {
    id: Option<String>,
    target: StepTarget,
    enabled: bool,
    inherit_error_handler: bool,
}

/// Builder for creating validated pipelines.
///
/// Step modifiers (`id`, `disabled`, `inherit_error_handler`) apply to the
/// most recently added step. Error handlers apply per region: a step uses
/// the handler of its own pipeline, or the nearest enclosing one when its
/// pipeline declares none. A step that opts out of inheritance runs with no
/// handler at all unless its own sub-pipeline declares one.
#[derive(Clone)]
pub struct PipelineBuilder {
    name: String,
    steps: Vec<StepDefinition>,
    error_handler: Option<ErrorHandlerBuilder>,
    failure_aware: bool,
    events: Option<Arc<dyn EventSink>>,
    problems: Vec<String>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.target.name()).collect::<Vec<_>>())
            .field("error_handler", &self.error_handler)
            .field("failure_aware", &self.failure_aware)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            error_handler: None,
            failure_aware: false,
            events: None,
            problems: Vec::new(),
        }
    }

    fn push(mut self, target: StepTarget) -> Self {
        self.steps.push(StepDefinition {
            id: None,
            target,
            enabled: true,
            inherit_error_handler: true,
        });
        self
    }

    fn modify_last(mut self, modifier: &str, apply: impl FnOnce(&mut StepDefinition)) -> Self {
        match self.steps.last_mut() {
            Some(step) => apply(step),
            None => self
                .problems
                .push(format!("'{modifier}' used in pipeline '{}' before any step", self.name)),
        }
        self
    }

    /// Appends a processor step.
    #[must_use]
    pub fn to(self, processor: Arc<dyn Processor>) -> Self {
        self.push(StepTarget::Processor(processor))
    }

    /// Appends an aggregator step. Its timeout sweeper follows the route
    /// lifecycle.
    #[must_use]
    pub fn aggregate(self, aggregator: Arc<Aggregator>) -> Self {
        self.push(StepTarget::Aggregator(aggregator))
    }

    /// Appends a nested sub-pipeline as one step.
    #[must_use]
    pub fn pipeline(self, sub: Self) -> Self {
        self.push(StepTarget::Pipeline(sub))
    }

    /// Sets the id of the last step.
    #[must_use]
    pub fn id(self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.modify_last("id", move |step| step.id = Some(id))
    }

    /// Disables the last step.
    #[must_use]
    pub fn disabled(self) -> Self {
        self.disabled_if(true)
    }

    /// Disables the last step when `disabled` is true.
    #[must_use]
    pub fn disabled_if(self, disabled: bool) -> Self {
        self.modify_last("disabled", move |step| step.enabled = !disabled)
    }

    /// Controls whether the last step inherits the enclosing error handler.
    #[must_use]
    pub fn inherit_error_handler(self, inherit: bool) -> Self {
        self.modify_last("inherit_error_handler", move |step| step.inherit_error_handler = inherit)
    }

    /// Sets the error handler for this pipeline's region.
    #[must_use]
    pub fn error_handler(mut self, handler: ErrorHandlerBuilder) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Keeps running steps after a failure, for dead-letter pipelines.
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

    /// Number of steps added so far, disabled ones included.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns the metrics of this pipeline's own error handler.
    #[must_use]
    pub fn redelivery_metrics(&self) -> Option<Arc<RedeliveryMetrics>> {
        self.error_handler.as_ref().map(ErrorHandlerBuilder::metrics)
    }

    /// Builds the pipeline with a fresh shutdown token.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline or a nested pipeline is empty, step
    /// ids collide, a modifier was used before any step, or an error handler
    /// or aggregator is misconfigured.
    pub fn build(self) -> Result<Pipeline, RouteValidationError> {
        self.build_region(None, &Arc::new(CancellationToken::new()), None)
    }

    pub(crate) fn build_region(
        self,
        inherited: Option<&ErrorHandlerBuilder>,
        shutdown: &Arc<CancellationToken>,
        parent_events: Option<&Arc<dyn EventSink>>,
    ) -> Result<Pipeline, RouteValidationError> {
        if let Some(problem) = self.problems.first() {
            return Err(RouteValidationError::new(problem.clone())
                .with_context_entry("pipeline", self.name.clone()));
        }
        if self.steps.is_empty() {
            return Err(RouteValidationError::new(format!("Pipeline '{}' has no steps", self.name))
                .with_context_entry("pipeline", self.name.clone()));
        }

        if let Some(handler) = &self.error_handler {
            handler
                .policy()
                .validate()
                .map_err(|e| e.with_context_entry("pipeline", self.name.clone()))?;
        }
        let region_handler = self.error_handler.as_ref().or(inherited);
        let events = self.events.as_ref().or(parent_events).cloned();

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(self.steps.len());
        let mut aggregators = Vec::new();

        for (index, definition) in self.steps.into_iter().enumerate() {
            let id = definition
                .id
                .clone()
                .unwrap_or_else(|| format!("{}-{}", self.name, index + 1));
            if !seen.insert(id.clone()) {
                return Err(RouteValidationError::new(format!(
                    "Duplicate step id '{id}' in pipeline '{}'",
                    self.name
                ))
                .with_context_entry("step", id));
            }

            let handler = if definition.inherit_error_handler {
                region_handler
            } else {
                None
            };
            let wrap = |processor: Arc<dyn Processor>| -> Arc<dyn Processor> {
                match handler {
                    Some(builder) => Arc::new(builder.wrap(processor, Arc::clone(shutdown))),
                    None => processor,
                }
            };

            let processor: Arc<dyn Processor> = match definition.target {
                StepTarget::Processor(processor) => wrap(processor),
                StepTarget::Aggregator(aggregator) => {
                    aggregator
                        .validate()
                        .map_err(|e| e.with_context_entry("step", id.clone()))?;
                    aggregators.push(Arc::clone(&aggregator));
                    wrap(aggregator as Arc<dyn Processor>)
                }
                StepTarget::Pipeline(sub) => {
                    let nested = sub.build_region(handler, shutdown, events.as_ref())?;
                    aggregators.extend(nested.aggregators().iter().cloned());
                    Arc::new(nested)
                }
            };

            let step = Step::new(id, processor);
            steps.push(if definition.enabled { step } else { step.disabled() });
        }

        Ok(Pipeline::assemble(
            self.name,
            steps,
            self.failure_aware,
            Arc::clone(shutdown),
            aggregators,
            events,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Exchange;
    use crate::errorhandler::RedeliveryPolicy;
    use crate::errors::FailureKind;
    use crate::testing::{FailingProcessor, MockProcessor};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn mock(name: &str) -> Arc<MockProcessor> {
        Arc::new(MockProcessor::new(name))
    }

    fn dead_letter(dead: Arc<MockProcessor>, maximum: i32) -> ErrorHandlerBuilder {
        ErrorHandlerBuilder::dead_letter_channel(dead).with_policy(
            RedeliveryPolicy::new()
                .with_maximum_redeliveries(maximum)
                .with_initial_delay(Duration::from_millis(1)),
        )
    }

    #[test]
    fn test_empty_build_fails() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert!(err.message.contains("no steps"));
    }

    #[test]
    fn test_modifier_before_step_fails() {
        let err = PipelineBuilder::new("p").disabled().to(mock("a")).build().unwrap_err();
        assert!(err.message.contains("before any step"));
    }

    #[test]
    fn test_duplicate_ids_fail() {
        let err = PipelineBuilder::new("p")
            .to(mock("a"))
            .id("same")
            .to(mock("b"))
            .id("same")
            .build()
            .unwrap_err();
        assert!(err.message.contains("Duplicate step id"));
    }

    #[test]
    fn test_negative_redelivery_count_is_rejected() {
        let err = PipelineBuilder::new("p")
            .error_handler(dead_letter(mock("dead"), -5))
            .to(mock("a"))
            .build()
            .unwrap_err();
        assert!(err.message.contains("maximum_redeliveries"));

        let nested = PipelineBuilder::new("outer")
            .to(mock("a"))
            .pipeline(PipelineBuilder::new("inner").error_handler(dead_letter(mock("dead"), -2)).to(mock("b")))
            .build();
        assert!(nested.is_err());

        assert!(PipelineBuilder::new("p")
            .error_handler(dead_letter(mock("dead"), -1))
            .to(mock("a"))
            .build()
            .is_ok());
    }

    #[test]
    fn test_generated_and_explicit_ids() {
        let pipeline = PipelineBuilder::new("route")
            .to(mock("a"))
            .to(mock("b"))
            .id("enrich")
            .build()
            .unwrap();
        assert_eq!(pipeline.step_ids(), vec!["route-1", "enrich"]);
    }

    #[tokio::test]
    async fn test_disabled_steps() {
        let (s1, s2, s3, s4) = (mock("s1"), mock("s2"), mock("s3"), mock("s4"));
        let pipeline = PipelineBuilder::new("route")
            .to(s1.clone())
            .disabled()
            .to(s2.clone())
            .to(s3.clone())
            .disabled_if(true)
            .to(s4.clone())
            .disabled_if(false)
            .build()
            .unwrap();

        assert_eq!(pipeline.step_count(), 4);
        pipeline.process(Exchange::with_body("Hello World")).await;

        assert_eq!(s1.received_count(), 0);
        assert_eq!(s2.received_count(), 1);
        assert_eq!(s3.received_count(), 0);
        assert_eq!(s4.received_count(), 1);
    }

    #[tokio::test]
    async fn test_inherit_error_handler_false_isolates_step() {
        let dead = mock("dead");
        let a = mock("a");
        let opted_out = Arc::new(FailingProcessor::new("opted-out", FailureKind::Business));
        let builder = PipelineBuilder::new("route")
            .error_handler(dead_letter(dead.clone(), 2))
            .to(a.clone())
            .pipeline(PipelineBuilder::new("inner").to(opted_out.clone()))
            .inherit_error_handler(false);
        let metrics = builder.redelivery_metrics().unwrap();
        let pipeline = builder.build().unwrap();

        let exchange = pipeline.process(Exchange::with_body("Hello World")).await;

        assert_eq!(a.received_count(), 1);
        assert_eq!(opted_out.calls(), 1);
        assert_eq!(dead.received_count(), 0);
        assert!(exchange.is_failed());
        assert!(!exchange.is_failure_handled());
        assert_eq!(metrics.total_redeliveries(), 0);
    }

    #[tokio::test]
    async fn test_inheriting_step_gets_handler() {
        let dead = mock("dead");
        let failing = Arc::new(FailingProcessor::new("failing", FailureKind::Business));
        let pipeline = PipelineBuilder::new("route")
            .error_handler(dead_letter(dead.clone(), 2))
            .pipeline(PipelineBuilder::new("inner").to(failing.clone()))
            .build()
            .unwrap();

        let exchange = pipeline.process(Exchange::with_body("Hello World")).await;

        assert_eq!(failing.calls(), 3);
        assert_eq!(dead.received_count(), 1);
        assert!(exchange.is_failure_handled());
    }

    #[tokio::test]
    async fn test_sub_pipeline_own_handler_overrides() {
        let outer_dead = mock("outer-dead");
        let inner_dead = mock("inner-dead");
        let failing = Arc::new(FailingProcessor::new("failing", FailureKind::Business));
        let pipeline = PipelineBuilder::new("route")
            .error_handler(dead_letter(outer_dead.clone(), 3))
            .pipeline(
                PipelineBuilder::new("inner")
                    .error_handler(dead_letter(inner_dead.clone(), 1))
                    .to(failing.clone()),
            )
            .inherit_error_handler(false)
            .build()
            .unwrap();

        pipeline.process(Exchange::with_body("x")).await;

        assert_eq!(failing.calls(), 2);
        assert_eq!(inner_dead.received_count(), 1);
        assert_eq!(outer_dead.received_count(), 0);
    }

    #[tokio::test]
    async fn test_redelivery_reinvokes_only_failed_step() {
        let before = mock("before");
        let failing = Arc::new(FailingProcessor::new("failing", FailureKind::Business).fail_first(2));
        let after = mock("after");
        let pipeline = PipelineBuilder::new("route")
            .error_handler(dead_letter(mock("dead"), 5))
            .to(before.clone())
            .to(failing.clone())
            .to(after.clone())
            .build()
            .unwrap();

        let exchange = pipeline.process(Exchange::with_body("x")).await;

        assert!(!exchange.is_failed());
        assert_eq!(before.received_count(), 1);
        assert_eq!(failing.calls(), 3);
        assert_eq!(after.received_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_aware_dead_letter_pipeline() {
        let audit = mock("audit");
        let store = mock("store");
        let dead_pipeline = PipelineBuilder::new("dead")
            .failure_aware()
            .to(audit.clone())
            .to(store.clone())
            .build()
            .unwrap();
        let failing = Arc::new(FailingProcessor::new("failing", FailureKind::Business));
        let pipeline = PipelineBuilder::new("route")
            .error_handler(ErrorHandlerBuilder::dead_letter_channel(Arc::new(dead_pipeline)))
            .to(failing)
            .build()
            .unwrap();

        let exchange = pipeline.process(Exchange::with_body("x")).await;

        assert_eq!(audit.received_count(), 1);
        assert_eq!(store.received_count(), 1);
        assert!(exchange.is_failure_handled());
    }
}
