//! Event notifications for monitoring collaborators.
//!
//! The engine emits lifecycle events (step completed, redelivery scheduled,
//! dead-lettered, aggregation completed) to an [`EventSink`]. The engine does
//! not depend on any reporting transport; sinks decide where events go.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

use parking_lot::RwLock;
use std::sync::Arc;

/// A pipeline step started processing an exchange.
pub const STEP_STARTED: &str = "step.started";
/// A pipeline step finished without a captured failure.
pub const STEP_COMPLETED: &str = "step.completed";
/// A pipeline step left a failure on the exchange.
pub const STEP_FAILED: &str = "step.failed";
/// A redelivery was scheduled.
pub const EXCHANGE_REDELIVERY: &str = "exchange.redelivery";
/// An exchange was delivered to a dead-letter destination.
pub const EXCHANGE_DEAD_LETTER: &str = "exchange.dead_letter";
/// Redelivery gave up and no dead-letter destination was configured.
pub const EXCHANGE_EXHAUSTED: &str = "exchange.exhausted";
/// An aggregation group completed and was emitted.
pub const AGGREGATION_COMPLETED: &str = "aggregation.completed";

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the process-wide default event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the process-wide default event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the process-wide default event sink.
///
/// Returns a `NoOpEventSink` if no sink is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_sink_default_and_override() {
        let sink = Arc::new(CollectingEventSink::new());
        set_event_sink(sink.clone());
        get_event_sink().try_emit("test.global_sink", None);
        clear_event_sink();

        // Events after clearing go to the no-op sink.
        get_event_sink().try_emit("test.global_sink", None);
        assert_eq!(sink.events_of_type("test.global_sink").len(), 1);
    }
}
