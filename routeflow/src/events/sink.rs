//! Event sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

/// Receives engine events.
///
/// Engine code calls [`EventSink::try_emit`] from inside processors, so it
/// must not block or fail. [`EventSink::emit`] is for callers that are
/// already async.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, delegating to [`EventSink::try_emit`] by default.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.try_emit(event_type, data);
    }

    /// Emits an event without blocking. Errors are swallowed.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Discards all events. Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Writes events to `tracing`.
///
/// Dead-letter, exhaustion and step failure events are always logged at warn
/// level; everything else at the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging routine events at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn is_alarming(event_type: &str) -> bool {
        matches!(
            event_type,
            super::EXCHANGE_DEAD_LETTER | super::EXCHANGE_EXHAUSTED | super::STEP_FAILED
        )
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let data = data.unwrap_or(serde_json::Value::Null);
        if Self::is_alarming(event_type) {
            warn!(event_type, %data, "Engine event");
        } else if self.level >= Level::DEBUG {
            debug!(event_type, %data, "Engine event");
        } else {
            info!(event_type, %data, "Engine event");
        }
    }
}

/// An event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// Event type, one of the constants in [`crate::events`].
    pub event_type: String,
    /// Event payload.
    pub data: Option<serde_json::Value>,
    /// When the event was received.
    pub at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Returns a field of the payload.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<RecordedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the most recent event of an exact type.
    #[must_use]
    pub fn last_of_type(&self, event_type: &str) -> Option<RecordedEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
            .cloned()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        crate::testing::init_test_logging();
        NoOpEventSink.emit(events::EXCHANGE_REDELIVERY, None).await;

        let sink = LoggingEventSink::debug();
        sink.emit(events::EXCHANGE_REDELIVERY, Some(json!({"attempt": 1}))).await;
        sink.try_emit(events::EXCHANGE_DEAD_LETTER, None);
        assert!(LoggingEventSink::is_alarming(events::STEP_FAILED));
        assert!(!LoggingEventSink::is_alarming(events::STEP_COMPLETED));
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(events::STEP_STARTED, None).await;
        sink.try_emit(events::STEP_COMPLETED, Some(json!({"step": "s1"})));
        sink.try_emit(events::STEP_COMPLETED, Some(json!({"step": "s2"})));
        sink.try_emit(events::AGGREGATION_COMPLETED, None);

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.events_of_type("step.").len(), 3);

        let last = sink.last_of_type(events::STEP_COMPLETED).unwrap();
        assert_eq!(last.field("step"), Some(&json!("s2")));
        assert!(last.at >= sink.events()[0].at);

        sink.clear();
        assert!(sink.is_empty());
        assert!(sink.last_of_type(events::STEP_COMPLETED).is_none());
    }
}
