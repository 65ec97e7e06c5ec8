//! Event sinks for stage lifecycle events.

use parking_lot::RwLock;
use tracing::debug;

/// Receives stage lifecycle events from a runner.
///
/// Emitting happens inline on the stage path, so it must be cheap and must
/// never fail.
pub trait EventSink: Send + Sync {
    /// Records one event with its JSON payload.
    fn emit(&self, event_type: &str, data: serde_json::Value);
}

/// Writes every event to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event_type: &str, data: serde_json::Value) {
        debug!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
    }
}

/// Keeps every event in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, serde_json::Value)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, serde_json::Value)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the stage names carried by events of exactly `event_type`.
    #[must_use]
    pub fn stages_for(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| data.get("stage").and_then(|s| s.as_str()).map(String::from))
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.events.write().push((event_type.to_string(), data));
    }
}
