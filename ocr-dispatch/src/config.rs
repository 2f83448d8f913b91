use serde::{Deserialize, Serialize};

/// Configuration for a [`Scheduler`](crate::Scheduler).
///
/// Deserializable from any serde source; missing fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Label attached to events and tracing spans, useful when a process
    /// runs several pools (e.g. one per recognition engine).
    pub name: String,
    /// Number of lifecycle events buffered for slow subscribers before they
    /// start lagging. Clamped to at least 1.
    pub event_capacity: usize,
}

impl SchedulerConfig {
    /// Create a configuration with the given scheduler name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the event buffer capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "ocr-dispatch".to_string(),
            event_capacity: 1024,
        }
    }
}
