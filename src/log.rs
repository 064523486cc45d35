//! Operator-facing event log.
//!
//! Components receive an `EventLog` at construction and report what they do
//! through it. The log never influences control flow.

use std::sync::Mutex;

/// Sink for operator-facing messages.
pub trait EventLog: Send + Sync {
    fn add(&self, message: &str);
}

/// Forwards every message to `tracing` at info level, tagged with the drone.
#[derive(Debug, Clone)]
pub struct TracingLog {
    drone_id: String,
}

impl TracingLog {
    pub fn new(drone_id: impl Into<String>) -> Self {
        Self {
            drone_id: drone_id.into(),
        }
    }
}

impl EventLog for TracingLog {
    fn add(&self, message: &str) {
        tracing::info!(drone = %self.drone_id, "{}", message);
    }
}

/// Keeps messages in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Whether any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Number of messages containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .map(|l| l.iter().filter(|line| line.contains(needle)).count())
            .unwrap_or(0)
    }
}

impl EventLog for MemoryLog {
    fn add(&self, message: &str) {
        tracing::debug!("{}", message);
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_records() {
        let log = MemoryLog::new();
        log.add("Starting Task");
        log.add("Starting timeline");
        assert_eq!(log.lines().len(), 2);
        assert_eq!(log.count("Starting"), 2);
        assert!(log.contains("timeline"));
        assert!(!log.contains("Landing"));
    }
}
