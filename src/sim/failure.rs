//! Failure injection for the simulated aircraft
//!
//! Supports configurable failures for exercising retry and error paths.

use std::collections::HashMap;
use std::time::Duration;

/// Simulated operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOperation {
    /// `is_timeline_busy` reports busy regardless of the timeline.
    TimelineBusy,
    /// `schedule` rejects the mission.
    Schedule,
    TakeOff,
    Land,
    /// `is_ready` reports not ready.
    Ready,
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Reason reported with the failure
    pub reason: String,
    /// Extra latency before the operation completes
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Fail with `reason`
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            delay: None,
            fail_count: None,
        }
    }

    /// Only add latency
    pub fn delay(duration: Duration) -> Self {
        Self {
            reason: String::new(),
            delay: Some(duration),
            fail_count: Some(0),
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Per-operation failure table
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<SimOperation, FailureConfig>,
    call_counts: HashMap<SimOperation, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, op: SimOperation, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    /// Make `op` fail `times` times, then succeed.
    pub fn fail_times(&mut self, op: SimOperation, times: u32, reason: impl Into<String>) {
        self.inject(op, FailureConfig::error(reason).with_fail_count(times));
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// Record a call to `op`; returns the failure reason if this call fails.
    pub fn check(&mut self, op: SimOperation) -> Option<String> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if config.fail_count.is_some_and(|limit| *count > limit) {
            return None;
        }
        Some(config.reason.clone())
    }

    /// Extra latency configured for `op`.
    pub fn delay_for(&self, op: SimOperation) -> Option<Duration> {
        self.configs.get(&op).and_then(|c| c.delay)
    }

    /// Calls to `op` seen since it was injected.
    pub fn calls(&self, op: SimOperation) -> u32 {
        self.call_counts.get(&op).copied().unwrap_or(0)
    }
}
