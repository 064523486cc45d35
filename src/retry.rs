//! Retry policy for busy and rejected timeline work.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with an optional attempt bound.
///
/// `delay_for(n)` is the wait before retry `n + 1`:
/// `initial_delay_ms * multiplier^n`, capped at `max_delay_ms`.
/// `max_attempts: None` retries forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 8000,
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Constant delay, unbounded.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            multiplier: 1.0,
            max_delay_ms: ms,
            max_attempts: None,
        }
    }

    /// Same policy with at most `attempts` retries.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn allows(&self, retries_done: u32) -> bool {
        self.max_attempts.map_or(true, |max| retries_done < max)
    }

    /// Delay before the retry following `retries_done` earlier retries.
    pub fn delay_for(&self, retries_done: u32) -> Duration {
        let exponent = retries_done.min(32) as i32;
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Check internal consistency; returns a reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be positive".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(20), Duration::from_millis(8000));
    }

    #[test]
    fn test_bound() {
        let policy = RetryPolicy::default().with_max_attempts(2);
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn test_fixed_is_unbounded() {
        let policy = RetryPolicy::fixed(Duration::from_millis(500));
        assert!(policy.allows(1_000_000));
        assert_eq!(policy.delay_for(7), Duration::from_millis(500));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shrinking() {
        let policy = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            max_delay_ms: 10,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
