//! Retry policy for store writes made by the dispatcher.
//!
//! Handler failures are never retried; only the persistence of a status
//! transition is.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay_ms: u64,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after `attempts` failed attempts (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With base_delay=50ms, multiplier=2.0:
    /// - attempt 1: 50ms
    /// - attempt 2: 100ms
    /// - attempt 3: 200ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = Duration::from_millis(self.base_delay_ms).as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_ms, 50);
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert_eq!(d1, Duration::from_millis(50));
        assert_eq!(d2, Duration::from_millis(100));
        assert_eq!(d3, Duration::from_millis(200));
    }

    #[test]
    fn zero_attempts_uses_base_delay() {
        assert_eq!(RetryPolicy::default().next_delay(0), Duration::from_millis(50));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        assert_eq!(RetryPolicy::default().next_delay(10_000), Duration::MAX);
    }
}
