//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;

pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Settings fixed at construction, except `max_concurrency`, which can be
/// changed later through [`PinQueue::set_max_concurrency`](super::PinQueue::set_max_concurrency).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Ceiling on simultaneously running handler invocations.
    pub max_concurrency: usize,

    /// Per-attempt handler deadline. `None` means no deadline.
    pub handler_timeout_ms: Option<u64>,

    /// How long `close()` waits for in-flight handlers before aborting them.
    pub shutdown_timeout_ms: u64,

    /// Move `Pinning` records left by a crash back to `Queued` on start.
    pub requeue_interrupted: bool,

    /// Cancel the running handler when its request is removed.
    pub cancel_on_remove: bool,

    /// Backoff for retried status writes.
    pub write_retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            handler_timeout_ms: None,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            requeue_interrupted: true,
            cancel_on_remove: false,
            write_retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_cancel_on_remove(mut self, enabled: bool) -> Self {
        self.cancel_on_remove = enabled;
        self
    }

    pub fn with_requeue_interrupted(mut self, enabled: bool) -> Self {
        self.requeue_interrupted = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: QueueConfig =
            serde_json::from_str(r#"{"max_concurrency": 5, "handler_timeout_ms": 250}"#).unwrap();
        assert_eq!(cfg.max_concurrency, 5);
        assert_eq!(cfg.handler_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS));
        assert!(cfg.requeue_interrupted);
        assert!(!cfg.cancel_on_remove);
        assert_eq!(cfg.write_retry, RetryPolicy::default());
    }
}
