//! QueueConfig - キュー実行パラメータ

use std::time::Duration;

use crate::queue::RetryPolicy;

/// Settings shared by the worker and watchdog loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Worker tick cadence.
    pub poll_interval: Duration,

    /// Pickups allowed per job before it is failed.
    pub max_attempts: u32,

    /// How long a job may stay `in_progress` before the watchdog reclaims it.
    pub stuck_threshold: Duration,

    /// Watchdog tick cadence.
    pub watchdog_interval: Duration,
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2_000),
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            stuck_threshold: Duration::from_millis(600_000),
            watchdog_interval: Duration::from_millis(300_000),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
