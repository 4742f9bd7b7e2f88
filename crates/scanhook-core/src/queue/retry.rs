//! Retry policy: decides whether a raised error is retried.

/// What to do with a job whose processor raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to `pending`; it will be picked up again.
    Requeue,

    /// Attempt budget spent; mark the job `failed`.
    Exhausted,
}

/// Retry policy for raised processor errors.
///
/// No backoff: the worker's fixed poll interval is the only throttle.
/// Logical `failed` outcomes never reach this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of pickups per job.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Decide based on the attempt counter after pickup.
    ///
    /// # Arguments
    /// * `attempts` - Attempts already made, including the one that just failed.
    pub fn after_error(&self, attempts: u32) -> RetryDecision {
        if attempts < self.max_attempts {
            RetryDecision::Requeue
        } else {
            RetryDecision::Exhausted
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}
