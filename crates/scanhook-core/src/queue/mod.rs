//! Queue module: job repository port, SQLite implementation, state and retry.
//!
//! The repository is the only component that touches the store. Every
//! operation is one atomic statement or one transaction; nothing is cached
//! between calls.

mod record;
mod retry;
mod schema;
mod snapshot;
mod sqlite;
mod state;

pub use record::Job;
pub use retry::{RetryDecision, RetryPolicy};
pub use schema::SqliteStore;
pub use snapshot::{InProgressSummary, PendingSummary, QueueSnapshot, StatusCounts};
pub use sqlite::SqliteQueue;
pub use state::{JobStatus, UnknownStatus};

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{JobId, NotificationId, StoreError};

/// Result of the idempotency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Enqueued { job_id: JobId },

    /// A job already exists for this notification id; nothing was written.
    Duplicate,
}

impl EnqueueResult {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, EnqueueResult::Enqueued { .. })
    }
}

/// Result of a guarded state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,

    /// The row was not in a state the transition accepts (or does not exist).
    Stale,
}

impl Transition {
    pub(crate) fn from_rows(rows_affected: u64) -> Self {
        if rows_affected == 0 {
            Transition::Stale
        } else {
            Transition::Applied
        }
    }

    pub fn is_stale(self) -> bool {
        matches!(self, Transition::Stale)
    }
}

/// Job repository port.
///
/// The worker and watchdog loops depend on this trait only.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert the idempotency record and a `pending` job in one transaction.
    async fn enqueue(
        &self,
        notification_id: &NotificationId,
        payload: &serde_json::Value,
    ) -> Result<EnqueueResult, StoreError>;

    /// Atomically claim the oldest eligible `pending` job.
    ///
    /// Eligible means `attempts < max_attempts`. The claimed job is returned
    /// as `in_progress` with `attempts` already incremented.
    async fn pick_next(&self, max_attempts: u32) -> Result<Option<Job>, StoreError>;

    /// `in_progress -> done`.
    async fn mark_done(&self, id: JobId) -> Result<Transition, StoreError>;

    /// `in_progress -> skipped`.
    async fn mark_skipped(&self, id: JobId, reason: &str) -> Result<Transition, StoreError>;

    /// `pending | in_progress -> failed`.
    async fn mark_failed(&self, id: JobId, reason: &str) -> Result<Transition, StoreError>;

    /// `in_progress -> pending`, attempts unchanged.
    async fn requeue(&self, id: JobId, reason: &str) -> Result<Transition, StoreError>;

    /// Return jobs stuck `in_progress` longer than `threshold` to `pending`.
    async fn sweep_stuck(&self, threshold: Duration) -> Result<u64, StoreError>;

    /// Fail `pending` jobs whose attempt budget is already spent.
    async fn fail_exhausted(&self, max_attempts: u32) -> Result<u64, StoreError>;

    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;
}
