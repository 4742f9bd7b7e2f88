//! Metrics snapshot - キューの状態集計（/metrics 用）

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::JobStatus;
use crate::domain::{JobId, NotificationId};

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::InProgress => self.in_progress,
            JobStatus::Done => self.done,
            JobStatus::Failed => self.failed,
            JobStatus::Skipped => self.skipped,
        }
    }
}

/// Oldest job still waiting for pickup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub id: JobId,
    pub notification_id: Option<NotificationId>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Longest-running claimed job (watchdog candidate).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgressSummary {
    pub id: JobId,
    pub notification_id: Option<NotificationId>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub counts: StatusCounts,
    pub total: u64,
    pub oldest_pending: Option<PendingSummary>,
    pub oldest_in_progress: Option<InProgressSummary>,
}
