//! Job record: one row of the `jobs` table.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::JobStatus;
use crate::domain::{JobId, NotificationId, StoreError};

/// Job as read from the store.
///
/// This is a snapshot; the row may change as soon as the repository call that
/// produced it returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub notification_id: Option<NotificationId>,

    /// Opaque payload; the queue never inspects it.
    pub payload: serde_json::Value,

    pub status: JobStatus,

    /// Pickups so far (incremented at pickup, never on requeue).
    pub attempts: u32,

    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Columns in the order `Job::from_row` expects.
pub(crate) const JOB_COLUMNS: &str =
    "id, notification_id, payload_json, status, attempts, last_error, created_at, updated_at";

impl Job {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let decode = StoreError::database;

        let id: i64 = row.try_get("id").map_err(decode("decode id"))?;
        let notification_id: Option<String> = row
            .try_get("notification_id")
            .map_err(decode("decode notification_id"))?;
        let payload_json: String = row
            .try_get("payload_json")
            .map_err(decode("decode payload_json"))?;
        let status: String = row.try_get("status").map_err(decode("decode status"))?;
        let attempts: i64 = row.try_get("attempts").map_err(decode("decode attempts"))?;
        let last_error: Option<String> = row
            .try_get("last_error")
            .map_err(decode("decode last_error"))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(decode("decode created_at"))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(decode("decode updated_at"))?;

        let payload = serde_json::from_str(&payload_json).map_err(|e| StoreError::Corrupt {
            column: "payload_json",
            message: e.to_string(),
        })?;
        let status = status.parse::<JobStatus>().map_err(|e| StoreError::Corrupt {
            column: "status",
            message: e.to_string(),
        })?;
        let attempts = u32::try_from(attempts).map_err(|_| StoreError::Corrupt {
            column: "attempts",
            message: format!("out of range: {attempts}"),
        })?;

        Ok(Self {
            id: JobId::new(id),
            notification_id: notification_id.map(NotificationId::new),
            payload,
            status,
            attempts,
            last_error,
            created_at: parse_ts("created_at", &created_at)?,
            updated_at: parse_ts("updated_at", &updated_at)?,
        })
    }
}

/// Store format: RFC 3339, UTC, millisecond precision, `Z` suffix.
///
/// Fixed width, so text comparison is chronological.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(column: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            column,
            message: format!("{raw:?}: {e}"),
        })
}
