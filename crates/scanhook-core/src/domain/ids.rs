//! Domain identifiers (strongly-typed IDs).
//!
//! Two kinds of identifier flow through the queue:
//! - `JobId` is assigned by the store (SQLite rowid) and is monotonically
//!   increasing, so it doubles as the FIFO tie-breaker.
//! - `NotificationId` is the de-duplication key of an inbound event. It is
//!   supplied by the sender, or synthesized by `IdGenerator` when missing.
//!
//! Keeping them as distinct newtypes means a job id can never be passed where
//! a notification key is expected (and vice versa).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw store value (the `jobs.id` column).
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// De-duplication key of an inbound notification.
///
/// Exactly one job is ever created per distinct value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
