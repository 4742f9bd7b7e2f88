//! Job state machine for the queue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Job status (the `jobs.status` column).
///
/// State transitions:
/// - Pending -> InProgress (pickup, attempts += 1)
/// - InProgress -> Done | Skipped | Failed
/// - InProgress -> Pending (requeue after a raised error, or watchdog reclaim)
/// - Pending -> Failed (attempt budget exhausted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for pickup.
    Pending,

    /// Claimed by a worker.
    InProgress,

    Done,
    Failed,
    Skipped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Skipped,
    ];

    /// Column value.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(JobStatus::Pending, false)]
    #[case(JobStatus::InProgress, false)]
    #[case(JobStatus::Done, true)]
    #[case(JobStatus::Failed, true)]
    #[case(JobStatus::Skipped, true)]
    fn terminal_states(#[case] status: JobStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn column_values_parse_back() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = "running".parse::<JobStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("running".to_string()));
    }

    #[test]
    fn serde_matches_column_values() {
        let v = serde_json::to_value(JobStatus::InProgress).unwrap();
        assert_eq!(v, serde_json::json!("in_progress"));
    }
}
