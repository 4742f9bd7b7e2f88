//! Outcome model: the classified result a `JobProcessor` reports.
//!
//! A processor either returns an `Outcome` (the job is finished, one way or
//! another) or raises a `ProcessError` (something transient went wrong and
//! the worker decides whether to retry). The two paths are deliberately kept
//! apart: a `Failed` outcome is a business-rule rejection and is never retried.

use serde::{Deserialize, Serialize};

/// Classification of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The external work was performed.
    Done,

    /// Processing determined no action was needed.
    Skipped,

    /// Logical failure (bad payload, missing data). Not retried.
    Failed,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Done => "done",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Failed => "failed",
        }
    }
}

/// Result of one successful processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    /// Human-readable reason, recorded as the job's `last_error` for
    /// skipped and failed outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Free-form details for logs (e.g. the downstream response).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl Outcome {
    pub fn done() -> Self {
        Self {
            kind: OutcomeKind::Done,
            reason: None,
            detail: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            reason: Some(reason.into()),
            detail: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            reason: Some(reason.into()),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn reason_or_empty(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_status_names() {
        assert_eq!(serde_json::to_string(&OutcomeKind::Done).unwrap(), "\"done\"");
        assert_eq!(
            serde_json::to_string(&OutcomeKind::Skipped).unwrap(),
            "\"skipped\""
        );
        assert_eq!(
            serde_json::to_string(&OutcomeKind::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn constructors_set_kind_and_reason() {
        let done = Outcome::done().with_detail(serde_json::json!({"id": 7}));
        assert_eq!(done.kind, OutcomeKind::Done);
        assert_eq!(done.reason_or_empty(), "");
        assert_eq!(done.detail.unwrap()["id"], 7);

        let skipped = Outcome::skipped("no-op");
        assert_eq!(skipped.kind, OutcomeKind::Skipped);
        assert_eq!(skipped.reason_or_empty(), "no-op");

        let failed = Outcome::failed("missing id");
        assert_eq!(failed.kind, OutcomeKind::Failed);
        assert_eq!(failed.reason.as_deref(), Some("missing id"));
    }

    #[test]
    fn empty_fields_are_omitted() {
        let v = serde_json::to_value(Outcome::done()).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "done"}));
    }
}
