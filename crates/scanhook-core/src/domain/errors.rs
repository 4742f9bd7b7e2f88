//! Errors - エラー型（ストア障害と processor 障害）
//!
//! A duplicate notification is not an error; it is `EnqueueResult::Duplicate`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a Job Repository operation.
///
/// None of these are recovered locally; they propagate to the caller of the
/// repository operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error during {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to prepare store directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt value in jobs.{column}: {message}")]
    Corrupt {
        column: &'static str,
        message: String,
    },

    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Adapter for `map_err` that tags a sqlx error with the operation name.
    pub(crate) fn database(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| StoreError::Database { operation, source }
    }
}

/// Error raised by a `JobProcessor` invocation.
///
/// Every variant takes the retry path: the job is requeued while attempts
/// remain, and failed once the ceiling is reached.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),

    #[error("processor panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl ProcessError {
    pub fn external(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ProcessError::External(Box::new(err))
    }

    pub fn decode(what: &'static str, source: serde_json::Error) -> Self {
        ProcessError::Decode { what, source }
    }

    pub fn other(message: impl Into<String>) -> Self {
        ProcessError::Other(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_operation_and_duration() {
        let err = ProcessError::Timeout {
            operation: "fcli ssc av get 10".to_string(),
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "fcli ssc av get 10 timed out after 1500ms");
    }

    #[test]
    fn external_errors_are_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ProcessError::external(io);
        assert_eq!(err.to_string(), "refused");
    }

    #[test]
    fn database_adapter_keeps_operation() {
        let err = StoreError::database("pick_next")(sqlx::Error::RowNotFound);
        assert!(err.to_string().starts_with("database error during pick_next"));
    }
}
