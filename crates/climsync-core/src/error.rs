// crates/climsync-core/src/error.rs

use climsync_bucket::BucketError;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification used by callers to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Execution,
    Store,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{reason}")]
    NotFound { reason: String },

    #[error("transform execution failed: {reason}")]
    Execution {
        reason: String,
        exit_status: Option<i32>,
        stderr: Option<String>,
    },

    #[error("object store error: {0}")]
    Store(#[from] BucketError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("scratch workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl SyncError {
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::Store(BucketError::BucketNotAllowed(_)) => ErrorKind::NotFound,
            SyncError::Store(_) => ErrorKind::Store,
            SyncError::InvalidInput(_) => ErrorKind::InvalidInput,
            SyncError::Execution { .. } | SyncError::Workspace(_) => ErrorKind::Execution,
        }
    }

    /// Human-readable detail surfaced to callers.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallowed_bucket_is_classified_as_not_found() {
        let err = SyncError::from(BucketError::BucketNotAllowed("secrets".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.reason(), "object store error: Bucket 'secrets' not allowed");

        let err = SyncError::from(BucketError::Sdk("timeout".into()));
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn execution_reason_keeps_process_detail() {
        let err = SyncError::Execution {
            reason: "transform exited with status 2".into(),
            exit_status: Some(2),
            stderr: Some("Error in read.csv".into()),
        };
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(
            err.reason(),
            "transform execution failed: transform exited with status 2"
        );
    }
}
