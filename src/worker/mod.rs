//! Worker-level error taxonomy, bounded worker pool, and request parsing
//!
//! The queue-polling layer that feeds this crate decides what to do with a
//! failed request based on its class:
//!
//! - [`WorkerError::BadRequest`] - malformed input; drop or dead-letter it
//! - [`WorkerError::Retryable`] - transient condition; redeliver the whole
//!   request later
//! - [`WorkerError::Fatal`] - anything else; cleanup has already run

pub mod pool;
pub mod requests;

use crate::append::AppendError;
use crate::download::{DownloadError, PackageError};

/// Request-level failure classes surfaced to the queue layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Malformed input. Never retried by this crate.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Transient condition; the request should be redelivered later.
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Unexpected failure. Intermediate files were cleaned up before this
    /// propagated.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl From<PackageError> for WorkerError {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::ServiceUnavailable(_) => Self::Retryable(err.to_string()),
            PackageError::InvalidRequest(_) => Self::BadRequest(err.to_string()),
            _ => Self::Fatal(err.to_string()),
        }
    }
}

impl From<AppendError> for WorkerError {
    fn from(err: AppendError) -> Self {
        match err {
            AppendError::NotWritable
            | AppendError::Status(_)
            | AppendError::TooManyRecords { .. } => Self::Retryable(err.to_string()),
            _ => Self::Fatal(err.to_string()),
        }
    }
}

impl From<DownloadError> for WorkerError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::InvalidParameters(_) | DownloadError::MissingHealthCodeColumn { .. } => {
                Self::BadRequest(err.to_string())
            }
            _ => Self::Fatal(err.to_string()),
        }
    }
}
