//! Append pipeline
//!
//! [`batcher::AppendBatcher`] drains a (possibly very large) record stream,
//! mapping each record to rows grouped by destination table, then runs one
//! [`task::TableAppendTask`] per destination table concurrently. A bad
//! record is logged and skipped; a timed-out table leaves its siblings
//! untouched; only after every table finishes is the first failure
//! propagated, and the worker-completion record is written regardless so
//! external callers can detect that processing ended.

pub mod batch;
pub mod batcher;
pub mod task;

use crate::store::StoreError;
use crate::table::TableServiceError;

pub use batch::AppendBatch;
pub use batcher::{AppendBatcher, AppendSummary, RowMapper};
pub use task::TableAppendTask;

/// Failures from the append pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The table service is in a read-only window; redeliver the request.
    #[error("table service is not writable")]
    NotWritable,

    /// Checking the service's write status failed; treated like a read-only
    /// window and redelivered.
    #[error("error checking table service status: {0}")]
    Status(#[source] TableServiceError),

    /// The source sequence exceeded the runaway-iteration guard; the caller
    /// should resubmit the request.
    #[error("hit max records per request ({max})")]
    TooManyRecords {
        /// The configured cap.
        max: usize,
    },

    /// One table's append job stayed pending through its whole wait plan.
    #[error("timed out appending rows to table {table_id} after {tries} poll attempts")]
    Timeout {
        /// The table whose append timed out.
        table_id: String,
        /// Poll attempts made before giving up.
        tries: usize,
    },

    /// One table's append failed remotely.
    #[error("error appending rows to table {table_id}: {source}")]
    Service {
        /// The table whose append failed.
        table_id: String,
        /// Underlying service failure.
        #[source]
        source: TableServiceError,
    },

    /// One table's append task died unexpectedly.
    #[error("append task for table {table_id} failed: {message}")]
    Task {
        /// The table whose task died.
        table_id: String,
        /// Failure description.
        message: String,
    },

    /// Writing the worker-completion record failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
