//! Download pipeline
//!
//! One [`table_task::TableDownloadTask`] per data table queries, redacts, and
//! rewrites that table's slice of a participant's data; one
//! [`survey_task::SurveyDownloadTask`] per survey table dumps the whole table
//! for reference. The [`packager::DownloadPackager`] runs many of both
//! concurrently, aggregates artifacts and isolated failures, and turns the
//! lot into a single archive behind a signed URL.
//!
//! # Failure model
//!
//! Individual task failures are isolated: the packager records them in an
//! error log shipped inside the archive and keeps going. The one exception
//! is the table service declaring itself unavailable, which short-circuits
//! the whole batch as [`PackageError::ServiceUnavailable`] so the queue
//! layer can redeliver the request once the service is back.
//!
//! Every task deletes every file it created before an error propagates, and
//! the packager deletes every collected file plus the working directory on
//! every exit path.

pub mod archive;
pub mod columns;
pub mod context;
pub mod packager;
pub mod params;
pub mod survey_task;
pub mod table_task;

use std::path::PathBuf;

use crate::store::StoreError;
use crate::table::{PollError, TableServiceError};

pub use columns::ColumnClassification;
pub use packager::{DownloadPackager, PackageRequest};
pub use params::{DownloadParameters, ExportSchema};
pub use survey_task::SurveyDownloadTask;
pub use table_task::TableDownloadTask;

/// Artifacts produced by one table-download task.
///
/// Both fields `None` means the table held no data for the request. That is
/// a successful outcome, not an error.
#[derive(Debug, Default)]
pub struct DownloadResult {
    /// The redacted query-result file, if the table held data.
    pub csv_file: Option<PathBuf>,
    /// The resolved-attachment bundle, if any attachments were referenced.
    pub bundle_file: Option<PathBuf>,
}

impl DownloadResult {
    /// The "no data" result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this result carries no artifacts at all.
    pub fn is_empty(&self) -> bool {
        self.csv_file.is_none() && self.bundle_file.is_none()
    }
}

/// Failures from a single download task.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Task parameters failed validation.
    #[error("invalid download parameters: {0}")]
    InvalidParameters(String),

    /// The query result has no `healthCode` column; the table is malformed.
    #[error("no healthCode column in query result {file}")]
    MissingHealthCodeColumn {
        /// The downloaded file whose header was inspected.
        file: String,
    },

    /// The data table was deleted remotely; its stale mapping has been
    /// removed so future requests stop querying it.
    #[error("table {table_id} for schema {schema_key} no longer exists")]
    TableGone {
        /// The vanished table.
        table_id: String,
        /// Schema whose mapping was removed.
        schema_key: String,
    },

    /// The survey table was deleted remotely; its stale mapping has been
    /// removed.
    #[error("survey table {table_id} no longer exists")]
    SurveyTableGone {
        /// The vanished table.
        table_id: String,
    },

    /// Querying the table failed or timed out.
    #[error("error querying table {table_id}: {source}")]
    Query {
        /// Table being queried.
        table_id: String,
        /// Underlying poll failure.
        #[source]
        source: PollError,
    },

    /// Bulk attachment resolution failed or timed out.
    #[error("error resolving attachments for table {table_id}: {source}")]
    BulkResolve {
        /// Table the attachments belong to.
        table_id: String,
        /// Underlying poll failure.
        #[source]
        source: PollError,
    },

    /// Downloading a service-held file failed.
    #[error("error downloading to {path}: {source}")]
    Download {
        /// Local destination path.
        path: String,
        /// Underlying service failure.
        #[source]
        source: TableServiceError,
    },

    /// Reading table metadata failed.
    #[error("error reading metadata for table {table_id}: {source}")]
    Metadata {
        /// Table being described.
        table_id: String,
        /// Underlying service failure.
        #[source]
        source: TableServiceError,
    },

    /// A CSV file could not be parsed or written.
    #[error("CSV error in {path}: {message}")]
    Csv {
        /// File being processed.
        path: String,
        /// Parser or writer failure.
        message: String,
    },

    /// A local filesystem operation failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// File being touched.
        path: String,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// The table-service failure at the root of this error, if any.
    pub fn service_cause(&self) -> Option<&TableServiceError> {
        match self {
            Self::Query { source, .. } | Self::BulkResolve { source, .. } => match source {
                PollError::Service(err) => Some(err),
                PollError::Timeout { .. } => None,
            },
            Self::Download { source, .. } | Self::Metadata { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the root cause is the service's unavailable/read-only
    /// signature. The packager short-circuits the whole batch on this.
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self.service_cause(), Some(TableServiceError::Unavailable(_)))
    }
}

/// Failures from the packager as a whole.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// The table service is unavailable or read-only; the entire request
    /// should be redelivered later.
    #[error("table service is unavailable: {0}")]
    ServiceUnavailable(String),

    /// The package request itself was malformed.
    #[error("invalid package request: {0}")]
    InvalidRequest(String),

    /// A local filesystem operation failed.
    #[error("IO error: {0}")]
    Io(String),

    /// Building the master archive failed.
    #[error("error writing archive {path}: {message}")]
    Zip {
        /// Archive path.
        path: String,
        /// Failure description.
        message: String,
    },

    /// Uploading or signing through the blob store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
