//! Remote table-service interface and async call plumbing
//!
//! The table service holds tabular study records and their attached files,
//! and only exposes asynchronous submit/poll operations for queries, bulk
//! file resolution, and table writes. This module defines the trait the rest
//! of the crate consumes, the wire-level types those operations exchange, and
//! the adapters that plug each operation pair into the [`poller::JobPoller`].
//!
//! # Components
//!
//! - [`TableService`] - the collaborator trait (implemented outside this crate)
//! - [`poller`] - wait plans, per-call retry, and the submit/poll driver
//! - [`rate_limit`] - smoothed rate limiting for outer-loop work

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;

pub mod poller;
pub mod rate_limit;

pub use poller::{AsyncJob, JobPoller, PollError, RetryPolicy, WaitPlan};
pub use rate_limit::RateLimiter;

/// A single row payload destined for a table append: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Opaque handle for an in-flight asynchronous job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobToken(pub String);

/// Opaque reference to a file stored by the table service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef(pub String);

/// A query to run against one table.
#[derive(Debug, Clone)]
pub struct TableQuery {
    /// Table the query runs against.
    pub table_id: String,
    /// Query text, in the service's SQL dialect.
    pub sql: String,
}

impl TableQuery {
    /// Create a query for the given table.
    pub fn new(table_id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            sql: sql.into(),
        }
    }
}

/// Metadata for one remote table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    /// Table id.
    pub id: String,
    /// Human-readable display name, used for naming downloaded files.
    pub name: String,
}

/// Per-reference outcome of a bulk file resolution.
#[derive(Debug, Clone, Default)]
pub struct EntrySummary {
    /// The reference id this summary describes.
    pub reference_id: String,
    /// Name of the entry inside the resolved bundle, when resolution worked.
    pub entry_name: Option<String>,
    /// Failure description, when resolution failed for this reference.
    pub failure_message: Option<String>,
}

/// Result of a completed bulk file resolution.
#[derive(Debug, Clone)]
pub struct BundleResult {
    /// Reference to the bundle file holding every resolved attachment.
    pub bundle_ref: FileRef,
    /// One summary per requested reference id.
    pub summaries: Vec<EntrySummary>,
}

/// Acknowledgment of a completed table append.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    /// References to the rows actually written.
    pub row_ids: Vec<i64>,
}

/// Errors surfaced by the table service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TableServiceError {
    /// The referenced table, file, or job does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service is down or in read-only mode.
    #[error("table service unavailable: {0}")]
    Unavailable(String),

    /// A remote call failed for a transient reason (network, 5xx).
    #[error("remote call failed: {0}")]
    Remote(String),

    /// A local IO failure while moving service data to or from disk.
    #[error("IO error: {0}")]
    Io(String),
}

impl TableServiceError {
    /// Whether retrying the same call may succeed. "Not found" is definitive
    /// and never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Remote(_))
    }
}

/// Result alias for table-service operations.
pub type ServiceResult<T> = Result<T, TableServiceError>;

/// The asynchronous table service consumed by both pipelines.
///
/// Every `submit_*`/`fetch_*` pair follows the same protocol: submit returns
/// a [`JobToken`], and fetch returns `Ok(None)` while the job is still
/// running, `Ok(Some(_))` once it completes, or an error if it failed.
#[async_trait]
pub trait TableService: Send + Sync {
    /// Whether the service currently accepts writes. Checked before append
    /// batches so a read-only window recycles the request instead of
    /// half-writing it.
    async fn is_writable(&self) -> ServiceResult<bool>;

    /// Start an asynchronous table query.
    async fn submit_query(&self, query: &TableQuery) -> ServiceResult<JobToken>;

    /// Poll a query job. `Ok(None)` means not ready yet.
    async fn fetch_query_result(&self, token: &JobToken) -> ServiceResult<Option<FileRef>>;

    /// Start an asynchronous bulk resolution of attachment references.
    async fn submit_bulk_resolve(
        &self,
        table_id: &str,
        reference_ids: &HashSet<String>,
    ) -> ServiceResult<JobToken>;

    /// Poll a bulk-resolve job. `Ok(None)` means not ready yet.
    async fn fetch_bulk_resolve_result(
        &self,
        token: &JobToken,
    ) -> ServiceResult<Option<BundleResult>>;

    /// Download a service-held file to a local path.
    async fn download_file(&self, file_ref: &FileRef, dest: &Path) -> ServiceResult<()>;

    /// Fetch metadata for one table.
    async fn table_metadata(&self, table_id: &str) -> ServiceResult<TableMetadata>;

    /// Start an asynchronous append of rows to a table.
    async fn submit_append(&self, table_id: &str, rows: &[Row]) -> ServiceResult<JobToken>;

    /// Poll an append job. `Ok(None)` means not ready yet.
    async fn fetch_append_result(&self, token: &JobToken) -> ServiceResult<Option<AppendReceipt>>;
}

/// [`AsyncJob`] adapter for a table query.
pub struct QueryJob<'a> {
    /// Service to run the query against.
    pub service: &'a dyn TableService,
    /// The query to run.
    pub query: TableQuery,
}

#[async_trait]
impl AsyncJob for QueryJob<'_> {
    type Output = FileRef;

    async fn submit(&self) -> ServiceResult<JobToken> {
        self.service.submit_query(&self.query).await
    }

    async fn fetch(&self, token: &JobToken) -> ServiceResult<Option<FileRef>> {
        self.service.fetch_query_result(token).await
    }
}

/// [`AsyncJob`] adapter for a bulk file resolution.
pub struct BulkResolveJob<'a> {
    /// Service to resolve against.
    pub service: &'a dyn TableService,
    /// Table the references belong to.
    pub table_id: &'a str,
    /// Reference ids to resolve.
    pub reference_ids: &'a HashSet<String>,
}

#[async_trait]
impl AsyncJob for BulkResolveJob<'_> {
    type Output = BundleResult;

    async fn submit(&self) -> ServiceResult<JobToken> {
        self.service
            .submit_bulk_resolve(self.table_id, self.reference_ids)
            .await
    }

    async fn fetch(&self, token: &JobToken) -> ServiceResult<Option<BundleResult>> {
        self.service.fetch_bulk_resolve_result(token).await
    }
}

/// [`AsyncJob`] adapter for a table append.
pub struct AppendJob<'a> {
    /// Service to append through.
    pub service: &'a dyn TableService,
    /// Destination table.
    pub table_id: &'a str,
    /// Rows to append.
    pub rows: &'a [Row],
}

#[async_trait]
impl AsyncJob for AppendJob<'_> {
    type Output = AppendReceipt;

    async fn submit(&self) -> ServiceResult<JobToken> {
        self.service.submit_append(self.table_id, self.rows).await
    }

    async fn fetch(&self, token: &JobToken) -> ServiceResult<Option<AppendReceipt>> {
        self.service.fetch_append_result(token).await
    }
}
