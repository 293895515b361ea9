//! Blob-store and log-store collaborator interfaces
//!
//! Both stores are external systems; this crate consumes them through small
//! traits so the pipelines can be exercised against in-memory fakes.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Errors from either store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A blob-store operation failed.
    #[error("blob store error: {0}")]
    Blob(String),

    /// A log-store operation failed.
    #[error("log store error: {0}")]
    Log(String),
}

/// A signed, time-limited download URL.
#[derive(Debug, Clone)]
pub struct SignedUrlInfo {
    /// The URL itself.
    pub url: String,
    /// When the URL stops working.
    pub expires_at: DateTime<Utc>,
}

/// The blob store that holds packaged user-data archives.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file to `bucket` under `key`.
    async fn write_file(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError>;

    /// Generate a signed URL for `key` that expires at the given time.
    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError>;
}

/// The NoSQL log store holding table mappings and worker-completion records.
///
/// Deleting an already-absent mapping is a no-op; both deletes are safe to
/// repeat.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Remove the schema-to-table mapping for a table that no longer exists,
    /// so future requests stop querying it.
    async fn delete_table_mapping(&self, schema_key: &str) -> Result<(), StoreError>;

    /// Remove the survey-table mapping for a table that no longer exists.
    async fn delete_survey_mapping(&self, app_id: &str, table_id: &str) -> Result<(), StoreError>;

    /// Persist a worker-completion record so external callers can detect that
    /// asynchronous processing finished.
    async fn write_worker_log(&self, worker_id: &str, tag: &str) -> Result<(), StoreError>;
}
