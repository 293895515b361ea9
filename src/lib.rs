//! # Study Export Worker
//!
//! Batch export engine for health-study data. The crate moves study records
//! between a REST data platform, a blob store, a NoSQL log store, and a
//! remote tabular service that only exposes slow, asynchronous, rate-limited
//! operations (submit a job, poll until ready).
//!
//! ## Features
//!
//! - **Download packaging**: query every table holding a participant's data,
//!   bulk-resolve attached files, redact identifiers, and assemble a single
//!   downloadable archive behind a time-limited signed URL
//! - **Batch appends**: accumulate rows per destination table while iterating
//!   a large record stream, then append to every table concurrently with
//!   row-count verification
//! - **Async job polling**: submit/poll remote protocols converted into
//!   bounded blocking calls with configurable wait plans
//! - **Partial-failure aggregation**: one failing table never aborts its
//!   siblings; failures are collected into user-visible error logs
//! - **Guaranteed cleanup**: every transient file is removed on every exit
//!   path, success or failure
//!
//! ## Quick Start
//!
//! ```no_run
//! use study_export_worker::config::ExporterConfig;
//! use study_export_worker::download::packager::{DownloadPackager, PackageRequest};
//! use study_export_worker::worker::pool::WorkerPool;
//! # use std::collections::{HashMap, HashSet};
//! # use std::sync::Arc;
//! # async fn example(
//! #     service: Arc<dyn study_export_worker::table::TableService>,
//! #     blob_store: Arc<dyn study_export_worker::store::BlobStore>,
//! #     log_store: Arc<dyn study_export_worker::store::LogStore>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExporterConfig::default();
//! let pool = WorkerPool::new(config.worker_pool_size);
//! let packager = DownloadPackager::new(service, blob_store, log_store, pool, config);
//!
//! let request = PackageRequest {
//!     app_id: "my-app".to_string(),
//!     health_code: "health-code-1".to_string(),
//!     start_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
//!     end_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
//!     schemas_by_table: HashMap::new(),
//!     survey_table_ids: HashSet::new(),
//! };
//! match packager.package(&request).await? {
//!     Some(info) => println!("download ready at {}", info.url),
//!     None => println!("no data for this request"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate is organized into a handful of core modules:
//!
//! - [`table`] - Remote table-service interface, async job poller, rate limiter
//! - [`download`] - Download tasks and the archive packager
//! - [`append`] - Per-table append tasks and the record batcher
//! - [`store`] - Blob-store and log-store collaborator interfaces
//! - [`worker`] - Worker error taxonomy, bounded worker pool, request parsing
//! - [`config`] - Tuning knobs shared by both pipelines
//!
//! Concurrency comes from running many straight-line async tasks side by side
//! on a bounded [`worker::pool::WorkerPool`]; no task shares mutable state
//! with another.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Append pipeline: row batching and per-table append tasks
pub mod append;

/// Configuration constants and tuning knobs
pub mod config;

/// Download pipeline: per-table download tasks and the archive packager
pub mod download;

/// Logging initialization for the composition root
pub mod logging;

/// Blob-store and log-store collaborator interfaces
pub mod store;

/// Remote table-service interface, async job polling, and rate limiting
pub mod table;

/// Worker-level error taxonomy, worker pool, and request parsing
pub mod worker;

// Re-export the two pipeline entry points.
pub use append::batcher::AppendBatcher;
pub use download::packager::DownloadPackager;
