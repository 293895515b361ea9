//! Drains a record stream into per-table batches and appends them all
//!
//! The batcher is generic over a [`RowMapper`] strategy: each source record
//! maps to zero or more (destination table, row) pairs — typically an
//! app-wide row, one row per study the participant belongs to, and optional
//! demographics rows for either. Mapping failures are isolated per record;
//! append failures are isolated per table.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::{error, info};

use crate::append::batch::AppendBatch;
use crate::append::task::TableAppendTask;
use crate::append::AppendError;
use crate::config::{
    APPEND_WAIT_PLAN_SECS, MAX_RECORDS_PER_REQUEST, RECORD_RATE_PER_SEC, REPORTING_INTERVAL,
};
use crate::store::LogStore;
use crate::table::poller::{JobPoller, RetryPolicy, WaitPlan};
use crate::table::rate_limit::RateLimiter;
use crate::table::{Row, TableService};
use crate::worker::pool::WorkerPool;

/// Error type produced by a [`RowMapper`].
pub type MapError = Box<dyn std::error::Error + Send + Sync>;

/// Maps one source record to the rows it contributes, keyed by destination
/// table. Implementations may keep caches (e.g. per-study configuration)
/// across calls.
#[async_trait]
pub trait RowMapper: Send {
    /// Source record type.
    type Record: Send + Sync;

    /// Map one record. An error here skips the record; it never aborts the
    /// batch.
    async fn map_record(
        &mut self,
        record: &Self::Record,
    ) -> Result<Vec<(String, Row)>, MapError>;
}

/// What one batcher run accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendSummary {
    /// Records consumed from the source stream (including skipped ones).
    pub num_records: usize,
    /// Destination tables that received an append.
    pub num_tables: usize,
}

/// Accumulates rows per destination table, then appends to every table
/// concurrently.
pub struct AppendBatcher {
    service: Arc<dyn TableService>,
    log_store: Arc<dyn LogStore>,
    pool: WorkerPool,
    rate_limiter: RateLimiter,
    append_plan: WaitPlan,
    retry: RetryPolicy,
    max_records: usize,
    worker_id: String,
}

impl AppendBatcher {
    /// Create a batcher with production defaults: 10 records/second, the
    /// fixed exponential append wait plan, and the standard record cap.
    pub fn new(
        service: Arc<dyn TableService>,
        log_store: Arc<dyn LogStore>,
        pool: WorkerPool,
        worker_id: impl Into<String>,
    ) -> Self {
        let append_plan = WaitPlan::explicit(
            APPEND_WAIT_PLAN_SECS
                .iter()
                .map(|secs| std::time::Duration::from_secs(*secs))
                .collect(),
        );
        Self {
            service,
            log_store,
            pool,
            rate_limiter: RateLimiter::per_second(RECORD_RATE_PER_SEC),
            append_plan,
            retry: RetryPolicy::default(),
            max_records: MAX_RECORDS_PER_REQUEST,
            worker_id: worker_id.into(),
        }
    }

    /// Override the record-stream rate limit.
    pub fn with_rate(mut self, permits_per_second: u32) -> Self {
        self.rate_limiter = RateLimiter::per_second(permits_per_second);
        self
    }

    /// Override the wait plan for append acknowledgments.
    pub fn with_wait_plan(mut self, plan: WaitPlan) -> Self {
        self.append_plan = plan;
        self
    }

    /// Override the per-call retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the record cap.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Drain the record stream, then append every table's accumulated rows.
    ///
    /// Per-record mapping failures and stream-item failures are logged and
    /// skipped. Per-table append failures are logged; the first one is
    /// returned only after every sibling table has finished, and the
    /// worker-completion record is written either way so external callers
    /// can detect that processing ended.
    pub async fn run<M, S, E>(
        &self,
        app_id: &str,
        mut mapper: M,
        records: S,
    ) -> Result<AppendSummary, AppendError>
    where
        M: RowMapper,
        S: Stream<Item = Result<M::Record, E>>,
        E: std::fmt::Display,
    {
        // A read-only service window recycles the whole request instead of
        // half-writing it.
        match self.service.is_writable().await {
            Ok(true) => {}
            Ok(false) => return Err(AppendError::NotWritable),
            Err(err) => return Err(AppendError::Status(err)),
        }

        let started = Instant::now();
        let mut batch = AppendBatch::default();
        let mut num_records = 0usize;

        tokio::pin!(records);
        while let Some(item) = records.next().await {
            self.rate_limiter.acquire().await;

            match item {
                Ok(record) => match mapper.map_record(&record).await {
                    Ok(pairs) => {
                        for (table_id, row) in pairs {
                            batch.add(&table_id, row);
                        }
                    }
                    Err(err) => {
                        error!(app_id = %app_id, error = %err, "error mapping record, skipping");
                    }
                },
                Err(err) => {
                    error!(app_id = %app_id, error = %err, "error fetching next record");
                }
            }

            num_records += 1;
            if num_records % REPORTING_INTERVAL == 0 {
                info!(
                    app_id = %app_id,
                    num_records = num_records,
                    elapsed_s = started.elapsed().as_secs(),
                    "still draining record stream"
                );
            }
            if num_records >= self.max_records {
                // Runaway-iteration guard; the caller resubmits the request.
                return Err(AppendError::TooManyRecords {
                    max: self.max_records,
                });
            }
        }

        let poller =
            JobPoller::new(self.append_plan.clone()).with_retry_policy(self.retry.clone());
        let mut handles = Vec::new();
        for (table_id, rows) in batch.into_inner() {
            if rows.is_empty() {
                continue;
            }
            let task = TableAppendTask::new(
                table_id.clone(),
                rows,
                self.service.clone(),
                poller.clone(),
            );
            handles.push((table_id, self.pool.spawn(task.run())));
        }
        let num_tables = handles.len();

        let mut first_error: Option<AppendError> = None;
        for (table_id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(table_id = %table_id, error = %err, "append task failed");
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    error!(table_id = %table_id, error = %join_err, "append task died");
                    first_error.get_or_insert(AppendError::Task {
                        table_id,
                        message: join_err.to_string(),
                    });
                }
            }
        }

        // The completion record is written even when a table failed: rows
        // may have been partially written, and external callers need a
        // reliable "processing ended" marker.
        let tag = format!("app={app_id}, records={num_records}");
        if let Err(err) = self.log_store.write_worker_log(&self.worker_id, &tag).await {
            error!(error = %err, "failed to write worker completion record");
            first_error.get_or_insert(AppendError::Store(err));
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(
                    app_id = %app_id,
                    num_records = num_records,
                    num_tables = num_tables,
                    elapsed_s = started.elapsed().as_secs(),
                    "append batch complete"
                );
                Ok(AppendSummary {
                    num_records,
                    num_tables,
                })
            }
        }
    }
}
