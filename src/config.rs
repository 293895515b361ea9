//! Worker configuration constants and tuning knobs

use std::time::Duration;

use serde::Deserialize;

use crate::table::poller::{RetryPolicy, WaitPlan};

/// Number of attempts for an individual remote call (submit, fetch, file
/// download). Applies to the call itself, not to the poll loop around it:
/// "job not ready yet" is a poll outcome, never a retried failure.
pub const RPC_RETRY_ATTEMPTS: u32 = 5;

/// Delay between attempts of an individual remote call.
pub const RPC_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Backoff plan in seconds for polling append acknowledgments. Exponential,
/// capped at 60 seconds, totalling a little over 3 minutes across 8 tries.
pub const APPEND_WAIT_PLAN_SECS: [u64; 8] = [1, 2, 4, 8, 16, 32, 60, 60];

/// Hard cap on records consumed from a single request's source sequence.
/// Exceeding the cap signals the caller to resubmit rather than risk an
/// unbounded iteration.
pub const MAX_RECORDS_PER_REQUEST: usize = 100_000;

/// Emit a progress log line every this many records while draining a large
/// record stream, so long-running requests stay observable.
pub const REPORTING_INTERVAL: usize = 1_000;

/// Records per second admitted from an append request's source stream, so a
/// big request cannot starve the upstream platform.
pub const RECORD_RATE_PER_SEC: u32 = 10;

/// Placeholder written into a file-reference cell when bulk resolution never
/// reported an outcome for that reference id.
pub const UNKNOWN_ATTACHMENT_ERROR: &str = "Unknown error downloading attachment";

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_poll_max_tries() -> usize {
    300
}

fn default_rpc_retry_attempts() -> u32 {
    RPC_RETRY_ATTEMPTS
}

fn default_rpc_retry_delay_ms() -> u64 {
    RPC_RETRY_DELAY.as_millis() as u64
}

fn default_url_expiration_hours() -> i64 {
    12
}

fn default_userdata_bucket() -> String {
    "study-userdata".to_string()
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_record_rate_per_sec() -> u32 {
    RECORD_RATE_PER_SEC
}

fn default_max_records() -> usize {
    MAX_RECORDS_PER_REQUEST
}

/// Tuning knobs for both pipelines. Deserializable so the composition root
/// can load overrides from its config file; every field has a production
/// default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Sleep between polls of an async query/bulk-resolve job, milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum polls of an async query/bulk-resolve job before timing out.
    pub poll_max_tries: usize,
    /// Attempts for an individual remote call.
    pub rpc_retry_attempts: u32,
    /// Delay between attempts of an individual remote call, milliseconds.
    pub rpc_retry_delay_ms: u64,
    /// Lifetime of the signed download URL, hours.
    pub url_expiration_hours: i64,
    /// Blob-store bucket that holds packaged user-data archives.
    pub userdata_bucket: String,
    /// Maximum concurrently running download/append tasks.
    pub worker_pool_size: usize,
    /// Records per second admitted from the append pipeline's source stream.
    pub record_rate_per_sec: u32,
    /// Hard cap on records consumed per request.
    pub max_records: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_tries: default_poll_max_tries(),
            rpc_retry_attempts: default_rpc_retry_attempts(),
            rpc_retry_delay_ms: default_rpc_retry_delay_ms(),
            url_expiration_hours: default_url_expiration_hours(),
            userdata_bucket: default_userdata_bucket(),
            worker_pool_size: default_worker_pool_size(),
            record_rate_per_sec: default_record_rate_per_sec(),
            max_records: default_max_records(),
        }
    }
}

impl ExporterConfig {
    /// Wait plan for query and bulk-resolve jobs: a fixed interval repeated
    /// up to the configured number of tries.
    pub fn query_wait_plan(&self) -> WaitPlan {
        WaitPlan::fixed(Duration::from_millis(self.poll_interval_ms), self.poll_max_tries)
    }

    /// Wait plan for append acknowledgments: the fixed exponential plan.
    pub fn append_wait_plan(&self) -> WaitPlan {
        WaitPlan::explicit(
            APPEND_WAIT_PLAN_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        )
    }

    /// Retry policy for individual remote calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.rpc_retry_attempts,
            delay: Duration::from_millis(self.rpc_retry_delay_ms),
        }
    }
}
