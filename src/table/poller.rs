//! Async job polling with bounded wait plans and per-call retry
//!
//! The table service runs every expensive operation as a submit/poll pair.
//! [`JobPoller`] converts such a pair into a single bounded call: submit
//! once, then fetch on a fixed schedule of sleeps (the wait plan) until the
//! job is ready, fails, or the plan is exhausted.
//!
//! Two failure modes are kept strictly apart:
//!
//! - a flaky individual RPC, retried in place per [`RetryPolicy`];
//! - a job that is simply not finished yet (`Ok(None)` from fetch), which
//!   consumes a wait-plan entry and is never treated as an error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use crate::config::{RPC_RETRY_ATTEMPTS, RPC_RETRY_DELAY};
use crate::table::{JobToken, ServiceResult, TableServiceError};

/// Ordered sequence of sleeps a poller performs before each fetch attempt.
///
/// The plan length bounds the number of fetch attempts; a job still pending
/// after the last entry is a timeout.
#[derive(Debug, Clone)]
pub struct WaitPlan {
    intervals: Vec<Duration>,
}

impl WaitPlan {
    /// A plan of `tries` equal intervals.
    pub fn fixed(interval: Duration, tries: usize) -> Self {
        Self {
            intervals: vec![interval; tries],
        }
    }

    /// An arbitrary explicit plan. Zero-length entries skip the sleep, which
    /// lets tests poll without waiting.
    pub fn explicit(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    /// Number of fetch attempts this plan allows.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether the plan allows no attempts at all.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Iterate the sleep intervals in order.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        self.intervals.iter().copied()
    }
}

/// Retry policy for an individual remote call: a fixed number of attempts
/// with a fixed delay, applied only to errors the service marks transient.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: RPC_RETRY_ATTEMPTS,
            delay: RPC_RETRY_DELAY,
        }
    }
}

/// Run one remote call under a retry policy.
///
/// Only transient errors are retried; "not found" and local IO failures are
/// definitive and propagate on the first attempt.
pub async fn retry_call<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> ServiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                warn!(
                    attempt = attempt,
                    max_attempts = policy.attempts,
                    error = %err,
                    "transient remote call failure, retrying"
                );
                sleep(policy.delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// One submit/poll operation pair, expressed against the poller.
///
/// `fetch` returns `Ok(None)` while the job is still running. Any error from
/// `fetch` other than a transient RPC failure ends the poll immediately.
#[async_trait]
pub trait AsyncJob: Sync {
    /// Value produced by the completed job.
    type Output: Send;

    /// Start the job, returning its token.
    async fn submit(&self) -> ServiceResult<JobToken>;

    /// Poll the job. `Ok(None)` means not ready yet.
    async fn fetch(&self, token: &JobToken) -> ServiceResult<Option<Self::Output>>;
}

/// Errors from driving an async job to completion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PollError {
    /// The job stayed pending through the entire wait plan.
    #[error("async job timed out after {tries} poll attempts")]
    Timeout {
        /// Number of fetch attempts made before giving up.
        tries: usize,
    },

    /// The submit or a fetch failed remotely.
    #[error(transparent)]
    Service(#[from] TableServiceError),
}

/// Drives an [`AsyncJob`] to completion under a [`WaitPlan`].
#[derive(Debug, Clone)]
pub struct JobPoller {
    plan: WaitPlan,
    retry: RetryPolicy,
}

impl JobPoller {
    /// Create a poller with the given wait plan and the default retry policy.
    pub fn new(plan: WaitPlan) -> Self {
        Self {
            plan,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the per-call retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The wait plan this poller runs under.
    pub fn plan(&self) -> &WaitPlan {
        &self.plan
    }

    /// Submit the job once, then fetch per the wait plan until it is ready.
    ///
    /// Sleeps the current entry before each fetch (a zero entry skips the
    /// sleep). Returns [`PollError::Timeout`] if every fetch reported "not
    /// ready".
    pub async fn run<J: AsyncJob>(&self, job: &J) -> Result<J::Output, PollError> {
        let token = retry_call(&self.retry, || job.submit()).await?;

        for interval in self.plan.intervals() {
            if !interval.is_zero() {
                sleep(interval).await;
            }

            match retry_call(&self.retry, || job.fetch(&token)).await? {
                Some(value) => return Ok(value),
                None => continue,
            }
        }

        Err(PollError::Timeout {
            tries: self.plan.len(),
        })
    }
}
