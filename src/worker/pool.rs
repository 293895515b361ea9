//! Bounded worker pool for concurrent one-shot tasks
//!
//! Each orchestrator receives an explicit pool handle at construction; the
//! process's composition root decides pool sizes. Tasks are plain futures
//! spawned onto the runtime, with a semaphore bounding how many run at once.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// A handle to a bounded pool of concurrent tasks.
///
/// Cloning is cheap; clones share the same concurrency bound.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool running at most `max_concurrency` tasks at once.
    ///
    /// A bound of zero is clamped to one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Spawn a task onto the pool. The returned handle resolves when the
    /// task finishes; the task starts once a concurrency permit is free.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is owned by the pool and never closed.
            let _permit = permits
                .acquire_owned()
                .await
                .expect("worker pool semaphore closed");
            fut.await
        })
    }
}
