//! Worker pool draining the work queue.
//!
//! A fixed number of concurrent permits (`QueueConfig::concurrency`) claim
//! jobs and hand them to a `JobExecutor`. Adapted from
//! `scheduling::worker::Worker::run_loop`'s semaphore-bounded dispatch loop
//! and `WorkerPool`'s multi-worker bookkeeping, collapsed to a single pool
//! since the specification has one queue rather than many named queues.

use super::JobQueue;
use crate::model::Job;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Executes one claimed job to completion, reporting success/failure back
/// through the queue itself (via `complete`/`fail`). Implemented by the job
/// processor.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one job. Errors are expected to have already been recorded on the
    /// queue (via `fail`/`fail_permanently`) by the time this returns.
    async fn execute(&self, job: Job);
}

/// Semaphore-bounded worker pool draining a `JobQueue`.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    concurrency: usize,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Construct a pool that claims jobs from `queue` and dispatches them to
    /// `executor`, running at most `concurrency` jobs at once.
    pub fn new(queue: Arc<JobQueue>, executor: Arc<dyn JobExecutor>, concurrency: usize) -> Self {
        Self {
            queue,
            executor,
            concurrency,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the claim/dispatch loop until `stop` is called. Idles briefly
    /// between empty polls rather than busy-spinning.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(event = "worker_pool_already_running");
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        while self.running.load(Ordering::SeqCst) {
            match self.queue.claim_next().await {
                Ok(Some(job)) => {
                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore not closed");
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(async move {
                        executor.execute(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                Err(err) => {
                    error!(event = "worker_pool_claim_failed", error = %err);
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Signal the run loop to stop after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
