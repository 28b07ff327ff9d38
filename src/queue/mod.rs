//! C4 — Work Queue.
//!
//! Durable, Redis-backed FIFO admission and state machine for jobs, with
//! per-user/system admission caps and exponential-backoff retry. Grounded on
//! `scheduling::queue::JobQueue`'s sorted-set enqueue/dequeue and dead-letter
//! partition, generalized to the specification's `pending -> processing ->
//! {completed | failed(retry) | dead}` state machine. Per-user/system
//! admission caps are new counting logic layered on top, since the teacher's
//! queue has no admission-control concept.

pub mod store;
pub mod worker;

use crate::config::QueueConfig;
use crate::model::{Job, JobStatus};
use chrono::Utc;
use store::QueueStore;
use thiserror::Error;
use tracing::warn;

/// Work queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    /// The submitting user has too many non-terminal jobs in flight.
    #[error("user {0} has reached the per-user job limit")]
    UserLimitReached(String),

    /// The system-wide non-terminal job count has reached its cap.
    #[error("system queue limit reached")]
    SystemLimitReached,

    /// A transition was attempted from a job that doesn't exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A transition was attempted on a job already in a terminal state.
    #[error("job {0} is already terminal")]
    AlreadyTerminal(String),
}

/// Result type for work queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Durable job queue with admission control and retry bookkeeping.
pub struct JobQueue {
    store: QueueStore,
    config: QueueConfig,
}

impl JobQueue {
    /// Construct a queue against the given store, honoring `config`'s
    /// admission caps.
    pub fn new(store: QueueStore, config: QueueConfig) -> Self {
        Self { store, config }
    }

    /// Admit a new job, enforcing per-user and system-wide caps. Logs a
    /// warning once the system's non-terminal count crosses
    /// `warning_threshold`, but only rejects at `system_queue_limit`.
    pub async fn enqueue(&self, job: Job) -> QueueResult<String> {
        let user_count = self.store.count_non_terminal_for_user(&job.user_id).await?;
        if user_count >= self.config.max_jobs_per_user {
            return Err(QueueError::UserLimitReached(job.user_id));
        }

        let system_count = self.store.count_non_terminal().await?;
        if system_count >= self.config.system_queue_limit {
            return Err(QueueError::SystemLimitReached);
        }
        if system_count >= self.config.warning_threshold {
            warn!(
                event = "queue_warning_threshold_crossed",
                system_count,
                threshold = self.config.warning_threshold
            );
        }

        let job_id = job.job_id.clone();
        self.store.put(&job).await?;
        self.store.push_pending(&job_id).await?;
        Ok(job_id)
    }

    /// Claim the next ready job, transitioning it to `Processing`.
    pub async fn claim_next(&self) -> QueueResult<Option<Job>> {
        let Some(job_id) = self.store.pop_ready_pending().await? else {
            return Ok(None);
        };
        let Some(mut job) = self.store.get(&job_id).await? else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        self.store.put(&job).await?;
        Ok(Some(job))
    }

    /// Look up a job's current snapshot.
    pub async fn get(&self, job_id: &str) -> QueueResult<Option<Job>> {
        Ok(self.store.get(job_id).await?)
    }

    /// Update a job's progress in place.
    pub async fn update_progress(&self, job_id: &str, progress: u8) -> QueueResult<()> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        job.progress = progress;
        self.store.put(&job).await?;
        Ok(())
    }

    /// Mark a job completed with its result, terminal.
    pub async fn complete(&self, job_id: &str, result: crate::model::GenerationResult) -> QueueResult<()> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(QueueError::AlreadyTerminal(job_id.to_string()));
        }
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.completed_at = Some(Utc::now());
        job.result = Some(result);
        self.store.put(&job).await?;
        Ok(())
    }

    /// Record a failure. Requeues with exponential backoff while retries
    /// remain, otherwise moves the job to the dead-letter partition.
    pub async fn fail(
        &self,
        job_id: &str,
        error_message: String,
        retry: &crate::config::RetryConfig,
    ) -> QueueResult<()> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(QueueError::AlreadyTerminal(job_id.to_string()));
        }

        job.retry_count += 1;
        job.error_message = Some(error_message);

        if job.retry_count <= retry.max_retries {
            job.status = JobStatus::Pending;
            self.store.put(&job).await?;
            let delay = retry.delay_for_attempt(job.retry_count);
            self.store.push_pending_delayed(&job.job_id, delay).await?;
        } else {
            job.status = JobStatus::Dead;
            job.completed_at = Some(Utc::now());
            self.store.put(&job).await?;
            self.store.push_dead_letter(&job).await?;
        }

        Ok(())
    }

    /// Mark a job permanently failed (non-retryable), terminal.
    pub async fn fail_permanently(&self, job_id: &str, error_message: String) -> QueueResult<()> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(QueueError::AlreadyTerminal(job_id.to_string()));
        }
        job.status = JobStatus::Failed;
        job.error_message = Some(error_message);
        job.completed_at = Some(Utc::now());
        self.store.put(&job).await?;
        Ok(())
    }
}
