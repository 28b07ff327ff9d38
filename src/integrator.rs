//! C8 — Progress Integrator.
//!
//! Drives a per-job poll loop against the external provider, feeding the
//! progress calculator, broadcasting updates, and persisting progress on the
//! work queue until the job reaches a terminal provider state. Grounded in
//! the `tokio::time::interval`-driven poll loop of
//! `scheduling::worker::Worker::heartbeat_loop` and the timeout-wrapped
//! poll-and-retry shape of `enterprise::workflow::engine::WorkflowEngine::execute_step`.

use crate::model::{Job, JobStatus, ResultMetadata, Stage};
use crate::progress::ProgressCalculator;
use crate::provider::{PollResult, ProviderError, ProviderStatus};
use crate::push::{ProgressRecord, PushChannelManager};
use crate::queue::JobQueue;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One provider poll attempt, abstracted so the integrator doesn't depend on
/// a concrete `ProviderClient` + job id pairing.
#[async_trait::async_trait]
pub trait PollFn: Send + Sync {
    /// Poll the provider once for this job's current state.
    async fn poll(&self) -> Result<PollResult, ProviderError>;
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Dead => "dead",
    }
}

/// Polls the provider on a fixed tick, driving C5/C6/C4 until the job
/// reaches a terminal provider state.
pub struct ProgressIntegrator {
    push: Arc<PushChannelManager>,
    queue: Arc<JobQueue>,
    interval: Duration,
}

impl ProgressIntegrator {
    /// Construct an integrator broadcasting via `push` and persisting
    /// progress via `queue`, polling every `interval`.
    pub fn new(push: Arc<PushChannelManager>, queue: Arc<JobQueue>, interval: Duration) -> Self {
        Self { push, queue, interval }
    }

    /// Poll `poller` on the configured tick until the provider reports a
    /// terminal status, driving the progress calculator and broadcasting
    /// updates each tick. Returns the final poll result.
    pub async fn track_progress(
        &self,
        job_id: &str,
        user_id: &str,
        poller: &dyn PollFn,
        calculator: &mut ProgressCalculator,
    ) -> PollResult {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; skip it
        let mut last_progress: u8 = 0;

        loop {
            ticker.tick().await;

            let outcome = match poller.poll().await {
                Ok(result) => {
                    last_progress = result.progress;
                    result
                }
                Err(err) => {
                    warn!(event = "poll_error", job_id, error = %err);
                    PollResult {
                        progress: last_progress,
                        status: ProviderStatus::Processing,
                        frames: None,
                    }
                }
            };

            let progress = calculator.calculate(Stage::ExternalGeneration, outcome.progress);
            let estimated_time_remaining_ms = calculator.estimate_remaining_ms(progress);

            self.push
                .broadcast(
                    user_id,
                    &ProgressRecord {
                        job_id: job_id.to_string(),
                        user_id: user_id.to_string(),
                        status: "processing".to_string(),
                        progress,
                        message: "Generating sprite...".to_string(),
                        estimated_time_remaining_ms,
                        result: None,
                        timestamp: Utc::now().timestamp_millis(),
                    },
                )
                .await;

            if let Err(err) = self.queue.update_progress(job_id, progress).await {
                warn!(event = "progress_persist_failed", job_id, error = %err);
            }

            if matches!(outcome.status, ProviderStatus::Completed | ProviderStatus::Failed) {
                return outcome;
            }
        }
    }

    /// Broadcast a coarse state transition (e.g. `pending -> processing`).
    pub async fn broadcast_state_change(&self, job: &Job, from: JobStatus, to: JobStatus) {
        let progress = match to {
            JobStatus::Processing => 10,
            JobStatus::Completed => 100,
            _ => job.progress,
        };
        let message = format!(
            "Job transitioned from {} to {}",
            status_label(from),
            status_label(to)
        );
        self.push
            .broadcast(
                &job.user_id,
                &ProgressRecord {
                    job_id: job.job_id.clone(),
                    user_id: job.user_id.clone(),
                    status: status_label(to).to_string(),
                    progress,
                    message,
                    estimated_time_remaining_ms: None,
                    result: None,
                    timestamp: Utc::now().timestamp_millis(),
                },
            )
            .await;
    }

    /// Broadcast the final completion record. Never includes frame bytes.
    pub async fn broadcast_completion(&self, job: &Job, metadata: &ResultMetadata) {
        self.push
            .broadcast(
                &job.user_id,
                &ProgressRecord {
                    job_id: job.job_id.clone(),
                    user_id: job.user_id.clone(),
                    status: "completed".to_string(),
                    progress: 100,
                    message: "Sprite generation complete".to_string(),
                    estimated_time_remaining_ms: Some(0),
                    result: Some(metadata.clone()),
                    timestamp: Utc::now().timestamp_millis(),
                },
            )
            .await;
    }
}
