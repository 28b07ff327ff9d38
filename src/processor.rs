//! C9 — Job Processor.
//!
//! Orchestrates one job's full lifecycle: validate, submit, poll to
//! terminal, decode, write-through cache, broadcast completion. Grounded in
//! `enterprise::workflow::engine::WorkflowEngine::execute_workflow`'s
//! per-step orchestration (validate -> execute -> classify failure ->
//! persist state), narrowed to the fixed nine-step lifecycle the
//! specification defines.

use crate::cache::TwoTierCache;
use crate::config::{CacheConfig, RetryConfig};
use crate::integrator::ProgressIntegrator;
use crate::model::{CacheEntry, GenerationResult, Job, JobStatus, ResultMetadata};
use crate::provider::{self, PollResult, ProviderClient, ProviderError, ProviderStatus};
use crate::queue::worker::JobExecutor;
use crate::queue::JobQueue;
use crate::retry::{self, RawError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

struct ProviderPoller<'a, P: ProviderClient> {
    provider: &'a P,
    external_job_id: String,
}

#[async_trait::async_trait]
impl<'a, P: ProviderClient> crate::integrator::PollFn for ProviderPoller<'a, P> {
    async fn poll(&self) -> Result<PollResult, ProviderError> {
        self.provider.poll_status(&self.external_job_id).await
    }
}

fn validate(job: &Job) -> Result<(), String> {
    if job.job_id.trim().is_empty() {
        return Err("job is missing jobId".to_string());
    }
    if job.user_id.trim().is_empty() {
        return Err("job is missing userId".to_string());
    }
    if job.cache_key.as_str().trim().is_empty() {
        return Err("job is missing cacheKey".to_string());
    }
    if job.structured_prompt.description.trim().is_empty() && job.structured_prompt.raw.trim().is_empty() {
        return Err("job is missing structuredPrompt content".to_string());
    }
    Ok(())
}

/// Executes the per-job lifecycle against a concrete provider client.
pub struct JobProcessor<P: ProviderClient> {
    provider: Arc<P>,
    cache: Arc<TwoTierCache>,
    integrator: Arc<ProgressIntegrator>,
    queue: Arc<JobQueue>,
    retry_config: RetryConfig,
    cache_config: CacheConfig,
}

impl<P: ProviderClient> JobProcessor<P> {
    /// Construct a processor wiring C3, C4, C8, and C11 together.
    pub fn new(
        provider: Arc<P>,
        cache: Arc<TwoTierCache>,
        integrator: Arc<ProgressIntegrator>,
        queue: Arc<JobQueue>,
        retry_config: RetryConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            integrator,
            queue,
            retry_config,
            cache_config,
        }
    }

    async fn handle_failure(&self, job: &Job, raw: RawError, stage: &'static str) {
        let classification = retry::classify(&raw);
        error!(
            event = "processor_error",
            job_id = %job.job_id,
            stage,
            error_type = ?classification.error_type,
            retryable = classification.retryable,
            technical_details = %classification.technical_details,
        );

        let result = if classification.retryable {
            self.queue
                .fail(&job.job_id, classification.technical_details.clone(), &self.retry_config)
                .await
        } else {
            self.queue
                .fail_permanently(&job.job_id, classification.technical_details.clone())
                .await
        };

        if let Err(err) = result {
            error!(event = "queue_fail_update_failed", job_id = %job.job_id, error = %err);
        }
    }

    async fn run(&self, job: Job) -> Result<(), ()> {
        if let Err(reason) = validate(&job) {
            let _ = self.queue.fail_permanently(&job.job_id, reason).await;
            return Err(());
        }

        self.integrator
            .broadcast_state_change(&job, JobStatus::Pending, JobStatus::Processing)
            .await;

        let start = Utc::now();
        let request = provider::build_request(
            &job.structured_prompt.description,
            job.structured_prompt.size,
            job.structured_prompt.options.as_ref().and_then(|o| o.text_guidance_scale),
            job.structured_prompt.options.as_ref().and_then(|o| o.palette_image.clone()),
        );

        let external_job_id = match self.provider.submit(request).await {
            Ok(id) => id,
            Err(err) => {
                self.handle_failure(&job, RawError::Network(err.to_string()), "submission").await;
                return Err(());
            }
        };

        if let Err(err) = self.queue.update_progress(&job.job_id, 10).await {
            warn!(event = "progress_persist_failed", job_id = %job.job_id, error = %err);
        }

        let mut calculator = crate::progress::ProgressCalculator::new();
        let poller = ProviderPoller {
            provider: self.provider.as_ref(),
            external_job_id: external_job_id.clone(),
        };
        let outcome = self
            .integrator
            .track_progress(&job.job_id, &job.user_id, &poller, &mut calculator)
            .await;

        if let Err(err) = self.queue.update_progress(&job.job_id, 90).await {
            warn!(event = "progress_persist_failed", job_id = %job.job_id, error = %err);
        }

        if outcome.status == ProviderStatus::Failed {
            self.handle_failure(
                &job,
                RawError::Unknown("provider reported a failed generation".to_string()),
                "polling",
            )
            .await;
            return Err(());
        }

        let wire_frames = match outcome.frames {
            Some(frames) => frames,
            None => {
                self.handle_failure(
                    &job,
                    RawError::ValidationFailed("provider completed without frames".to_string()),
                    "decode",
                )
                .await;
                return Err(());
            }
        };

        let frames = match provider::decode_frames(&wire_frames) {
            Ok(frames) => frames,
            Err(err) => {
                self.handle_failure(&job, RawError::ValidationFailed(err.to_string()), "decode").await;
                return Err(());
            }
        };

        let generation_time_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;
        let metadata = ResultMetadata {
            dimensions: job.structured_prompt.size,
            frame_count: frames.len(),
            generation_time_ms,
            cache_hit: false,
            external_job_id: Some(external_job_id),
        };
        let result = GenerationResult::new(job.job_id.clone(), frames, metadata.clone());

        let now = Utc::now();
        let entry = CacheEntry {
            cache_key: job.cache_key.clone(),
            user_id: job.user_id.clone(),
            structured_prompt: job.structured_prompt.clone(),
            result: result.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::days(self.cache_config.ttl_days as i64),
            hits: 0,
            last_accessed_at: now,
        };
        // Cache write failures are contained: logged, job still succeeds.
        self.cache.set(job.cache_key.as_str(), &entry).await;

        if let Err(err) = self.queue.complete(&job.job_id, result).await {
            error!(event = "queue_complete_failed", job_id = %job.job_id, error = %err);
            return Err(());
        }

        if let Ok(Some(completed)) = self.queue.get(&job.job_id).await {
            self.integrator.broadcast_completion(&completed, &metadata).await;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<P: ProviderClient> JobExecutor for JobProcessor<P> {
    async fn execute(&self, job: Job) {
        let _ = self.run(job).await;
    }
}
