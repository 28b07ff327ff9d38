//! # spritegen-pipeline
//!
//! An asynchronous sprite-generation job pipeline for a multiplayer tactical
//! game. Accepts structured requests, deduplicates and caches aggressively,
//! farms generation out to an external image-generation provider, and keeps
//! clients informed via push and pull status channels.
//!
//! ## Architecture
//!
//! - `model`: shared data types (`StructuredRequest`, `Job`, `CacheEntry`, ...)
//! - `normalize`: deterministic request canonicalization (C1)
//! - `dedup`: atomic duplicate-submission suppression (C2)
//! - `cache`: two-tier read-through/write-through cache (C3)
//! - `queue`: durable work queue, admission control, worker pool (C4)
//! - `progress`: monotonic progress calculation (C5)
//! - `push`: server-to-client live progress channel (C6)
//! - `pull`: rate-limited, cached status polling fallback (C7)
//! - `integrator`: provider poll loop driving C5/C6/C4 (C8)
//! - `processor`: per-job lifecycle orchestration (C9)
//! - `retry`: error classification and retry policy (C10)
//! - `provider`: external image-generation provider client (C11)
//! - `logging`: structured, redacted, truncated log records (C12)
//! - `config`: crate-wide configuration
//! - `error`: crate-wide error types
//! - `metrics`: counters/gauges for queue depth, cache hit rate, retries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod integrator;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod processor;
pub mod progress;
pub mod provider;
pub mod pull;
pub mod push;
pub mod queue;
pub mod retry;

use cache::TwoTierCache;
use config::PipelineConfig;
use dedup::DedupGate;
use error::{PipelineError, PipelineResult};
use integrator::ProgressIntegrator;
use metrics::MetricsRegistry;
use model::{CacheKey, GenerationResult, Job, StructuredRequest};
use processor::JobProcessor;
use provider::ProviderClient;
use pull::{JobLookup, PullError, PullResponse, PullStatusManager};
use push::{PushChannelManager, PushSink};
use queue::worker::{JobExecutor, WorkerPool};
use queue::JobQueue;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Re-export version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

fn cache_key_for(request: &StructuredRequest) -> CacheKey {
    let bytes = normalize::normalize(request);
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    CacheKey::from_hash(&hex::encode(hasher.finalize()))
}

/// Why a submission was rejected by admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The submitting user has reached `max_jobs_per_user` non-terminal jobs.
    UserLimit,
    /// The system has reached `system_queue_limit` non-terminal jobs.
    SystemLimit,
}

impl RejectionReason {
    /// The wire-level reason string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::UserLimit => "user_limit",
            RejectionReason::SystemLimit => "system_limit",
        }
    }
}

/// The outcome of a submission: either an immediate cache hit, a suppressed
/// duplicate, a freshly admitted job, or an admission-control rejection.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// The result was already cached; no job was created.
    CacheHit(GenerationResult),
    /// An identical request is already in flight; this submission was
    /// suppressed in favor of the existing job.
    Duplicate {
        /// The job id the caller should track instead.
        existing_job_id: String,
    },
    /// A new job was admitted to the work queue.
    Admitted {
        /// The newly created job's id.
        job_id: String,
    },
    /// Admission control rejected the submission; no job was created.
    Rejected {
        /// Why the submission was rejected.
        reason: RejectionReason,
    },
}

struct QueueJobLookup(Arc<JobQueue>);

#[async_trait::async_trait]
impl JobLookup for QueueJobLookup {
    async fn lookup(&self, job_id: &str) -> Result<Option<Job>, PullError> {
        self.0
            .get(job_id)
            .await
            .map_err(|err| PullError::Store(err.to_string()))
    }
}

/// Wires C1–C12 together into the steady-state data flow described in the
/// component table: `client -> normalize -> dedup -> cache.get -> (hit?
/// return : enqueue) -> worker -> processor -> integrator drives progress ->
/// push/pull report -> provider completes -> cache.set -> push broadcasts
/// completion`.
pub struct Pipeline<P: ProviderClient> {
    config: PipelineConfig,
    dedup: DedupGate,
    cache: Arc<TwoTierCache>,
    queue: Arc<JobQueue>,
    push: Arc<PushChannelManager>,
    pull: Arc<PullStatusManager<QueueJobLookup>>,
    processor: Arc<JobProcessor<P>>,
    worker_pool: Arc<WorkerPool>,
    metrics: Arc<MetricsRegistry>,
}

impl<P: ProviderClient + 'static> Pipeline<P> {
    /// Build a pipeline entirely in-process (in-memory dedup gate and work
    /// queue), suitable for tests and single-process deployments without
    /// Redis.
    pub fn new_in_memory(
        config: PipelineConfig,
        tier_b_path: impl AsRef<std::path::Path>,
        tier_a_capacity: u64,
        provider: Arc<P>,
    ) -> PipelineResult<Self> {
        let dedup = DedupGate::new_in_memory(config.dedup.window_seconds);
        let cache = Arc::new(TwoTierCache::new(&config.cache, tier_a_capacity, tier_b_path)?);
        let queue = Arc::new(JobQueue::new(
            queue::store::QueueStore::new_in_memory(),
            config.queue.clone(),
        ));
        let push = PushChannelManager::new(std::time::Duration::from_millis(config.push.keep_alive_interval_ms));
        let pull = Arc::new(PullStatusManager::new(
            QueueJobLookup(Arc::clone(&queue)),
            config.pull.cache_ttl_ms,
        ));
        let integrator = Arc::new(ProgressIntegrator::new(
            Arc::clone(&push),
            Arc::clone(&queue),
            std::time::Duration::from_millis(config.push.update_interval_ms),
        ));
        let processor = Arc::new(JobProcessor::new(
            provider,
            Arc::clone(&cache),
            integrator,
            Arc::clone(&queue),
            config.retry.clone(),
            config.cache.clone(),
        ));
        let worker_pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            processor.clone(),
            config.queue.concurrency,
        ));

        Ok(Self {
            config,
            dedup,
            cache,
            queue,
            push,
            pull,
            processor,
            worker_pool,
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    /// Run the worker pool until `stop()` is called. Intended to be spawned
    /// as a background task.
    pub async fn run_workers(&self) {
        self.worker_pool.run().await;
    }

    /// Stop the worker pool.
    pub fn stop_workers(&self) {
        self.worker_pool.stop();
    }

    /// Register a push session for `user_id`, returning the new session id.
    pub async fn register_push_session(&self, user_id: String, sink: Arc<dyn PushSink>) -> String {
        self.push.register_session(user_id, sink).await
    }

    /// Poll a job's status through the pull fallback path.
    pub async fn pull_status(
        &self,
        job_id: &str,
        last_modified: Option<chrono::DateTime<chrono::Utc>>,
        requesting_user_id: Option<&str>,
    ) -> Result<PullResponse, PullError> {
        self.pull.get_job_status(job_id, last_modified, requesting_user_id).await
    }

    /// Metrics registry, for exposing counters/gauges to an operator.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Submit a structured request: normalize, check the cache, deduplicate,
    /// and enqueue a job if none of the fast paths apply.
    pub async fn submit(&self, user_id: String, request: StructuredRequest) -> PipelineResult<SubmissionOutcome> {
        let cache_key = cache_key_for(&request);

        let lookup = self.cache.get(cache_key.as_str()).await;
        if lookup.hit {
            self.metrics.record_cache_hit();
            if let Some(entry) = lookup.entry {
                return Ok(SubmissionOutcome::CacheHit(entry.result));
            }
        } else {
            self.metrics.record_cache_miss();
        }

        let job = Job::new(user_id, request, cache_key.clone(), chrono::Utc::now());
        let job_id = job.job_id.clone();

        let dedup_result = self
            .dedup
            .check_duplicate(cache_key.as_str(), &job_id)
            .await
            .map_err(|err| PipelineError::Other(anyhow::anyhow!(err)))?;

        if dedup_result.is_duplicate {
            let existing_job_id = dedup_result.existing_job_id.unwrap_or(job_id);
            return Ok(SubmissionOutcome::Duplicate { existing_job_id });
        }

        match self.queue.enqueue(job).await {
            Ok(job_id) => Ok(SubmissionOutcome::Admitted { job_id }),
            Err(queue::QueueError::UserLimitReached(_)) => Ok(SubmissionOutcome::Rejected {
                reason: RejectionReason::UserLimit,
            }),
            Err(queue::QueueError::SystemLimitReached) => Ok(SubmissionOutcome::Rejected {
                reason: RejectionReason::SystemLimit,
            }),
            Err(other) => Err(PipelineError::Queue(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResultMetadata, Size};
    use crate::provider::{GenerationRequest, PollResult, ProviderError, ProviderFrame, ProviderStatus};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        poll_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ProviderClient for StubProvider {
        async fn submit(&self, _request: GenerationRequest) -> Result<String, ProviderError> {
            Ok("ext-1".to_string())
        }

        async fn poll_status(&self, _external_job_id: &str) -> Result<PollResult, ProviderError> {
            let call = self.poll_calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(PollResult {
                    progress: 50,
                    status: ProviderStatus::Processing,
                    frames: None,
                })
            } else {
                Ok(PollResult {
                    progress: 100,
                    status: ProviderStatus::Completed,
                    frames: Some(vec![ProviderFrame {
                        direction: "north".to_string(),
                        base64: STANDARD.encode([9u8, 9, 9]),
                    }]),
                })
            }
        }
    }

    fn sample_request() -> StructuredRequest {
        StructuredRequest {
            request_type: "unit".to_string(),
            style: "pixel".to_string(),
            action: "idle".to_string(),
            description: "a knight".to_string(),
            raw: "a knight standing".to_string(),
            size: Size { width: 32, height: 32 },
            options: None,
        }
    }

    fn temp_pipeline() -> Pipeline<StubProvider> {
        let config = PipelineConfig {
            push: config::PushConfig {
                update_interval_ms: 5,
                keep_alive_interval_ms: 3_600_000,
            },
            ..PipelineConfig::default()
        };
        let dir = std::env::temp_dir().join(format!("spritegen-pipeline-{}", uuid::Uuid::new_v4()));
        let provider = Arc::new(StubProvider { poll_calls: AtomicUsize::new(0) });
        Pipeline::new_in_memory(config, dir, 100, provider).unwrap()
    }

    #[tokio::test]
    async fn s2_second_identical_submission_is_suppressed_as_duplicate() {
        let pipeline = temp_pipeline();
        let first = pipeline
            .submit("user-1".to_string(), sample_request())
            .await
            .unwrap();
        let first_job_id = match first {
            SubmissionOutcome::Admitted { job_id } => job_id,
            other => panic!("expected Admitted, got {other:?}"),
        };

        let second = pipeline
            .submit("user-1".to_string(), sample_request())
            .await
            .unwrap();
        match second {
            SubmissionOutcome::Duplicate { existing_job_id } => {
                assert_eq!(existing_job_id, first_job_id);
            }
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s1_cache_hit_short_circuits_without_enqueueing() {
        let pipeline = temp_pipeline();
        let cache_key = cache_key_for(&sample_request());
        let now = chrono::Utc::now();
        let entry = model::CacheEntry {
            cache_key: cache_key.clone(),
            user_id: "user-1".to_string(),
            structured_prompt: sample_request(),
            result: GenerationResult::new(
                "precomputed".to_string(),
                vec![vec![1, 2, 3]],
                ResultMetadata {
                    dimensions: Size { width: 32, height: 32 },
                    frame_count: 1,
                    generation_time_ms: 5,
                    cache_hit: true,
                    external_job_id: None,
                },
            ),
            created_at: now,
            expires_at: now + chrono::Duration::days(1),
            hits: 0,
            last_accessed_at: now,
        };
        pipeline.cache.set(cache_key.as_str(), &entry).await;

        let outcome = pipeline
            .submit("user-1".to_string(), sample_request())
            .await
            .unwrap();
        match outcome {
            SubmissionOutcome::CacheHit(result) => assert_eq!(result.job_id, "precomputed"),
            other => panic!("expected CacheHit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_rejects_once_per_user_limit_is_reached() {
        let config = PipelineConfig {
            queue: config::QueueConfig {
                max_jobs_per_user: 1,
                ..config::QueueConfig::default()
            },
            ..PipelineConfig::default()
        };
        let dir = std::env::temp_dir().join(format!("spritegen-pipeline-{}", uuid::Uuid::new_v4()));
        let provider = Arc::new(StubProvider { poll_calls: AtomicUsize::new(0) });
        let pipeline = Pipeline::new_in_memory(config, dir, 100, provider).unwrap();

        let mut first_request = sample_request();
        first_request.description = "first request".to_string();
        pipeline
            .submit("user-1".to_string(), first_request)
            .await
            .unwrap();

        let mut second_request = sample_request();
        second_request.description = "second, distinct request".to_string();
        let outcome = pipeline
            .submit("user-1".to_string(), second_request)
            .await
            .unwrap();
        match outcome {
            SubmissionOutcome::Rejected { reason } => assert_eq!(reason, RejectionReason::UserLimit),
            other => panic!("expected Rejected(UserLimit), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_rejects_once_system_limit_is_reached() {
        let config = PipelineConfig {
            queue: config::QueueConfig {
                max_jobs_per_user: 100,
                system_queue_limit: 1,
                warning_threshold: 0,
                ..config::QueueConfig::default()
            },
            ..PipelineConfig::default()
        };
        let dir = std::env::temp_dir().join(format!("spritegen-pipeline-{}", uuid::Uuid::new_v4()));
        let provider = Arc::new(StubProvider { poll_calls: AtomicUsize::new(0) });
        let pipeline = Pipeline::new_in_memory(config, dir, 100, provider).unwrap();

        let mut first_request = sample_request();
        first_request.description = "first request".to_string();
        pipeline
            .submit("user-1".to_string(), first_request)
            .await
            .unwrap();

        let mut second_request = sample_request();
        second_request.description = "second, distinct request".to_string();
        let outcome = pipeline
            .submit("user-2".to_string(), second_request)
            .await
            .unwrap();
        match outcome {
            SubmissionOutcome::Rejected { reason } => assert_eq!(reason, RejectionReason::SystemLimit),
            other => panic!("expected Rejected(SystemLimit), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn end_to_end_submission_runs_to_completion() {
        let pipeline = temp_pipeline();
        let outcome = pipeline
            .submit("user-1".to_string(), sample_request())
            .await
            .unwrap();
        let job_id = match outcome {
            SubmissionOutcome::Admitted { job_id } => job_id,
            other => panic!("expected Admitted, got {other:?}"),
        };

        let claimed = pipeline.queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.job_id, job_id);
        pipeline.processor.execute(claimed).await;

        let finished = pipeline.queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(finished.status, model::JobStatus::Completed);
    }
}
