//! Data model shared across the pipeline's components.
//!
//! Field shapes and `Serialize`/`Deserialize` derives follow `QueuedJob` and
//! `JobProgress` in `scheduling::queue` and `CacheEntry<T>` in `database::cache`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Recognized generation options on a `StructuredRequest`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Default)]
pub struct RequestOptions {
    /// Strength of text-prompt guidance, when the provider supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_guidance_scale: Option<f64>,
    /// Whether the provider should omit a background in the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_background: Option<bool>,
    /// Opaque base64 palette reference image, copied bytewise without
    /// trimming or casing by the normalizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette_image: Option<String>,
}

/// Canvas size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Size {
    /// Width, in pixels.
    pub width: u32,
    /// Height, in pixels.
    pub height: u32,
}

/// A structured sprite-generation request before normalization.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StructuredRequest {
    /// Sprite category, e.g. "unit" or "effect".
    pub request_type: String,
    /// Visual style tag.
    pub style: String,
    /// Action/animation the sprite should depict.
    pub action: String,
    /// Short structured description.
    pub description: String,
    /// Free-text prompt supplied alongside the structured fields.
    pub raw: String,
    /// Requested canvas size.
    pub size: Size,
    /// Optional recognized generation knobs.
    pub options: Option<RequestOptions>,
}

/// Opaque, deterministic identifier for a `StructuredRequest`, prefixed `cache:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Build a `CacheKey` from a raw hash string, applying the `cache:` prefix.
    pub fn from_hash(hash: &str) -> Self {
        Self(format!("cache:{hash}"))
    }

    /// Borrow the key as a plain string, for use against a store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation result metadata, minus the frame bytes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultMetadata {
    /// Canvas dimensions of the generated frames.
    pub dimensions: Size,
    /// Number of frames, must equal `frames.len()`.
    pub frame_count: usize,
    /// Wall-clock generation time, in milliseconds.
    pub generation_time_ms: u64,
    /// Whether this result was served from cache.
    pub cache_hit: bool,
    /// The provider's job id, when the result came from a live generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_job_id: Option<String>,
}

/// A completed sprite generation, an ordered sequence of opaque frame blobs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationResult {
    /// The job that produced this result.
    pub job_id: String,
    /// Ordered frame byte blobs.
    pub frames: Vec<Vec<u8>>,
    /// Result metadata.
    pub metadata: ResultMetadata,
}

impl GenerationResult {
    /// Construct a result, asserting the frame-count invariant.
    pub fn new(job_id: String, frames: Vec<Vec<u8>>, mut metadata: ResultMetadata) -> Self {
        metadata.frame_count = frames.len();
        Self {
            job_id,
            frames,
            metadata,
        }
    }
}

/// A cached generation result plus bookkeeping fields.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    /// The key this entry is stored under; equals the key used to look it up.
    pub cache_key: CacheKey,
    /// The user whose submission originally produced this entry.
    pub user_id: String,
    /// The original, unmodified request, kept for auditing.
    pub structured_prompt: StructuredRequest,
    /// The cached generation result.
    pub result: GenerationResult,
    /// When this entry was written.
    pub created_at: DateTime<Utc>,
    /// When this entry expires; invariant `expires_at > created_at`.
    pub expires_at: DateTime<Utc>,
    /// Number of cache hits served from this entry.
    pub hits: u64,
    /// Most recent access time; invariant `last_accessed_at >= created_at`.
    pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether this entry has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Work queue job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum JobStatus {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed by a worker and currently executing.
    Processing,
    /// Finished successfully; terminal.
    Completed,
    /// Finished with a non-retryable failure; terminal.
    Failed,
    /// Retries exhausted, moved to the dead-letter partition; terminal.
    Dead,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions expected).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Dead)
    }
}

/// A unit of work tracked by the work queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Job {
    /// Unique job id.
    pub job_id: String,
    /// The submitting user.
    pub user_id: String,
    /// The original structured request.
    pub structured_prompt: StructuredRequest,
    /// The cache key this job's result will be stored under.
    pub cache_key: CacheKey,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Progress, 0-100.
    pub progress: u8,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job entered `Processing`, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of retry attempts so far; monotonically non-decreasing.
    pub retry_count: u32,
    /// Last recorded error message, if any.
    pub error_message: Option<String>,
    /// The completed result, once available.
    pub result: Option<GenerationResult>,
}

impl Job {
    /// Create a new pending job for the given submission.
    pub fn new(
        user_id: String,
        structured_prompt: StructuredRequest,
        cache_key: CacheKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            user_id,
            structured_prompt,
            cache_key,
            status: JobStatus::Pending,
            progress: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            error_message: None,
            result: None,
        }
    }

    /// The effective last-modified time used by the pull status manager:
    /// `completed_at ?? started_at ?? created_at`.
    pub fn effective_modified_at(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }
}

/// One lifecycle milestone, mapped to a coarse progress band by the progress
/// calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    /// Submission is being deduplicated.
    Dedup,
    /// Job is sitting in the work queue.
    Queued,
    /// The external provider is generating frames.
    ExternalGeneration,
    /// The result is being written to cache.
    Caching,
    /// The job has finished.
    Completed,
}

/// One sample handed to the progress calculator.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProgressSnapshot {
    /// Lifecycle stage this sample was observed in.
    pub stage: Stage,
    /// Raw progress reported by the provider, 0-100 (meaningful only in
    /// `ExternalGeneration`).
    pub provider_progress: u8,
    /// When this sample was observed.
    pub observed_at: DateTime<Utc>,
}

/// A registered push (server-to-client) session.
pub struct PushSession<S> {
    /// Unique session id.
    pub session_id: String,
    /// The user this session belongs to.
    pub user_id: String,
    /// The write-only sink messages are framed onto.
    pub sink: S,
    /// When this session was registered.
    pub created_at: DateTime<Utc>,
}

/// A cached pull-status snapshot plus its rate-limit/ETag bookkeeping.
#[derive(Debug, Clone)]
pub struct StatusCacheEntry {
    /// The cached job snapshot (`None` means "job not found").
    pub job_snapshot: Option<Job>,
    /// When this entry was cached.
    pub observed_at: DateTime<Utc>,
    /// ETag computed from the snapshot's identity fields.
    pub etag: String,
}

/// Metadata map attached to a queued job for ambient bookkeeping (mirrors
/// `QueuedJob::metadata` in the teacher's scheduling queue).
pub type JobMetadata = HashMap<String, String>;
