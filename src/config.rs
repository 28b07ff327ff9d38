//! Crate-wide configuration.
//!
//! One nested struct per component, defaults matching the configuration table in
//! the specification. Follows the `EnterpriseConfig::default()` /
//! `from_file`/`save` shape from the teacher's enterprise module.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Work queue admission and concurrency configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Worker pool size (number of jobs processed concurrently).
    pub concurrency: usize,
    /// Per-user cap on non-terminal jobs.
    pub max_jobs_per_user: usize,
    /// Global cap on non-terminal jobs.
    pub system_queue_limit: usize,
    /// Non-terminal job count above which a warning metric fires.
    pub warning_threshold: usize,
    /// Redis key namespace for this queue's pending/dead-letter/job keys.
    /// Must be non-empty.
    pub queue_name: String,
    /// Redis logical database index. Must be in `[0, 15]`.
    pub db_index: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_jobs_per_user: 5,
            system_queue_limit: 500,
            warning_threshold: 400,
            queue_name: "spritegen".to_string(),
            db_index: 0,
        }
    }
}

/// Two-tier cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Lifetime of a cache entry, in days.
    pub ttl_days: u32,
    /// Durable-tier document size above which a warning is logged, in bytes.
    pub size_warning_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            size_warning_bytes: 800 * 1024,
        }
    }
}

/// Retry/backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum retries per job before moving to the dead-letter partition.
    pub max_retries: u32,
    /// Initial backoff delay, in milliseconds.
    pub backoff_delay_ms: u64,
    /// Multiplier applied to the backoff delay on each successive attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Compute the backoff delay for the given 1-indexed attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.backoff_delay_ms as f64 * factor).round() as u64;
        std::time::Duration::from_millis(millis)
    }
}

/// Push channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushConfig {
    /// Progress tracker tick interval, in milliseconds.
    pub update_interval_ms: u64,
    /// Idle keep-alive heartbeat interval, in milliseconds.
    pub keep_alive_interval_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 2500,
            keep_alive_interval_ms: 30_000,
        }
    }
}

/// Deduplication window configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupConfig {
    /// Dedup window, in seconds.
    pub window_seconds: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { window_seconds: 10 }
    }
}

/// Pull status manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullConfig {
    /// Snapshot cache TTL and rate-limit window, in milliseconds.
    pub cache_ttl_ms: u64,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self { cache_ttl_ms: 2000 }
    }
}

/// Aggregate pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PipelineConfig {
    /// Work queue settings.
    pub queue: QueueConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Retry/backoff settings.
    pub retry: RetryConfig,
    /// Push channel settings.
    pub push: PushConfig,
    /// Dedup gate settings.
    pub dedup: DedupConfig,
    /// Pull status manager settings.
    pub pull: PullConfig,
}

impl PipelineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
