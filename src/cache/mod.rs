//! C3 — Two-Tier Cache.
//!
//! Read-through and parallel write-through between Tier A (fast volatile,
//! `moka`) and Tier B (durable, `sled`). Generalized from
//! `database::cache::CacheManager`, whose L1/L2/L3 tier-conditional
//! construction and promotion-on-read logic is narrowed here to the fixed
//! two-tier shape the specification defines, with frames text-safe (base64)
//! encoded so byte blobs survive both tiers exactly.

mod codec;
mod tier_a;
mod tier_b;

pub use codec::CodecError;
pub use tier_a::TierA;
pub use tier_b::TierB;

use crate::config::CacheConfig;
use crate::model::CacheEntry;
use thiserror::Error;
use tracing::warn;

/// Cache errors. `get` never returns an error to the caller (misses and tier
/// errors are logged and folded into a miss); `set` never raises either, per
/// the specification — this type exists for the tier implementations'
/// internal plumbing and is not expected to surface through `TwoTierCache`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Tier B (durable) returned an error.
    #[error("tier b error: {0}")]
    TierB(#[from] tier_b::TierBError),
}

/// Where a cache hit was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Tier A, the fast volatile store.
    TierA,
    /// Tier B, the durable store.
    TierB,
}

/// Outcome of a `get`.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    /// Whether the key was found (in either tier, unexpired).
    pub hit: bool,
    /// The entry, when `hit`.
    pub entry: Option<CacheEntry>,
    /// Which tier served the hit, when `hit`.
    pub source: Option<CacheSource>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self {
            hit: false,
            entry: None,
            source: None,
        }
    }
}

/// Per-tier outcome of a `set`, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Both tiers wrote successfully.
    Complete,
    /// One tier wrote successfully, the other failed.
    Partial,
    /// Both tiers failed.
    Failed,
}

/// The two-tier cache facade consumed by the job processor.
pub struct TwoTierCache {
    tier_a: TierA,
    tier_b: TierB,
}

impl TwoTierCache {
    /// Construct a two-tier cache. `tier_b_path` is the sled database
    /// directory for the durable tier.
    pub fn new(
        config: &CacheConfig,
        tier_a_capacity: u64,
        tier_b_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            tier_a: TierA::new(tier_a_capacity, config.ttl_days),
            tier_b: TierB::open(tier_b_path, config.size_warning_bytes)?,
        })
    }

    /// Read-through lookup: try Tier A, fall back to Tier B with best-effort
    /// re-population of Tier A on a Tier B hit.
    pub async fn get(&self, key: &str) -> CacheLookup {
        if let Some(entry) = self.tier_a.get(key).await {
            // Best-effort, non-blocking hit-count/last-access bump; TTL is
            // preserved since it lives inside the entry, not moka's clock.
            self.tier_a.touch(key.to_string(), entry.clone());
            return CacheLookup {
                hit: true,
                entry: Some(entry),
                source: Some(CacheSource::TierA),
            };
        }

        match self.tier_b.get(key) {
            Ok(Some(entry)) => {
                // Schedule a best-effort repopulate of Tier A on a background
                // task so this read returns without paying Tier A's write
                // latency; failures are swallowed.
                let key_owned = key.to_string();
                let entry_clone = entry.clone();
                let tier_a = self.tier_a.clone();
                tokio::spawn(async move {
                    let _ = tier_a.set(key_owned, &entry_clone).await;
                });
                CacheLookup {
                    hit: true,
                    entry: Some(entry),
                    source: Some(CacheSource::TierB),
                }
            }
            Ok(None) => CacheLookup::miss(),
            Err(err) => {
                warn!(event = "cache_tier_b_error", key, error = %err);
                CacheLookup::miss()
            }
        }
    }

    /// Parallel write-through to both tiers. Never raises; logs per-tier
    /// outcome.
    pub async fn set(&self, key: &str, entry: &CacheEntry) -> WriteOutcome {
        let a = self.tier_a.set(key.to_string(), entry);
        let b_result = self.tier_b.set(key, entry);
        let a_result = a.await;

        let a_ok = a_result.is_ok();
        let b_ok = b_result.is_ok();

        if let Err(err) = &a_result {
            warn!(event = "cache_tier_a_write_failed", key, error = %err);
        }
        if let Err(err) = &b_result {
            warn!(event = "cache_tier_b_write_failed", key, error = %err);
        }

        match (a_ok, b_ok) {
            (true, true) => WriteOutcome::Complete,
            (false, false) => WriteOutcome::Failed,
            _ => WriteOutcome::Partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheKey, GenerationResult, ResultMetadata, Size, StructuredRequest};
    use chrono::Utc;

    fn sample(key: &str) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            cache_key: CacheKey::from_hash(key),
            user_id: "user-1".to_string(),
            structured_prompt: StructuredRequest {
                request_type: "unit".to_string(),
                style: "pixel".to_string(),
                action: "idle".to_string(),
                description: "knight".to_string(),
                raw: "a knight".to_string(),
                size: Size {
                    width: 16,
                    height: 16,
                },
                options: None,
            },
            result: GenerationResult::new(
                "job-1".to_string(),
                vec![vec![7, 7, 7]],
                ResultMetadata {
                    dimensions: Size {
                        width: 16,
                        height: 16,
                    },
                    frame_count: 0,
                    generation_time_ms: 10,
                    cache_hit: false,
                    external_job_id: None,
                },
            ),
            created_at: now,
            expires_at: now + chrono::Duration::days(30),
            hits: 0,
            last_accessed_at: now,
        }
    }

    fn temp_cache() -> TwoTierCache {
        let dir = std::env::temp_dir().join(format!("spritegen-cache-{}", uuid::Uuid::new_v4()));
        TwoTierCache::new(&CacheConfig::default(), 100, dir).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_hits_tier_a() {
        let cache = temp_cache();
        let entry = sample("cache:abc");
        let outcome = cache.set("cache:abc", &entry).await;
        assert_eq!(outcome, WriteOutcome::Complete);

        let lookup = cache.get("cache:abc").await;
        assert!(lookup.hit);
        assert_eq!(lookup.source, Some(CacheSource::TierA));
        assert_eq!(lookup.entry.unwrap().result.frames, entry.result.frames);
    }

    #[tokio::test]
    async fn tier_b_hit_repopulates_tier_a() {
        let cache = temp_cache();
        let entry = sample("cache:abc");
        // Write directly to tier B only, bypassing tier A.
        cache.tier_b.set("cache:abc", &entry).unwrap();

        let first = cache.get("cache:abc").await;
        assert_eq!(first.source, Some(CacheSource::TierB));

        // The repopulate runs on a spawned task, not inline with the read
        // above; give it a turn to land before asserting visibility.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let second = cache.get("cache:abc").await;
        assert_eq!(second.source, Some(CacheSource::TierA));
    }

    #[tokio::test]
    async fn miss_on_both_tiers() {
        let cache = temp_cache();
        let lookup = cache.get("cache:missing").await;
        assert!(!lookup.hit);
    }
}
