//! Tier A — fast volatile cache, backed by an in-process `moka` cache.
//!
//! Generalized from `database::cache::CacheManager`'s L1 (moka) tier. The
//! cache's own TTL clock is used only as an outer safety valve (capacity and
//! a generous time-to-live so unbounded growth is impossible); the
//! authoritative `expires_at` lives in the stored `CacheEntry` itself, so
//! metadata updates (hit count, last access) never need to "touch" moka's
//! clock to preserve the remaining TTL.

use super::codec;
use crate::model::CacheEntry;
use chrono::Utc;
use moka::future::Cache;
use tracing::warn;

/// In-memory, low-latency cache tier. Cheap to clone: the underlying `moka`
/// cache is itself a handle to shared state.
#[derive(Clone)]
pub struct TierA {
    store: Cache<String, Vec<u8>>,
}

impl TierA {
    /// Construct Tier A with the given capacity (entry count) and an outer
    /// time-to-live bound, in days.
    pub fn new(capacity: u64, ttl_days: u32) -> Self {
        let store = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(std::time::Duration::from_secs(
                u64::from(ttl_days) * 24 * 3600,
            ))
            .build();
        Self { store }
    }

    /// Look up a key. A malformed stored record is treated as a miss and
    /// logged, per the specification.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let raw = self.store.get(key).await?;
        match codec::decode(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(event = "cache_invalid_record", tier = "a", key, error = %err);
                None
            }
        }
    }

    /// Write an entry. Returns `Err` only on encode failure (never on a
    /// store-level error, since the in-process cache cannot fail to write).
    pub async fn set(&self, key: String, entry: &CacheEntry) -> Result<(), codec::CodecError> {
        let raw = codec::encode(entry)?;
        self.store.insert(key, raw).await;
        Ok(())
    }

    /// Best-effort, non-blocking bump of `hits`/`last_accessed_at` on a hit.
    /// The entry's own `expires_at` is preserved untouched.
    pub fn touch(&self, key: String, mut entry: CacheEntry) {
        let store = self.store.clone();
        tokio::spawn(async move {
            entry.hits += 1;
            entry.last_accessed_at = Utc::now();
            if let Ok(raw) = codec::encode(&entry) {
                store.insert(key, raw).await;
            }
        });
    }

    /// Remove a key.
    pub async fn remove(&self, key: &str) {
        self.store.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheKey, GenerationResult, ResultMetadata, Size, StructuredRequest};

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
                vec![vec![1, 2, 3]],
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

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let tier = TierA::new(100, 30);
        let entry = sample("cache:abc");
        tier.set("cache:abc".to_string(), &entry).await.unwrap();
        let fetched = tier.get("cache:abc").await.unwrap();
        assert_eq!(fetched.result.frames, entry.result.frames);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let tier = TierA::new(100, 30);
        assert!(tier.get("cache:missing").await.is_none());
    }

    #[tokio::test]
    async fn remove_clears_the_entry() {
        let tier = TierA::new(100, 30);
        let entry = sample("cache:abc");
        tier.set("cache:abc".to_string(), &entry).await.unwrap();
        tier.remove("cache:abc").await;
        assert!(tier.get("cache:abc").await.is_none());
    }
}
