//! Tier B — durable cache, backed by an embedded `sled` key-value store.
//!
//! Generalized from `database::cache::CacheManager`'s L2 (sled) tier. Documents
//! above `size_warning_bytes` still get written; only a warning is logged.
//! Expired entries (`expires_at <= now`) are treated as a miss on read, and
//! malformed records are treated as a miss and logged, unified with Tier A's
//! policy per the resolved open question in DESIGN.md.

use super::codec;
use crate::model::CacheEntry;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Tier B errors.
#[derive(Error, Debug)]
pub enum TierBError {
    /// The embedded store returned an error.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// The entry could not be encoded for storage.
    #[error("encode error: {0}")]
    Encode(#[from] codec::CodecError),
}

/// Durable, disk-backed cache tier.
pub struct TierB {
    db: Arc<sled::Db>,
    size_warning_bytes: usize,
}

impl TierB {
    /// Open (or create) a sled database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>, size_warning_bytes: usize) -> Result<Self, TierBError> {
        let db = sled::open(path)?;
        Ok(Self {
            db: Arc::new(db),
            size_warning_bytes,
        })
    }

    /// Look up a key. Expired or malformed entries are treated as a miss.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, TierBError> {
        let Some(raw) = self.db.get(key)? else {
            return Ok(None);
        };
        match codec::decode(&raw) {
            Ok(entry) => {
                if entry.is_expired(Utc::now()) {
                    return Ok(None);
                }
                Ok(Some(entry))
            }
            Err(err) => {
                warn!(event = "cache_invalid_record", tier = "b", key, error = %err);
                Ok(None)
            }
        }
    }

    /// Write an entry. If the encoded document exceeds the warning
    /// threshold, log a single warning but still perform the write.
    pub fn set(&self, key: &str, entry: &CacheEntry) -> Result<(), TierBError> {
        let raw = codec::encode(entry)?;
        if raw.len() > self.size_warning_bytes {
            warn!(
                event = "cache_document_oversized",
                tier = "b",
                key,
                bytes = raw.len(),
                threshold = self.size_warning_bytes
            );
        }
        self.db.insert(key, raw)?;
        Ok(())
    }

    /// Remove a key.
    pub fn remove(&self, key: &str) -> Result<(), TierBError> {
        self.db.remove(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheKey, GenerationResult, ResultMetadata, Size, StructuredRequest};

    fn sample(key: &str, expires_in: chrono::Duration) -> CacheEntry {
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
                vec![vec![9, 9, 9]],
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
            expires_at: now + expires_in,
            hits: 0,
            last_accessed_at: now,
        }
    }

    fn temp_tier() -> TierB {
        let dir = std::env::temp_dir().join(format!("spritegen-tierb-{}", uuid::Uuid::new_v4()));
        TierB::open(dir, 800 * 1024).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let tier = temp_tier();
        let entry = sample("cache:abc", chrono::Duration::days(30));
        tier.set("cache:abc", &entry).unwrap();
        let fetched = tier.get("cache:abc").unwrap().unwrap();
        assert_eq!(fetched.result.frames, entry.result.frames);
    }

    #[test]
    fn expired_entry_reads_as_miss() {
        let tier = temp_tier();
        let entry = sample("cache:abc", chrono::Duration::seconds(-1));
        tier.set("cache:abc", &entry).unwrap();
        assert!(tier.get("cache:abc").unwrap().is_none());
    }

    #[test]
    fn missing_key_is_none() {
        let tier = temp_tier();
        assert!(tier.get("cache:missing").unwrap().is_none());
    }
}
