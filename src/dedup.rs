//! C2 — Dedup Gate.
//!
//! Atomically suppresses duplicate submissions within a short window using
//! Redis `SET NX EX`, generalized from the dedup-key bookkeeping in
//! `scheduling::queue::JobQueue::enqueue` (which used an in-process map) to a
//! real atomic primitive, since restart-durable atomicity requires it.

use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Dedup gate errors.
#[derive(Error, Debug)]
pub enum DedupError {
    /// The backing store could not be reached or returned an error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupResult {
    /// Whether this submission is a duplicate of an in-flight one.
    pub is_duplicate: bool,
    /// The job id this submission is a duplicate of, when `is_duplicate`.
    pub existing_job_id: Option<String>,
}

enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<HashMap<String, (String, Instant)>>>),
}

/// Atomic suppression of duplicate submissions, backed by Redis in
/// production or an in-process map for tests/single-process deployments.
pub struct DedupGate {
    backend: Backend,
    window_seconds: u64,
}

impl DedupGate {
    /// Construct a dedup gate against an existing Redis connection manager.
    pub fn new(redis: ConnectionManager, window_seconds: u64) -> Self {
        Self {
            backend: Backend::Redis(redis),
            window_seconds,
        }
    }

    /// In-memory dedup gate, for tests and single-process deployments
    /// without Redis.
    pub fn new_in_memory(window_seconds: u64) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
            window_seconds,
        }
    }

    fn dedup_key(cache_key: &str) -> String {
        format!("dedup:{cache_key}")
    }

    async fn set_nx(&self, key: &str, job_id: &str) -> Result<bool, DedupError> {
        match &self.backend {
            Backend::Redis(redis) => {
                let window = self.window_seconds;
                let ok: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(job_id)
                    .arg("NX")
                    .arg("EX")
                    .arg(window)
                    .query_async(&mut redis.clone())
                    .await?;
                Ok(ok.is_some())
            }
            Backend::Memory(map) => {
                let mut map = map.lock().await;
                let expired = map
                    .get(key)
                    .map(|(_, set_at)| set_at.elapsed() > Duration::from_secs(self.window_seconds))
                    .unwrap_or(true);
                if expired {
                    map.insert(key.to_string(), (job_id.to_string(), Instant::now()));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DedupError> {
        match &self.backend {
            Backend::Redis(redis) => {
                let value: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut redis.clone())
                    .await?;
                Ok(value)
            }
            Backend::Memory(map) => {
                let map = map.lock().await;
                Ok(map.get(key).and_then(|(job_id, set_at)| {
                    if set_at.elapsed() > Duration::from_secs(self.window_seconds) {
                        None
                    } else {
                        Some(job_id.clone())
                    }
                }))
            }
        }
    }

    /// Check whether `cache_key` has an in-flight submission; if not, claim it
    /// for `job_id`. A single race (the existing entry disappears between the
    /// SET-NX and the GET) is retried exactly once.
    pub async fn check_duplicate(
        &self,
        cache_key: &str,
        job_id: &str,
    ) -> Result<DedupResult, DedupError> {
        let key = Self::dedup_key(cache_key);

        if self.set_nx(&key, job_id).await? {
            return Ok(DedupResult {
                is_duplicate: false,
                existing_job_id: None,
            });
        }

        match self.get(&key).await? {
            Some(existing) => Ok(DedupResult {
                is_duplicate: true,
                existing_job_id: Some(existing),
            }),
            None => {
                // Race: entry vanished between SET-NX and GET. Retry once.
                if self.set_nx(&key, job_id).await? {
                    return Ok(DedupResult {
                        is_duplicate: false,
                        existing_job_id: None,
                    });
                }
                match self.get(&key).await? {
                    Some(existing) => Ok(DedupResult {
                        is_duplicate: true,
                        existing_job_id: Some(existing),
                    }),
                    // GET still empty: treat as not a duplicate.
                    None => Ok(DedupResult {
                        is_duplicate: false,
                        existing_job_id: None,
                    }),
                }
            }
        }
    }
}
