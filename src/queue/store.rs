//! Durable persistence for the work queue.
//!
//! Redis-backed: job documents under `job:{id}`, a sorted-set pending queue
//! `queue:pending` scored by enqueue time (so `ZRANGE ... 0 0` pops oldest
//! first), and a dead-letter list `queue:dead` capped at 1000 entries.
//! Connection setup retries up to 3 times, mirroring the teacher's
//! `ConnectionManager` reconnect behavior. Adapted from
//! `scheduling::queue::JobQueue`'s key layout and `move_to_dead_letter`.

use crate::model::Job;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from the queue's backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The Redis connection could not be established after retrying.
    #[error("redis connection failed after retries: {0}")]
    Connection(redis::RedisError),

    /// A Redis command failed.
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored job document failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue name or DB index failed validation before a connection was
    /// attempted.
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),
}

const MAX_DEAD_LETTER: isize = 999;
const CONNECT_ATTEMPTS: u32 = 3;

enum Backend {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<MemoryState>>),
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<String, Job>,
    pending: Vec<(String, std::time::Instant)>,
    dead_letter: Vec<Job>,
}

/// Persistence layer backing the work queue.
pub struct QueueStore {
    backend: Backend,
}

impl QueueStore {
    /// Connect to Redis, retrying the initial connection up to 3 times.
    /// `queue_name` must be non-empty and `db_index` must be in `[0, 15]`;
    /// both are validated before any connection attempt is made.
    pub async fn connect(queue_name: &str, db_index: u8, redis_url: &str) -> Result<Self, StoreError> {
        if queue_name.trim().is_empty() {
            return Err(StoreError::InvalidConfig(
                "queue name must be non-empty".to_string(),
            ));
        }
        if db_index > 15 {
            return Err(StoreError::InvalidConfig(format!(
                "db index must be in [0, 15], got {db_index}"
            )));
        }

        let client = redis::Client::open(redis_url)?;
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            match ConnectionManager::new(client.clone()).await {
                Ok(mut manager) => {
                    redis::cmd("SELECT")
                        .arg(db_index)
                        .query_async(&mut manager)
                        .await?;
                    return Ok(Self {
                        backend: Backend::Redis(manager),
                    });
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < CONNECT_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                    }
                }
            }
        }
        Err(StoreError::Connection(last_err.expect("loop ran at least once")))
    }

    /// In-memory store, for tests and for running without Redis.
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(MemoryState::default()))),
        }
    }

    /// Insert or overwrite a job document.
    pub async fn put(&self, job: &Job) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let data = serde_json::to_string(job)?;
                redis::cmd("SET")
                    .arg(format!("job:{}", job.job_id))
                    .arg(data)
                    .query_async(&mut conn.clone())
                    .await?;
                Ok(())
            }
            Backend::Memory(state) => {
                state.lock().await.jobs.insert(job.job_id.clone(), job.clone());
                Ok(())
            }
        }
    }

    /// Fetch a job document by id.
    pub async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let data: Option<String> = redis::cmd("GET")
                    .arg(format!("job:{job_id}"))
                    .query_async(&mut conn.clone())
                    .await?;
                Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
            }
            Backend::Memory(state) => Ok(state.lock().await.jobs.get(job_id).cloned()),
        }
    }

    /// Push a job id onto the pending queue, ready immediately.
    pub async fn push_pending(&self, job_id: &str) -> Result<(), StoreError> {
        self.push_pending_delayed(job_id, Duration::ZERO).await
    }

    /// Push a job id onto the pending queue, ready after `delay`.
    pub async fn push_pending_delayed(&self, job_id: &str, delay: Duration) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let ready_at = chrono::Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                redis::cmd("ZADD")
                    .arg("queue:pending")
                    .arg(ready_at.timestamp_millis())
                    .arg(job_id)
                    .query_async(&mut conn.clone())
                    .await?;
                Ok(())
            }
            Backend::Memory(state) => {
                let ready_at = std::time::Instant::now() + delay;
                state.lock().await.pending.push((job_id.to_string(), ready_at));
                Ok(())
            }
        }
    }

    /// Pop the oldest ready (non-delayed, or delay elapsed) pending job id.
    pub async fn pop_ready_pending(&self) -> Result<Option<String>, StoreError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let now = chrono::Utc::now().timestamp_millis();
                let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                    .arg("queue:pending")
                    .arg("-inf")
                    .arg(now)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(1)
                    .query_async(&mut conn.clone())
                    .await?;
                let Some(job_id) = ids.into_iter().next() else {
                    return Ok(None);
                };
                redis::cmd("ZREM")
                    .arg("queue:pending")
                    .arg(&job_id)
                    .query_async(&mut conn.clone())
                    .await?;
                Ok(Some(job_id))
            }
            Backend::Memory(state) => {
                let mut state = state.lock().await;
                let now = std::time::Instant::now();
                let position = state
                    .pending
                    .iter()
                    .position(|(_, ready_at)| *ready_at <= now);
                Ok(position.map(|index| state.pending.remove(index).0))
            }
        }
    }

    /// Append a job to the dead-letter partition, capped at 1000 entries.
    pub async fn push_dead_letter(&self, job: &Job) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let data = serde_json::to_string(job)?;
                redis::cmd("LPUSH")
                    .arg("queue:dead")
                    .arg(data)
                    .query_async(&mut conn.clone())
                    .await?;
                redis::cmd("LTRIM")
                    .arg("queue:dead")
                    .arg(0)
                    .arg(MAX_DEAD_LETTER)
                    .query_async(&mut conn.clone())
                    .await?;
                Ok(())
            }
            Backend::Memory(state) => {
                let mut state = state.lock().await;
                state.dead_letter.insert(0, job.clone());
                state.dead_letter.truncate(MAX_DEAD_LETTER as usize + 1);
                Ok(())
            }
        }
    }

    /// Count non-terminal jobs belonging to `user_id`. Backed by an index
    /// scan rather than a dedicated Redis index, acceptable at the
    /// specification's stated scale (hundreds of in-flight jobs).
    pub async fn count_non_terminal_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        self.count_non_terminal_matching(|job| job.user_id == user_id).await
    }

    /// Count all non-terminal jobs, system-wide.
    pub async fn count_non_terminal(&self) -> Result<usize, StoreError> {
        self.count_non_terminal_matching(|_| true).await
    }

    async fn count_non_terminal_matching(
        &self,
        predicate: impl Fn(&Job) -> bool,
    ) -> Result<usize, StoreError> {
        match &self.backend {
            Backend::Redis(conn) => {
                let keys: Vec<String> = redis::cmd("KEYS")
                    .arg("job:*")
                    .query_async(&mut conn.clone())
                    .await?;
                let mut count = 0;
                for key in keys {
                    let data: Option<String> = redis::cmd("GET")
                        .arg(&key)
                        .query_async(&mut conn.clone())
                        .await?;
                    if let Some(data) = data {
                        let job: Job = serde_json::from_str(&data)?;
                        if !job.status.is_terminal() && predicate(&job) {
                            count += 1;
                        }
                    }
                }
                Ok(count)
            }
            Backend::Memory(state) => Ok(state
                .lock()
                .await
                .jobs
                .values()
                .filter(|job| !job.status.is_terminal() && predicate(job))
                .count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CacheKey, StructuredRequest, Size};
    use chrono::Utc;

    fn sample_job() -> Job {
        Job::new(
            "user-1".to_string(),
            StructuredRequest {
                request_type: "unit".to_string(),
                style: "pixel".to_string(),
                action: "idle".to_string(),
                description: "knight".to_string(),
                raw: "a knight".to_string(),
                size: Size { width: 16, height: 16 },
                options: None,
            },
            CacheKey::from_hash("abc"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = QueueStore::new_in_memory();
        let job = sample_job();
        store.put(&job).await.unwrap();
        let fetched = store.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.job_id, job.job_id);
    }

    #[tokio::test]
    async fn delayed_pending_not_ready_until_elapsed() {
        let store = QueueStore::new_in_memory();
        store
            .push_pending_delayed("job-1", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(store.pop_ready_pending().await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.pop_ready_pending().await.unwrap(), Some("job-1".to_string()));
    }

    #[tokio::test]
    async fn connect_rejects_empty_queue_name() {
        let result = QueueStore::connect("  ", 0, "redis://127.0.0.1/").await;
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn connect_rejects_db_index_out_of_range() {
        let result = QueueStore::connect("jobs", 16, "redis://127.0.0.1/").await;
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn count_non_terminal_ignores_completed() {
        let store = QueueStore::new_in_memory();
        let mut job = sample_job();
        store.put(&job).await.unwrap();
        assert_eq!(store.count_non_terminal().await.unwrap(), 1);

        job.status = crate::model::JobStatus::Completed;
        store.put(&job).await.unwrap();
        assert_eq!(store.count_non_terminal().await.unwrap(), 0);
    }
}
