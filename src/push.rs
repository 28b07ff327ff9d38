//! C6 — Push Channel Manager.
//!
//! Maintains per-user push sessions, broadcasts framed progress records, and
//! emits keep-alives. Generalized from the per-user session bookkeeping idiom
//! in `enterprise::realtime` (room/presence maps behind a lock, heartbeat
//! timers, idempotent close), narrowed from multi-user CRDT sync to a
//! one-directional SSE-style frame stream. The sink is a trait so the crate
//! stays transport-agnostic (HTTP wiring is out of scope per the
//! specification).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// A write-only destination for framed push messages. A write error marks
/// the owning session for removal but never propagates.
#[async_trait::async_trait]
pub trait PushSink: Send + Sync {
    /// Write one pre-framed message (already `data: ...\n\n` or
    /// `:keep-alive\n\n`) to the sink.
    async fn write_frame(&self, frame: &str) -> Result<(), std::io::Error>;
}

/// A progress record broadcast to a user's sessions. `result`, when present,
/// carries only metadata — frame bytes are never broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    /// The job this record concerns.
    pub job_id: String,
    /// The owning user.
    pub user_id: String,
    /// Coarse job status at the time of this record.
    pub status: String,
    /// 0-100 progress.
    pub progress: u8,
    /// Human-readable status message.
    pub message: String,
    /// Estimated time remaining, in milliseconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
    /// Completion metadata, present only on the final message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<crate::model::ResultMetadata>,
    /// Unix millisecond timestamp.
    pub timestamp: i64,
}

#[derive(Serialize)]
struct ConnectedRecord<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    session_id: &'a str,
    timestamp: i64,
}

fn frame(payload: &str) -> String {
    format!("data: {payload}\n\n")
}

struct Session {
    user_id: String,
    sink: Arc<dyn PushSink>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    keep_alive: JoinHandle<()>,
}

/// Real-time broadcast manager for per-user push sessions.
pub struct PushChannelManager {
    sessions: RwLock<HashMap<String, Session>>,
    by_user: RwLock<HashMap<String, Vec<String>>>,
    keep_alive_interval: std::time::Duration,
}

impl PushChannelManager {
    /// Construct a manager with the given keep-alive interval.
    pub fn new(keep_alive_interval: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            keep_alive_interval,
        })
    }

    /// Register a new session for `user_id`, writing the initial `connected`
    /// record and starting the keep-alive timer.
    pub async fn register_session(
        self: &Arc<Self>,
        user_id: String,
        sink: Arc<dyn PushSink>,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let connected = ConnectedRecord {
            kind: "connected",
            session_id: &session_id,
            timestamp: created_at.timestamp_millis(),
        };
        let payload = serde_json::to_string(&connected).expect("connected record is valid json");
        if sink.write_frame(&frame(&payload)).await.is_err() {
            warn!(event = "push_write_failed", session_id = %session_id, user_id = %user_id);
        }

        let manager = Arc::clone(self);
        let keep_alive_session_id = session_id.clone();
        let keep_alive_user_id = user_id.clone();
        let interval = self.keep_alive_interval;
        let keep_alive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let sink = {
                    let sessions = manager.sessions.read().await;
                    match sessions.get(&keep_alive_session_id) {
                        Some(session) => Arc::clone(&session.sink),
                        None => return,
                    }
                };
                if sink.write_frame(":keep-alive\n\n").await.is_err() {
                    warn!(
                        event = "push_write_failed",
                        session_id = %keep_alive_session_id,
                        user_id = %keep_alive_user_id
                    );
                    manager
                        .close_session(&keep_alive_user_id, &keep_alive_session_id)
                        .await;
                    return;
                }
            }
        });

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                session_id.clone(),
                Session {
                    user_id: user_id.clone(),
                    sink,
                    created_at,
                    keep_alive,
                },
            );
        }
        {
            let mut by_user = self.by_user.write().await;
            by_user.entry(user_id).or_default().push(session_id.clone());
        }

        session_id
    }

    /// Broadcast a progress record to every session owned by `user_id`.
    /// Sessions whose sink raises on write are removed; the broadcaster
    /// never raises.
    pub async fn broadcast(&self, user_id: &str, record: &ProgressRecord) {
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event = "push_encode_failed", user_id, error = %err);
                return;
            }
        };
        let framed = frame(&payload);

        let session_ids = {
            let by_user = self.by_user.read().await;
            by_user.get(user_id).cloned().unwrap_or_default()
        };

        let mut failed = Vec::new();
        for session_id in session_ids {
            let sink = {
                let sessions = self.sessions.read().await;
                sessions.get(&session_id).map(|s| Arc::clone(&s.sink))
            };
            let Some(sink) = sink else { continue };
            if sink.write_frame(&framed).await.is_err() {
                warn!(event = "push_write_failed", session_id = %session_id, user_id);
                failed.push(session_id);
            }
        }

        for session_id in failed {
            self.close_session(user_id, &session_id).await;
        }
    }

    /// Close one session. Idempotent: closing an already-closed or unknown
    /// session is a no-op.
    pub async fn close_session(&self, user_id: &str, session_id: &str) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id)
        };
        if let Some(session) = removed {
            session.keep_alive.abort();
            let mut by_user = self.by_user.write().await;
            if let Some(ids) = by_user.get_mut(&session.user_id) {
                ids.retain(|id| id != session_id);
                if ids.is_empty() {
                    by_user.remove(&session.user_id);
                }
            }
        }
    }

    /// Close every session, for graceful shutdown.
    pub async fn close_all(&self) {
        let all_ids: Vec<(String, String)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, session)| (session.user_id.clone(), id.clone()))
                .collect()
        };
        for (user_id, session_id) in all_ids {
            self.close_session(&user_id, &session_id).await;
        }
    }

    /// Number of active sessions for a user, for tests and diagnostics.
    pub async fn session_count(&self, user_id: &str) -> usize {
        let by_user = self.by_user.read().await;
        by_user.get(user_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        fail_next: std::sync::atomic::AtomicBool,
        writes: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                fail_next: std::sync::atomic::AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl PushSink for RecordingSink {
        async fn write_frame(&self, frame: &str) -> Result<(), std::io::Error> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
            }
            self.frames.lock().await.push(frame.to_string());
            Ok(())
        }
    }

    fn sample_record() -> ProgressRecord {
        ProgressRecord {
            job_id: "job-1".to_string(),
            user_id: "user-1".to_string(),
            status: "processing".to_string(),
            progress: 42,
            message: "working".to_string(),
            estimated_time_remaining_ms: None,
            result: None,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn s5_fanout_to_two_sessions_and_failure_removes_one() {
        let manager = PushChannelManager::new(std::time::Duration::from_secs(3600));
        let sink_a = RecordingSink::new();
        let sink_b = RecordingSink::new();

        let session_a = manager
            .register_session("user-1".to_string(), sink_a.clone())
            .await;
        let session_b = manager
            .register_session("user-1".to_string(), sink_b.clone())
            .await;

        manager.broadcast("user-1", &sample_record()).await;
        assert_eq!(sink_a.frames.lock().await.len(), 1);
        assert_eq!(sink_b.frames.lock().await.len(), 1);

        sink_a.fail_next.store(true, Ordering::SeqCst);
        manager.broadcast("user-1", &sample_record()).await;

        assert_eq!(sink_b.frames.lock().await.len(), 2);
        assert_eq!(manager.session_count("user-1").await, 1);

        // closeSession on the already-removed session is a no-op.
        manager.close_session("user-1", &session_a).await;
        assert_eq!(manager.session_count("user-1").await, 1);

        manager.close_session("user-1", &session_b).await;
        assert_eq!(manager.session_count("user-1").await, 0);
    }

    #[tokio::test]
    async fn close_all_is_idempotent() {
        let manager = PushChannelManager::new(std::time::Duration::from_secs(3600));
        let sink = RecordingSink::new();
        manager.register_session("user-1".to_string(), sink).await;
        manager.close_all().await;
        manager.close_all().await;
        assert_eq!(manager.session_count("user-1").await, 0);
    }
}
