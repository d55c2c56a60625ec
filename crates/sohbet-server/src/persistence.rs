//! Bridge between the hub and the history store.
//!
//! Store calls are blocking (SQLite, mutexes), so they never run on the hub
//! loop. Every call becomes a [`Job`] on one queue consumed by one worker
//! task, which runs it on the blocking pool under a timeout. A single
//! consumer keeps per-channel writes in the order they were issued.
//!
//! Failures are logged and swallowed: clients never see a store error, they
//! just get no history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sohbet_shared::ChatMessage;
use sohbet_store::{MemoryStore, MessageLog, SqliteStore};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{HistoryBackend, ServerConfig};

/// Jobs waiting for the worker before fire-and-forget writes are dropped.
const JOB_QUEUE_CAPACITY: usize = 1024;

enum Job {
    Append {
        channel: String,
        message: ChatMessage,
    },
    /// Applied by the store as one read-modify-write.
    MarkSeen {
        channel: String,
        target: DateTime<Utc>,
        username: String,
    },
    Recent {
        channel: String,
        limit: usize,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    Clear {
        channel: String,
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to the history worker. A disabled handle turns
/// every call into a no-op.
#[derive(Clone)]
pub struct Persistence {
    jobs: Option<mpsc::Sender<Job>>,
}

impl Persistence {
    /// Handle with no store behind it.
    pub fn disabled() -> Self {
        Self { jobs: None }
    }

    /// Start the worker task for `log`. Must be called inside a runtime.
    pub fn spawn(log: MessageLog, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        tokio::spawn(run_worker(Arc::new(log), rx, timeout));
        Self { jobs: Some(tx) }
    }

    /// Open the configured backend. A SQLite file that cannot be opened
    /// leaves the relay running without history.
    pub fn from_config(config: &ServerConfig) -> Self {
        let retention = config.retention;
        match &config.history {
            HistoryBackend::Memory => {
                info!("Using in-memory message history");
                Self::spawn(
                    MessageLog::new(MemoryStore::new(), retention),
                    config.store_timeout,
                )
            }
            HistoryBackend::Sqlite(path) => match SqliteStore::open_at(path) {
                Ok(store) => Self::spawn(MessageLog::new(store, retention), config.store_timeout),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "History database unavailable, continuing without message history"
                    );
                    Self::disabled()
                }
            },
            HistoryBackend::Off => {
                info!("Message history disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.jobs.is_some()
    }

    /// Queue `message` for storage in `channel`. Never waits.
    pub fn append(&self, channel: &str, message: ChatMessage) {
        self.submit(Job::Append {
            channel: channel.to_string(),
            message,
        });
    }

    /// Queue a seen acknowledgement. Never waits.
    pub fn mark_seen(&self, channel: &str, target: DateTime<Utc>, username: &str) {
        self.submit(Job::MarkSeen {
            channel: channel.to_string(),
            target,
            username: username.to_string(),
        });
    }

    /// Up to `limit` recent messages of `channel`, oldest first. Empty when
    /// history is disabled or the store fails.
    pub async fn recent(&self, channel: &str, limit: usize) -> Vec<ChatMessage> {
        let Some(jobs) = &self.jobs else {
            return Vec::new();
        };
        let (reply, rx) = oneshot::channel();
        let job = Job::Recent {
            channel: channel.to_string(),
            limit,
            reply,
        };
        if jobs.send(job).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Drop the history of `channel`, waiting until the worker has done so.
    pub async fn clear(&self, channel: &str) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        let (reply, rx) = oneshot::channel();
        let job = Job::Clear {
            channel: channel.to_string(),
            reply,
        };
        if jobs.send(job).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn submit(&self, job: Job) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("History queue full, dropping write");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("History worker stopped, dropping write");
            }
        }
    }
}

async fn run_worker(log: Arc<MessageLog>, mut jobs: mpsc::Receiver<Job>, timeout: Duration) {
    debug!("History worker started");

    while let Some(job) = jobs.recv().await {
        match job {
            Job::Append { channel, message } => {
                blocking(&log, timeout, "append", move |log| {
                    log.append(&channel, &message)
                })
                .await;
            }
            Job::MarkSeen {
                channel,
                target,
                username,
            } => {
                let updated = blocking(&log, timeout, "mark_seen", move |log| {
                    log.mark_seen(&channel, target, &username)
                })
                .await;
                if updated == Some(false) {
                    debug!(%target, "Seen acknowledgement matched nothing");
                }
            }
            Job::Recent {
                channel,
                limit,
                reply,
            } => {
                let messages = blocking(&log, timeout, "recent", move |log| {
                    log.recent(&channel, limit)
                })
                .await
                .unwrap_or_default();
                let _ = reply.send(messages);
            }
            Job::Clear { channel, reply } => {
                let ch = channel.clone();
                if blocking(&log, timeout, "clear", move |log| log.clear(&ch))
                    .await
                    .is_some()
                {
                    info!(channel = %channel, "Cleared channel history");
                }
                let _ = reply.send(());
            }
        }
    }

    debug!("History worker stopped");
}

/// Run `op` on the blocking pool, bounded by `timeout`. `None` on any
/// failure, already logged.
async fn blocking<T, F>(log: &Arc<MessageLog>, timeout: Duration, op: &'static str, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&MessageLog) -> sohbet_store::Result<T> + Send + 'static,
{
    let log = Arc::clone(log);
    let task = tokio::task::spawn_blocking(move || f(&log));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Some(value),
        Ok(Ok(Err(e))) => {
            warn!(op, error = %e, "History operation failed");
            None
        }
        Ok(Err(e)) => {
            warn!(op, error = %e, "History task panicked");
            None
        }
        Err(_) => {
            warn!(op, ?timeout, "History operation timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sohbet_store::Retention;

    fn memory() -> Persistence {
        Persistence::spawn(
            MessageLog::new(MemoryStore::new(), Retention::default()),
            Duration::from_secs(5),
        )
    }

    fn text(body: &str, second: i64) -> ChatMessage {
        use chrono::TimeZone;
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(second);
        ChatMessage::text("alice", body, "genel", ts)
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let persistence = Persistence::disabled();
        assert!(!persistence.is_enabled());
        persistence.append("genel", text("hi", 0));
        persistence.clear("genel").await;
        assert!(persistence.recent("genel", 50).await.is_empty());
    }

    #[tokio::test]
    async fn test_reads_observe_earlier_writes() {
        let persistence = memory();
        for i in 0..3 {
            persistence.append("genel", text(&format!("m{i}"), i));
        }

        let bodies: Vec<_> = persistence
            .recent("genel", 50)
            .await
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_mark_seen_through_worker() {
        let persistence = memory();
        let message = text("look", 4);
        let target = message.timestamp.unwrap();
        persistence.append("genel", message);
        persistence.mark_seen("genel", target, "bob");
        persistence.mark_seen("genel", target, "bob");

        let history = persistence.recent("genel", 50).await;
        assert_eq!(history[0].seen_by, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_then_recent_is_empty() {
        let persistence = memory();
        persistence.append("genel", text("gone", 0));
        persistence.append("other", text("kept", 0));
        persistence.clear("genel").await;

        assert!(persistence.recent("genel", 50).await.is_empty());
        assert_eq!(persistence.recent("other", 50).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unopenable_sqlite_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = ServerConfig {
            history: HistoryBackend::Sqlite(blocker.join("history.db")),
            ..ServerConfig::default()
        };
        assert!(!Persistence::from_config(&config).is_enabled());
    }
}
