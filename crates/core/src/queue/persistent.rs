//! SQLite WAL-mode persistent backing (§4.2).
//!
//! Single table `jobs(id, payload, created_ts, claimed_ts nullable)` with an
//! index on `(claimed_ts, id)`. Claiming is a conditional update guarded by
//! the previously-observed claim value; a zero-row update means another
//! worker won the race and the caller retries. This gives linearizable
//! single-claim semantics without row locks.

use super::{JobQueue, QueueError, QueueId, QueuedJob};
use crate::protocol::Envelope;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// Persistent, lease-based job queue backed by a local SQLite file.
#[derive(Clone)]
pub struct PersistentQueue {
    conn: Arc<std::sync::Mutex<Connection>>,
    notify: Arc<Notify>,
    poll_interval: Duration,
    claim_ttl: Duration,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl PersistentQueue {
    /// Open (creating if absent) the SQLite store at `db_path` in WAL mode.
    pub fn open<P: AsRef<Path>>(
        db_path: P,
        poll_interval: Duration,
        claim_ttl: Duration,
    ) -> Result<Self, QueueError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QueueError::Storage(e.to_string()))?;
        }
        let conn = Connection::open(db_path.as_ref())
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                created_ts INTEGER NOT NULL,
                claimed_ts INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (claimed_ts, id);",
        )
        .map_err(|e| QueueError::Storage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
            poll_interval,
            claim_ttl,
        })
    }

    /// In-memory SQLite instance, for tests.
    #[cfg(test)]
    pub fn open_in_memory(poll_interval: Duration, claim_ttl: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(|e| QueueError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                created_ts INTEGER NOT NULL,
                claimed_ts INTEGER
            );
            CREATE INDEX idx_jobs_claim ON jobs (claimed_ts, id);",
        )
        .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
            poll_interval,
            claim_ttl,
        })
    }

    /// Attempt one claim pass: find the oldest unclaimed-or-expired job and
    /// try to stamp it. Returns `None` if no job is currently claimable, or
    /// if the conditional update lost a race (caller retries).
    fn try_claim_once(&self) -> Result<Option<QueuedJob>, QueueError> {
        let conn = self.conn.lock().expect("queue connection mutex poisoned");
        let ttl_secs = self.claim_ttl.as_secs() as i64;
        let now = now_unix();
        let cutoff = now - ttl_secs;

        let candidate: Option<(i64, String, Option<i64>)> = conn
            .query_row(
                "SELECT id, payload, claimed_ts FROM jobs
                 WHERE claimed_ts IS NULL OR claimed_ts < ?1
                 ORDER BY id LIMIT 1",
                params![cutoff],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let Some((id, payload, observed_claim)) = candidate else {
            return Ok(None);
        };

        let affected = conn
            .execute(
                "UPDATE jobs SET claimed_ts = ?1 WHERE id = ?2 AND claimed_ts IS ?3",
                params![now, id, observed_claim],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        if affected == 0 {
            // Another worker claimed it first; caller retries.
            return Ok(None);
        }

        match serde_json::from_str::<Envelope>(&payload) {
            Ok(envelope) => Ok(Some(QueuedJob { id, envelope })),
            Err(_) => {
                // Poison-pill containment: a payload that doesn't even parse
                // can never be completed. Drop it and let the caller retry.
                conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])
                    .map_err(|e| QueueError::Storage(e.to_string()))?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobQueue for PersistentQueue {
    async fn put(&self, envelope: Envelope) -> Result<QueueId, QueueError> {
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        let conn = self.conn.clone();
        let id = tokio::task::spawn_blocking(move || -> Result<i64, QueueError> {
            let conn = conn.lock().expect("queue connection mutex poisoned");
            conn.execute(
                "INSERT INTO jobs (payload, created_ts, claimed_ts) VALUES (?1, ?2, NULL)",
                params![payload, now_unix()],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| QueueError::Storage(e.to_string()))??;

        self.notify.notify_one();
        Ok(id)
    }

    async fn get(&self) -> Result<QueuedJob, QueueError> {
        loop {
            let this = self.clone();
            let result =
                tokio::task::spawn_blocking(move || this.try_claim_once())
                    .await
                    .map_err(|e| QueueError::Storage(e.to_string()))??;

            if let Some(job) = result {
                return Ok(job);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn task_done(&self, id: QueueId) -> Result<(), QueueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), QueueError> {
            let conn = conn.lock().expect("queue connection mutex poisoned");
            conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])
                .map_err(|e| QueueError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| QueueError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let conn = self.conn.clone();
        let count = tokio::task::spawn_blocking(move || -> Result<i64, QueueError> {
            let conn = conn.lock().expect("queue connection mutex poisoned");
            conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
                .map_err(|e| QueueError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| QueueError::Storage(e.to_string()))??;
        Ok(count as usize)
    }
}
