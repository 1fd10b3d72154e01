//! Durable job queue (§4.2).
//!
//! One `JobQueue` trait, two interchangeable backings: an in-process
//! volatile FIFO and a SQLite-backed persistent store with lease-based
//! claim reclamation. The worker loop, the intake validator, and tests are
//! written against the trait and never need to know which backing is live.

pub mod persistent;
pub mod volatile;

use crate::protocol::Envelope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use persistent::PersistentQueue;
pub use volatile::VolatileQueue;

/// Opaque queue identifier; monotonically increasing per backing instance.
pub type QueueId = i64;

/// An envelope plus its queue bookkeeping (§3 "Queued job").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub id: QueueId,
    pub envelope: Envelope,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(String),

    #[error("queue is closed")]
    Closed,
}

/// Backend-agnostic durable queue contract. `put` is non-blocking and
/// persistent; `get` blocks until a claimable job exists; `task_done`
/// finalizes a job, removing it permanently.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn put(&self, envelope: Envelope) -> Result<QueueId, QueueError>;

    /// Blocks until a job with a null or expired claim is available, then
    /// atomically stamps a fresh claim and returns it.
    async fn get(&self) -> Result<QueuedJob, QueueError>;

    /// Permanently removes a completed job.
    async fn task_done(&self, id: QueueId) -> Result<(), QueueError>;

    /// Number of jobs currently stored (claimed or not). For metrics only.
    async fn len(&self) -> Result<usize, QueueError>;
}
