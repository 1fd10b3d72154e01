//! In-process FIFO backing. No reclamation: a crashed process simply
//! discards the queue, so there is nothing to reclaim.

use super::{JobQueue, QueueError, QueueId, QueuedJob};
use crate::protocol::Envelope;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

struct Inner {
    items: Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
    next_id: AtomicI64,
}

/// In-memory FIFO implementing [`JobQueue`].
#[derive(Clone)]
pub struct VolatileQueue {
    inner: Arc<Inner>,
}

impl VolatileQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                next_id: AtomicI64::new(1),
            }),
        }
    }
}

impl Default for VolatileQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for VolatileQueue {
    async fn put(&self, envelope: Envelope) -> Result<QueueId, QueueError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let job = QueuedJob { id, envelope };
        self.inner.items.lock().await.push_back(job);
        self.inner.notify.notify_one();
        Ok(id)
    }

    async fn get(&self) -> Result<QueuedJob, QueueError> {
        loop {
            {
                let mut items = self.inner.items.lock().await;
                if let Some(job) = items.pop_front() {
                    return Ok(job);
                }
            }
            self.inner.notify.notified().await;
        }
    }

    async fn task_done(&self, _id: QueueId) -> Result<(), QueueError> {
        // The job was already removed from the in-memory deque by `get`;
        // nothing further to finalize.
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.inner.items.lock().await.len())
    }
}
