//! Per-key call serialization
//!
//! Guarantees at most one in-flight operation per key. Each key owns an
//! ordered waiting list; tickets are served highest priority first, FIFO
//! within equal priority. Completion hands the baton directly to the next
//! waiter (or marks the key idle), so the limiter's check-then-record runs
//! under mutual exclusion for a given key and concurrent callers cannot
//! race past it. Different keys proceed fully in parallel.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::key::ApiKey;

/// A suspended caller waiting for its turn on a key.
struct Waiter {
    priority: i32,
    baton: oneshot::Sender<()>,
}

#[derive(Default)]
struct KeyQueue {
    /// True while some operation for this key is executing.
    busy: bool,
    /// Sorted by (priority desc, arrival asc).
    waiting: Vec<Waiter>,
}

/// Per-key mutual-exclusion queues.
pub struct CallSerializer {
    queues: Mutex<HashMap<ApiKey, KeyQueue>>,
}

impl CallSerializer {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Run `operation` with exclusive execution rights for `key`.
    ///
    /// Suspends until this caller is at the head of the key's queue and no
    /// other call for the key is executing. Rights are released on every
    /// exit path — the operation's own result passes through untouched.
    /// Returns `QueueCleared` if an admin dropped this ticket while it
    /// waited.
    pub async fn execute<R, F, Fut>(&self, key: &ApiKey, priority: i32, operation: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let ticket = {
            let mut queues = self.queues.lock().await;
            let queue = queues.entry(key.clone()).or_default();
            if !queue.busy && queue.waiting.is_empty() {
                queue.busy = true;
                None
            } else {
                let (baton, ticket) = oneshot::channel();
                let pos = queue
                    .waiting
                    .iter()
                    .position(|w| w.priority < priority)
                    .unwrap_or(queue.waiting.len());
                queue.waiting.insert(pos, Waiter { priority, baton });
                debug!(key = %key, depth = queue.waiting.len(), "queued behind in-flight call");
                Some(ticket)
            }
        };

        if let Some(ticket) = ticket {
            // Sender dropped without sending means the queue was cleared.
            ticket.await.map_err(|_| Error::QueueCleared)?;
        }

        let result = operation().await;
        self.release(key).await;
        Ok(result)
    }

    /// Hand the baton to the next waiter, or mark the key idle.
    async fn release(&self, key: &ApiKey) {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(key) else {
            return;
        };
        loop {
            match queue.waiting.first() {
                Some(_) => {
                    let next = queue.waiting.remove(0);
                    // A waiter that vanished (dropped future) forfeits its
                    // turn; keep the baton moving.
                    if next.baton.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    queue.busy = false;
                    break;
                }
            }
        }
        queues.remove(key);
    }

    /// Number of callers waiting for `key` (excludes the in-flight call).
    pub async fn queue_depth(&self, key: &ApiKey) -> usize {
        let queues = self.queues.lock().await;
        queues.get(key).map(|q| q.waiting.len()).unwrap_or(0)
    }

    /// Total waiting callers across all keys.
    pub async fn total_queue_depth(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.values().map(|q| q.waiting.len()).sum()
    }

    /// Drop all waiting tickets for `key`; the in-flight call (if any) is
    /// unaffected. Dropped waiters observe `QueueCleared`. Returns the
    /// number dropped.
    pub async fn clear(&self, key: &ApiKey) -> usize {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(key) else {
            return 0;
        };
        let dropped = queue.waiting.len();
        queue.waiting.clear();
        if !queue.busy {
            queues.remove(key);
        }
        info!(key = %key, dropped, "queue cleared");
        dropped
    }

    /// Drop all waiting tickets across all keys. Returns the number dropped.
    pub async fn clear_all(&self) -> usize {
        let mut queues = self.queues.lock().await;
        let mut dropped = 0;
        for queue in queues.values_mut() {
            dropped += queue.waiting.len();
            queue.waiting.clear();
        }
        queues.retain(|_, q| q.busy);
        info!(dropped, "all queues cleared");
        dropped
    }
}

impl Default for CallSerializer {
    fn default() -> Self {
        Self::new()
    }
}
