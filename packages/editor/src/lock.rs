//! # Transaction Lock
//!
//! Global, FIFO-fair mutual exclusion for transactions. Every request gets a
//! fresh lock id so the queue can be inspected while debugging. A waiter that
//! times out leaves the queue without ever holding the lock.

use crate::errors::TransactionError;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug)]
pub struct TransactionLock {
    // tokio's mutex hands out the lock in request order
    inner: AsyncMutex<()>,
    queue: Mutex<VecDeque<String>>,
    holder: Mutex<Option<String>>,
    timeout: Duration,
}

/// Held lock. Released on drop, on every exit path.
#[derive(Debug)]
pub struct LockGuard<'a> {
    _guard: AsyncMutexGuard<'a, ()>,
    lock: &'a TransactionLock,
    id: String,
    acquired_at: Instant,
}

impl LockGuard<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let mut holder = self.lock.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if holder.as_deref() == Some(self.id.as_str()) {
            *holder = None;
        }
        tracing::debug!(
            lock_id = %self.id,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "[TransactionLock] released"
        );
    }
}

/// Queue membership of one waiter; leaves the queue when dropped, including
/// when the waiting future is cancelled
struct QueueTicket<'a> {
    lock: &'a TransactionLock,
    id: String,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        let mut queue = self.lock.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.retain(|queued| queued != &self.id);
    }
}

impl TransactionLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: AsyncMutex::new(()),
            queue: Mutex::new(VecDeque::new()),
            holder: Mutex::new(None),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the lock, at most the configured timeout
    pub async fn acquire(&self) -> Result<LockGuard<'_>, TransactionError> {
        let id = Uuid::new_v4().to_string();
        let ticket = QueueTicket {
            lock: self,
            id: id.clone(),
        };
        let position = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push_back(id.clone());
            queue.len()
        };
        tracing::debug!(lock_id = %id, position, "[TransactionLock] queued");

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.inner.lock()).await {
            Ok(guard) => {
                drop(ticket);
                *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
                tracing::debug!(
                    lock_id = %id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "[TransactionLock] acquired"
                );
                Ok(LockGuard {
                    _guard: guard,
                    lock: self,
                    id,
                    acquired_at: Instant::now(),
                })
            }
            Err(_) => {
                drop(ticket);
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(lock_id = %id, waited_ms, "[TransactionLock] timed out");
                Err(TransactionError::LockTimeout {
                    lock_id: id,
                    waited_ms,
                })
            }
        }
    }

    /// Ids waiting for the lock, oldest first
    pub fn queued(&self) -> Vec<String> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.iter().cloned().collect()
    }

    /// Id of the current holder
    pub fn holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl Default for TransactionLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}
