//! Work queue with the idle-termination protocol.
//!
//! The queue may be legitimately empty mid-stream while the feeder is still
//! scanning, so "empty" alone cannot mean "finished". The feeder flips the
//! `monitoring` flag once it has started producing; only then do consumers
//! count empty observations toward shutdown. Workers exit after
//! `max_idle_polls` consecutive idle cycles (see [`crate::worker`]).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

/// Thread-safe FIFO with optional capacity bound and a monitoring flag.
#[derive(Debug)]
pub struct ContextQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    monitoring: AtomicBool,
    item_added: Notify,
    item_removed: Notify,
}

impl<T> ContextQueue<T> {
    /// Queue without a capacity bound.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Queue holding at most `capacity` items; `push` waits when full.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity,
            monitoring: AtomicBool::new(false),
            item_added: Notify::new(),
            item_removed: Notify::new(),
        }
    }

    /// Mark the queue as actively fed. Consumers start counting idle cycles
    /// from this point on.
    pub fn enable_monitoring(&self) {
        self.monitoring.store(true, Ordering::SeqCst);
    }

    /// Whether the feeder has started producing.
    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Append an item, waiting while the queue is at capacity.
    pub async fn push(&self, item: T) {
        let mut item = Some(item);
        loop {
            {
                let mut queue = self.inner.lock().await;
                if self.capacity.is_none_or(|cap| queue.len() < cap) {
                    if let Some(value) = item.take() {
                        queue.push_back(value);
                    }
                    self.item_added.notify_one();
                    return;
                }
            }
            self.item_removed.notified().await;
        }
    }

    /// Remove the oldest item, waiting up to `timeout` for one to appear.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(item) = queue.pop_front() {
                    self.item_removed.notify_one();
                    return Some(item);
                }
            }
            if tokio::time::timeout_at(deadline, self.item_added.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Current number of queued items.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether no items are queued right now.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
