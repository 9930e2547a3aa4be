//! Bounded multi-producer/single-consumer queue with drop-oldest overflow
//!
//! The newest entry is always admitted; on overflow the stalest pending
//! entry is evicted and counted. Producers never block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::TrafficLogEntry;

/// Bounded FIFO feeding the traffic log worker
pub struct TrafficQueue {
    entries: Mutex<VecDeque<TrafficLogEntry>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
}

impl TrafficQueue {
    /// Create a queue with the given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an entry without blocking.
    ///
    /// Returns false when the entry was discarded because the queue is
    /// closed. On overflow the oldest entry is evicted and the new one
    /// admitted.
    pub fn push(&self, entry: TrafficLogEntry) -> bool {
        if self.closed.load(Ordering::Acquire) {
            // Producers racing shutdown lose their entry
            return false;
        }
        {
            let mut entries = self.entries.lock().unwrap();
            if entries.len() == self.capacity {
                entries.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    capacity = self.capacity,
                    dropped_total = total,
                    "Traffic log queue full, evicted oldest entry"
                );
            }
            entries.push_back(entry);
        }
        self.notify.notify_one();
        true
    }

    /// Pull up to `max` entries, preserving enqueue order. Non-blocking.
    pub fn pop_batch(&self, max: usize) -> Vec<TrafficLogEntry> {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len().min(max);
        entries.drain(..count).collect()
    }

    /// Wait until an entry arrives, the queue closes, or the timeout fires
    pub async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Close the queue: later pushes are discarded, the worker drains
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of entries evicted by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
