//! Background batch writer for the traffic log queue

use std::sync::Arc;
use std::time::Duration;

use super::queue::TrafficQueue;
use super::TrafficLogEntry;
use crate::error::Result;

/// Storage driver behind the worker
pub(crate) trait TrafficStore: Send + Sync {
    /// Persist one batch. A failing batch is dropped; the queue keeps
    /// draining.
    fn write_batch(&self, batch: &[TrafficLogEntry]) -> Result<()>;
}

/// Consume the queue until it closes, then drain and flush what remains
pub(crate) async fn run(
    queue: Arc<TrafficQueue>,
    driver: Box<dyn TrafficStore>,
    batch_size: usize,
    flush_interval: Duration,
) {
    loop {
        let batch = queue.pop_batch(batch_size);
        if !batch.is_empty() {
            flush(driver.as_ref(), &batch);
            continue;
        }
        if queue.is_closed() {
            break;
        }
        queue.wait(flush_interval).await;
    }

    // Final drain after close; late producers have already been cut off
    loop {
        let batch = queue.pop_batch(batch_size);
        if batch.is_empty() {
            break;
        }
        flush(driver.as_ref(), &batch);
    }
    tracing::debug!("Traffic log worker stopped");
}

fn flush(driver: &dyn TrafficStore, batch: &[TrafficLogEntry]) {
    if let Err(e) = driver.write_batch(batch) {
        tracing::error!(
            error = %e,
            count = batch.len(),
            "Traffic log flush failed, batch dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingStore {
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    impl TrafficStore for Arc<RecordingStore> {
        fn write_batch(&self, batch: &[TrafficLogEntry]) -> Result<()> {
            self.batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|e| e.trace_id.clone()).collect());
            Ok(())
        }
    }

    fn entry(id: &str) -> TrafficLogEntry {
        TrafficLogEntry {
            trace_id: id.to_string(),
            ..TrafficLogEntry::default()
        }
    }

    #[tokio::test]
    async fn test_worker_flushes_in_enqueue_order_and_drains_on_close() {
        let queue = Arc::new(TrafficQueue::new(16));
        let store = RecordingStore::new();

        for id in ["a", "b", "c", "d", "e"] {
            queue.push(entry(id));
        }
        queue.close();

        run(
            queue.clone(),
            Box::new(store.clone()),
            2,
            Duration::from_millis(10),
        )
        .await;

        let batches = store.batches.lock().unwrap();
        let flat: Vec<String> = batches.iter().flatten().cloned().collect();
        assert_eq!(flat, vec!["a", "b", "c", "d", "e"]);
        // Batches never exceed the configured size
        assert!(batches.iter().all(|b| b.len() <= 2));
    }

    struct FailingStore;

    impl TrafficStore for FailingStore {
        fn write_batch(&self, _batch: &[TrafficLogEntry]) -> Result<()> {
            Err(crate::error::GatewayError::Other("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn test_driver_failure_does_not_stop_drain() {
        let queue = Arc::new(TrafficQueue::new(16));
        queue.push(entry("x"));
        queue.push(entry("y"));
        queue.close();

        // Completes despite every batch failing
        run(queue.clone(), Box::new(FailingStore), 1, Duration::from_millis(10)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_worker_wakes_for_late_entries() {
        let queue = Arc::new(TrafficQueue::new(16));
        let store = RecordingStore::new();

        let worker_queue = queue.clone();
        let worker_store = store.clone();
        let handle = tokio::spawn(async move {
            run(
                worker_queue,
                Box::new(worker_store),
                8,
                Duration::from_millis(20),
            )
            .await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.push(entry("late"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        queue.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after close")
            .unwrap();

        let flat: Vec<String> = store
            .batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect();
        assert_eq!(flat, vec!["late"]);
    }
}
