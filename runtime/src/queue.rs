//! The admission queue: admitted sessions waiting for a free worker.
//!
//! A `VecDeque` behind a short critical section, paired with a counting
//! semaphore of queued items. Producers push at the back and add one permit;
//! consumers wait for a permit and pop from the front, so every item is
//! handed to exactly one consumer in FIFO order.

use crate::metrics::SessionMetrics;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// Unbounded multi-producer, multi-consumer FIFO.
///
/// The number of items is bounded in practice by session admission, which
/// is acquired before an item is enqueued.
#[derive(Debug)]
pub struct AdmissionQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Semaphore,
}

impl<T> AdmissionQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    /// Append an item and wake one waiting consumer.
    ///
    /// Items enqueued after [`close`](Self::close) are still delivered to
    /// consumers that are draining the queue.
    pub fn enqueue(&self, item: T) {
        {
            let mut items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            items.push_back(item);
            // Recorded under the lock so gauge updates land in queue order
            SessionMetrics::record_queue_depth(items.len());
        }
        self.available.add_permits(1);
    }

    /// Remove the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<T> {
        match self.available.acquire().await {
            Ok(permit) => permit.forget(),
            // Closed: hand out whatever is left without waiting
            Err(_) => return self.pop(),
        }
        self.pop()
    }

    fn pop(&self) -> Option<T> {
        let mut items = self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let item = items.pop_front();
        SessionMetrics::record_queue_depth(items.len());
        item
    }

    /// Wake every waiting consumer; `dequeue` returns `None` once drained
    pub fn close(&self) {
        self.available.close();
    }

    /// Number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether no item is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for AdmissionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let queue = AdmissionQueue::new();
        for i in 0..5 {
            queue.enqueue(i);
        }
        assert_eq!(queue.len(), 5);

        let mut out = Vec::new();
        for _ in 0..5 {
            out.push(queue.dequeue().await.unwrap());
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(AdmissionQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue("session");
        assert_eq!(consumer.await.unwrap(), Some("session"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn each_item_reaches_one_consumer() {
        let queue = Arc::new(AdmissionQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.dequeue().await {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..200 {
            queue.enqueue(i);
        }
        while !queue.is_empty() {
            tokio::task::yield_now().await;
        }
        queue.close();

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 200);
        assert_eq!(all.into_iter().collect::<HashSet<_>>().len(), 200);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = AdmissionQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.close();

        assert_eq!(queue.dequeue().await, Some(1));
        assert_eq!(queue.dequeue().await, Some(2));
        assert_eq!(queue.dequeue().await, None);
    }

    fn rendered_depth(handle: &metrics_exporter_prometheus::PrometheusHandle) -> Option<f64> {
        handle
            .render()
            .lines()
            .find_map(|line| line.strip_prefix("ems_admission_queue_depth "))
            .and_then(|value| value.trim().parse().ok())
    }

    #[test]
    fn depth_gauge_settles_on_queue_length() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let queue = AdmissionQueue::new();

        std::thread::scope(|scope| {
            for producer in 0..4 {
                let (queue, recorder) = (&queue, &recorder);
                scope.spawn(move || {
                    metrics::with_local_recorder(recorder, || {
                        for i in 0..250 {
                            queue.enqueue(producer * 1000 + i);
                        }
                    });
                });
            }
        });
        assert_eq!(queue.len(), 1000);
        assert_eq!(rendered_depth(&handle), Some(1000.0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let (queue, recorder) = (&queue, &recorder);
                scope.spawn(move || {
                    metrics::with_local_recorder(recorder, || while queue.pop().is_some() {});
                });
            }
        });
        assert!(queue.is_empty());
        assert_eq!(rendered_depth(&handle), Some(0.0));
    }

    proptest::proptest! {
        #[test]
        fn interleaved_operations_keep_fifo_order(ops in proptest::collection::vec(proptest::bool::ANY, 1..64)) {
            tokio_test::block_on(async {
                let queue = AdmissionQueue::new();
                let mut next = 0u32;
                let mut expected = 0u32;
                for push in ops {
                    if push || queue.is_empty() {
                        queue.enqueue(next);
                        next += 1;
                    } else {
                        proptest::prop_assert_eq!(queue.dequeue().await, Some(expected));
                        expected += 1;
                    }
                }
                proptest::prop_assert_eq!(queue.len(), (next - expected) as usize);
                Ok(())
            })?;
        }
    }
}
