//! Unbounded thread-safe FIFO queue for multiple producer and consumer
//! threads.
//!
//! [`MtQueue`] carries move-only items: the pusher relinquishes ownership,
//! the popper assumes it. A mutex guards the underlying deque and a
//! condition variable signals non-empty; notifications are sent after the
//! lock is released so woken threads can run immediately. Size and activity
//! counters live in a shared [`QueueGauge`] of atomics so observers can
//! sample without taking the queue lock.
//!
//! The queue can grow without bound if producers outpace consumers; bounding
//! is the tidal queue's job (see the `tidal` module).
//!
//! ## Zero unsafe blocks
//!
//! All concurrency uses safe Rust APIs (`Mutex`, `Condvar`, atomics).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::monitor::{QueueGauge, QueueMonitor};

/// The queue interface the workflow patterns are generic over.
///
/// Implemented by [`MtQueue`] (unbounded) and
/// [`TidalQueue`](crate::tidal::TidalQueue) (bounded tidal). `push` may
/// block for a bounded implementation; `wait_and_pop` blocks only on
/// emptiness.
pub trait WorkQueue<T: Send>: Send + Sync {
    /// Appends an item; may block on a bounded queue.
    fn push(&self, item: T);

    /// Removes the front item, blocking while the queue is empty.
    fn wait_and_pop(&self) -> T;

    /// Removes the front item, or returns `None` if the queue is empty.
    fn try_pop(&self) -> Option<T>;

    /// Number of queued items (approximate under concurrency).
    fn len(&self) -> usize;

    /// Total pushes plus pops since creation.
    fn activity(&self) -> usize;

    /// Returns `true` when no items are queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded multi-producer multi-consumer FIFO of move-only items.
pub struct MtQueue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    gauge: Arc<QueueGauge>,
    // Held for explicit object lifetime; the sampler stops when the queue
    // drops.
    _monitor: Option<QueueMonitor>,
}

impl<T> MtQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            gauge: QueueGauge::unbounded(),
            _monitor: None,
        }
    }

    /// Creates an empty queue with an attached monitor that samples it every
    /// `interval` and reports under `name`.
    pub fn monitored(name: impl Into<String>, interval: std::time::Duration) -> Self {
        let gauge = QueueGauge::unbounded();
        let monitor = QueueMonitor::spawn(Arc::clone(&gauge), name, interval);
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            gauge,
            _monitor: Some(monitor),
        }
    }

    /// Appends `value` and wakes one waiting consumer. Never blocks.
    pub fn push(&self, value: T) {
        {
            let mut inner = self.inner.lock().expect("MtQueue mutex poisoned");
            inner.push_back(value);
            self.gauge.record_push();
        }
        // Notify after unlocking so the woken consumer can pop immediately.
        self.not_empty.notify_one();
    }

    /// Removes and returns the front item, blocking while the queue is empty.
    pub fn wait_and_pop(&self) -> T {
        let mut inner = self.inner.lock().expect("MtQueue mutex poisoned");
        while inner.is_empty() {
            inner = self.not_empty.wait(inner).expect("MtQueue condvar poisoned");
        }
        let value = inner.pop_front().expect("queue non-empty after wait");
        self.gauge.record_pop();
        drop(inner);
        self.not_empty.notify_one();
        value
    }

    /// Removes and returns the front item, or `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("MtQueue mutex poisoned");
        let value = inner.pop_front()?;
        self.gauge.record_pop();
        drop(inner);
        self.not_empty.notify_one();
        Some(value)
    }

    /// Number of queued items (approximate under concurrency).
    pub fn len(&self) -> usize {
        self.gauge.len()
    }

    /// Returns `true` when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.gauge.is_empty()
    }

    /// Total pushes plus pops since creation.
    pub fn activity(&self) -> usize {
        self.gauge.activity()
    }

    /// The shared counters observers may sample without the queue lock.
    pub fn gauge(&self) -> &Arc<QueueGauge> {
        &self.gauge
    }
}

impl<T> Default for MtQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> WorkQueue<T> for MtQueue<T> {
    fn push(&self, item: T) {
        MtQueue::push(self, item);
    }

    fn wait_and_pop(&self) -> T {
        MtQueue::wait_and_pop(self)
    }

    fn try_pop(&self) -> Option<T> {
        MtQueue::try_pop(self)
    }

    fn len(&self) -> usize {
        MtQueue::len(self)
    }

    fn activity(&self) -> usize {
        MtQueue::activity(self)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    // (1) FIFO order with a single producer and consumer.
    #[test]
    fn test_fifo_order() {
        let queue = MtQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        for i in 0..10 {
            assert_eq!(queue.wait_and_pop(), i);
        }
    }

    // (2) try_pop on an empty queue returns None without blocking.
    #[test]
    fn test_try_pop_empty() {
        let queue: MtQueue<u32> = MtQueue::new();
        assert_eq!(queue.try_pop(), None);
    }

    // (3) Counter invariants: size = pushes - pops, activity = pushes + pops.
    #[test]
    fn test_counter_invariants() {
        let queue = MtQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        let _ = queue.wait_and_pop();
        let _ = queue.try_pop();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.activity(), 7);
        assert!(!queue.is_empty());
    }

    // (4) wait_and_pop blocks until a producer pushes.
    #[test]
    fn test_wait_and_pop_blocks_until_push() {
        let queue = Arc::new(MtQueue::new());
        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || consumer_queue.wait_and_pop());
        thread::sleep(std::time::Duration::from_millis(20));
        queue.push(99u32);
        assert_eq!(consumer.join().expect("consumer panicked"), 99);
    }

    // (5) Concurrent producers and consumers drain exactly the pushed items.
    #[test]
    fn test_concurrent_producers_consumers() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 3;
        const PER_PRODUCER: usize = 2_000;

        let queue = Arc::new(MtQueue::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let per_consumer = PRODUCERS * PER_PRODUCER / CONSUMERS;
        let remainder = PRODUCERS * PER_PRODUCER - per_consumer * CONSUMERS;
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|c| {
                let q = Arc::clone(&queue);
                let count = per_consumer + usize::from(c == 0) * remainder;
                thread::spawn(move || {
                    let mut sum = 0usize;
                    for _ in 0..count {
                        sum += q.wait_and_pop();
                    }
                    sum
                })
            })
            .collect();

        for p in producers {
            p.join().expect("producer panicked");
        }
        let total: usize = consumers
            .into_iter()
            .map(|c| c.join().expect("consumer panicked"))
            .sum();

        let n = PRODUCERS * PER_PRODUCER;
        assert_eq!(total, n * (n - 1) / 2, "every pushed item popped exactly once");
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.activity(), 2 * n);
    }

    // (6) Move-only items (Box) transfer ownership through the queue.
    #[test]
    fn test_move_only_items() {
        let queue: MtQueue<Box<String>> = MtQueue::new();
        queue.push(Box::new("owned".to_string()));
        let item = queue.wait_and_pop();
        assert_eq!(*item, "owned");
    }
}
