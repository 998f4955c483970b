//! Bounded thread-safe queue with flood-tide / ebb-tide hysteresis.
//!
//! A [`TidalQueue`] holds at most `high_tide` items. Producers push freely
//! while the queue is in the FLOOD state; the push that raises the size to
//! the high-tide mark flips the queue to EBB and subsequent producers block.
//! Consumers drain the queue until the size falls to the low-tide mark,
//! which flips the state back to FLOOD and re-admits producers.
//!
//! The two thresholds form a hysteresis band: producers and consumers are
//! rate-decoupled without thrashing on a single boundary, and the pair is
//! the only CPU/memory knob operators need to tune.
//!
//! A tidal queue with no active consumers blocks its producers at high tide
//! forever. That is a stalled queue; it is diagnosed by the queue monitor
//! (see the `monitor` module), not prevented here.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::monitor::{QueueGauge, QueueMonitor};
use crate::queue::WorkQueue;

/// Default high-tide mark.
pub const DEFAULT_HIGH_TIDE: usize = 10_000;
/// Default low-tide mark.
pub const DEFAULT_LOW_TIDE: usize = 2_000;

/// The admission state of a tidal queue.
///
/// FLOOD: producers may push. EBB: producers are blocked until consumers
/// drain the queue to the low-tide mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tide {
    Flood,
    Ebb,
}

/// Bounded MPMC FIFO with high-tide / low-tide producer admission control.
pub struct TidalQueue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    flood: Condvar,
    gauge: Arc<QueueGauge>,
    _monitor: Option<QueueMonitor>,
}

impl<T> TidalQueue<T> {
    /// Creates a queue with the given tide marks.
    ///
    /// # Panics
    /// Panics unless `0 < low_tide < high_tide`; a malformed band is a
    /// programming error.
    pub fn new(high_tide: usize, low_tide: usize) -> Self {
        assert!(
            low_tide > 0 && low_tide < high_tide,
            "tidal queue requires 0 < low_tide < high_tide (got low {low_tide}, high {high_tide})"
        );
        Self {
            inner: Mutex::new(VecDeque::with_capacity(high_tide)),
            not_empty: Condvar::new(),
            flood: Condvar::new(),
            gauge: QueueGauge::tidal(high_tide, low_tide),
            _monitor: None,
        }
    }

    /// Creates a queue with an attached monitor that samples it every
    /// `interval` and reports under `name`.
    pub fn monitored(
        high_tide: usize,
        low_tide: usize,
        name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let mut queue = Self::new(high_tide, low_tide);
        let monitor = QueueMonitor::spawn(Arc::clone(&queue.gauge), name, interval);
        queue._monitor = Some(monitor);
        queue
    }

    /// Appends `value`, blocking while the queue is in the EBB state.
    ///
    /// The FLOOD to EBB transition happens inside the lock at the moment the
    /// push raises the size to the high-tide mark.
    pub fn push(&self, value: T) {
        {
            let mut inner = self.inner.lock().expect("TidalQueue mutex poisoned");
            while self.gauge.is_ebb() {
                inner = self.flood.wait(inner).expect("TidalQueue condvar poisoned");
            }
            inner.push_back(value);
            self.gauge.record_push();
            if self.gauge.len() >= self.gauge.high_tide() {
                self.gauge.set_ebb(true);
            }
        }
        self.not_empty.notify_one();
    }

    /// Removes and returns the front item, blocking only while the queue is
    /// empty.
    ///
    /// The EBB to FLOOD transition happens inside the lock at the moment the
    /// pop lowers the size to the low-tide mark.
    pub fn wait_and_pop(&self) -> T {
        let mut inner = self.inner.lock().expect("TidalQueue mutex poisoned");
        while inner.is_empty() {
            inner = self.not_empty.wait(inner).expect("TidalQueue condvar poisoned");
        }
        let value = inner.pop_front().expect("queue non-empty after wait");
        self.pop_bookkeeping();
        drop(inner);
        self.flood.notify_one();
        value
    }

    /// Removes and returns the front item, or `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("TidalQueue mutex poisoned");
        let value = inner.pop_front()?;
        self.pop_bookkeeping();
        drop(inner);
        self.flood.notify_one();
        Some(value)
    }

    /// Discards all items, resets the size to zero, sets the state to FLOOD
    /// and wakes every blocked producer.
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock().expect("TidalQueue mutex poisoned");
            inner.clear();
            self.gauge.reset_size();
            self.gauge.set_ebb(false);
        }
        self.flood.notify_all();
    }

    /// Current tide state.
    pub fn tide(&self) -> Tide {
        if self.gauge.is_ebb() { Tide::Ebb } else { Tide::Flood }
    }

    /// High-tide mark.
    pub fn high_tide(&self) -> usize {
        self.gauge.high_tide()
    }

    /// Low-tide mark.
    pub fn low_tide(&self) -> usize {
        self.gauge.low_tide()
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

    // Must be called with the queue lock held, after a successful pop.
    fn pop_bookkeeping(&self) {
        self.gauge.record_pop();
        if self.gauge.is_ebb() && self.gauge.len() <= self.gauge.low_tide() {
            self.gauge.set_ebb(false);
        }
    }
}

impl<T> Default for TidalQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_TIDE, DEFAULT_LOW_TIDE)
    }
}

impl<T: Send> WorkQueue<T> for TidalQueue<T> {
    fn push(&self, item: T) {
        TidalQueue::push(self, item);
    }

    fn wait_and_pop(&self) -> T {
        TidalQueue::wait_and_pop(self)
    }

    fn try_pop(&self) -> Option<T> {
        TidalQueue::try_pop(self)
    }

    fn len(&self) -> usize {
        TidalQueue::len(self)
    }

    fn activity(&self) -> usize {
        TidalQueue::activity(self)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
