//! Unordered multi-threaded workflow over a thread-safe queue.
//!
//! ## Design
//!
//! An [`UnorderedWorkflow`] owns a work queue (unbounded [`MtQueue`] or
//! bounded [`TidalQueue`], chosen through the [`WorkQueue`] parameter) and a
//! set of worker threads that consume items in arbitrary order, applying the
//! registered task function to each. Nothing is guaranteed about the order
//! in which items are processed, with one exception: the stop token is the
//! last item observed.
//!
//! The queue carries `Option<T>`; `None` is the stop token. A worker that
//! dequeues `None` re-enqueues it and exits unless it is the last active
//! worker, in which case it calls the task function once with `None` (a
//! caller-visible flush hook), marks the workflow STOPPED and notifies
//! waiters. Workflows of this kind can be ganged together into multi-stage
//! processing by making one workflow's task function push into the next.
//!
//! A STOPPED workflow can be re-activated with a different task function and
//! thread count.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::queue::{MtQueue, WorkQueue};
use crate::tidal::TidalQueue;

/// Published lifecycle state of a workflow.
///
/// STOPPED before activation and after the stop token has been fully
/// processed; ACTIVE while workers are ready; SHUTDOWN between pushing the
/// stop token and the last worker retiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Active,
    Shutdown,
    Stopped,
}

struct FlowShared {
    state: Mutex<FlowState>,
    stopped: Condvar,
    active_threads: AtomicUsize,
}

/// Multi-threaded workflow without input/output ordering guarantees.
///
/// Generic over the work queue; see [`UnboundedWorkflow`] and
/// [`BoundedWorkflow`] for the two concrete shapes.
pub struct UnorderedWorkflow<T, Q>
where
    T: Send + 'static,
    Q: WorkQueue<Option<T>> + 'static,
{
    queue: Arc<Q>,
    shared: Arc<FlowShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    _marker: PhantomData<T>,
}

/// Unordered workflow over an unbounded queue.
pub type UnboundedWorkflow<T> = UnorderedWorkflow<T, MtQueue<Option<T>>>;

/// Unordered workflow over a bounded tidal queue.
pub type BoundedWorkflow<T> = UnorderedWorkflow<T, TidalQueue<Option<T>>>;

impl<T: Send + 'static> UnboundedWorkflow<T> {
    /// Creates a workflow over a fresh unbounded queue.
    pub fn unbounded() -> Self {
        Self::new(MtQueue::new())
    }
}

impl<T: Send + 'static> BoundedWorkflow<T> {
    /// Creates a workflow over a fresh tidal queue with the given tide band.
    pub fn bounded(high_tide: usize, low_tide: usize) -> Self {
        Self::new(TidalQueue::new(high_tide, low_tide))
    }
}

impl<T, Q> UnorderedWorkflow<T, Q>
where
    T: Send + 'static,
    Q: WorkQueue<Option<T>> + 'static,
{
    /// Creates a workflow over the supplied queue. The workflow starts
    /// STOPPED; call [`activate`](Self::activate) to spawn workers.
    pub fn new(queue: Q) -> Self {
        Self {
            queue: Arc::new(queue),
            shared: Arc::new(FlowShared {
                state: Mutex::new(FlowState::Stopped),
                stopped: Condvar::new(),
                active_threads: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    /// Spawns `threads` workers (minimum one) running `task` over queued
    /// items.
    ///
    /// `task` is shared read-only by all workers and receives `Some(item)`
    /// for work and `None` exactly once, from the last worker, when the stop
    /// token arrives.
    ///
    /// Returns `false` without side effects if the workflow is not STOPPED.
    pub fn activate<F>(&self, threads: usize, task: F) -> bool
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        {
            let state = self.shared.state.lock().expect("workflow state mutex poisoned");
            if *state != FlowState::Stopped {
                return false;
            }
        }

        let mut workers = self.workers.lock().expect("workflow workers mutex poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }

        let threads = threads.max(1);
        self.shared.active_threads.store(threads, Ordering::SeqCst);
        let task: Arc<dyn Fn(Option<T>) + Send + Sync> = Arc::new(task);
        for id in 0..threads {
            let queue = Arc::clone(&self.queue);
            let shared = Arc::clone(&self.shared);
            let task = Arc::clone(&task);
            let handle = std::thread::Builder::new()
                .name(format!("unordered-worker-{id}"))
                .spawn(move || Self::worker_loop(&queue, &shared, task.as_ref()))
                .expect("failed to spawn workflow worker thread");
            workers.push(handle);
        }

        let mut state = self.shared.state.lock().expect("workflow state mutex poisoned");
        *state = FlowState::Active;
        true
    }

    /// Enqueues one item of work.
    pub fn push(&self, item: T) {
        self.queue.push(Some(item));
    }

    /// Enqueues the stop token. It is guaranteed to be the last item the
    /// workflow observes; no item pushed after it is processed before the
    /// workflow stops.
    pub fn push_stop(&self) {
        {
            let mut state = self.shared.state.lock().expect("workflow state mutex poisoned");
            if *state == FlowState::Active {
                *state = FlowState::Shutdown;
            }
        }
        self.queue.push(None);
    }

    /// Current published state. Racy by nature: another thread may push the
    /// stop token between this read and any action taken on it.
    pub fn state(&self) -> FlowState {
        *self.shared.state.lock().expect("workflow state mutex poisoned")
    }

    /// Blocks until the workflow reaches STOPPED.
    pub fn wait_until_stopped(&self) {
        let mut state = self.shared.state.lock().expect("workflow state mutex poisoned");
        while *state != FlowState::Stopped {
            state = self
                .shared
                .stopped
                .wait(state)
                .expect("workflow stopped condvar poisoned");
        }
    }

    /// The underlying work queue, for size/activity observation.
    pub fn queue(&self) -> &Q {
        &self.queue
    }

    fn worker_loop(queue: &Q, shared: &FlowShared, task: &(dyn Fn(Option<T>) + Send + Sync)) {
        loop {
            match queue.wait_and_pop() {
                Some(item) => task(Some(item)),
                None => {
                    if shared.active_threads.fetch_sub(1, Ordering::AcqRel) != 1 {
                        // Not the last worker: cascade the stop token.
                        queue.push(None);
                    } else {
                        // Last worker: run the flush hook exactly once, then
                        // publish STOPPED.
                        task(None);
                        let mut state =
                            shared.state.lock().expect("workflow state mutex poisoned");
                        *state = FlowState::Stopped;
                        drop(state);
                        shared.stopped.notify_all();
                    }
                    return;
                }
            }
        }
    }
}

impl<T, Q> Drop for UnorderedWorkflow<T, Q>
where
    T: Send + 'static,
    Q: WorkQueue<Option<T>> + 'static,
{
    fn drop(&mut self) {
        let state = self.state();
        let mut workers = self.workers.lock().expect("workflow workers mutex poisoned");
        if !workers.is_empty() && state == FlowState::Active {
            self.queue.push(None);
        }
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    // (1) Every pushed item is processed exactly once.
    #[test]
    fn test_all_items_processed() {
        let flow = UnboundedWorkflow::unbounded();
        let sum = Arc::new(AtomicU64::new(0));
        let task_sum = Arc::clone(&sum);
        assert!(flow.activate(4, move |item: Option<u64>| {
            if let Some(value) = item {
                task_sum.fetch_add(value, Ordering::SeqCst);
            }
        }));
        for i in 1..=1_000u64 {
            flow.push(i);
        }
        flow.push_stop();
        flow.wait_until_stopped();
        assert_eq!(sum.load(Ordering::SeqCst), 1_000 * 1_001 / 2);
        assert_eq!(flow.queue().len(), 0, "queue drained after stop");
    }

    // (2) The flush hook (None) runs exactly once and last.
    #[test]
    fn test_stop_token_last_and_once() {
        let flow = BoundedWorkflow::bounded(64, 16);
        let processed = Arc::new(AtomicUsize::new(0));
        let flush_calls = Arc::new(AtomicUsize::new(0));
        let items_at_flush = Arc::new(AtomicUsize::new(usize::MAX));

        let task_processed = Arc::clone(&processed);
        let task_flush = Arc::clone(&flush_calls);
        let task_at_flush = Arc::clone(&items_at_flush);
        assert!(flow.activate(8, move |item: Option<u32>| match item {
            Some(_) => {
                task_processed.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                task_flush.fetch_add(1, Ordering::SeqCst);
                task_at_flush.store(task_processed.load(Ordering::SeqCst), Ordering::SeqCst);
            }
        }));

        const N: usize = 5_000;
        for i in 0..N as u32 {
            flow.push(i);
        }
        flow.push_stop();
        flow.wait_until_stopped();

        assert_eq!(processed.load(Ordering::SeqCst), N);
        assert_eq!(flush_calls.load(Ordering::SeqCst), 1, "flush hook must run exactly once");
        assert_eq!(
            items_at_flush.load(Ordering::SeqCst),
            N,
            "stop token must be observed after every item"
        );
        assert_eq!(flow.state(), FlowState::Stopped);
    }

    // (3) activate on an active workflow fails.
    #[test]
    fn test_activate_twice_fails() {
        let flow = UnboundedWorkflow::unbounded();
        assert!(flow.activate(2, |_: Option<u32>| {}));
        assert!(!flow.activate(2, |_: Option<u32>| {}), "second activate must fail");
        flow.push_stop();
        flow.wait_until_stopped();
    }

    // (4) A stopped workflow can be re-activated and processes new items.
    #[test]
    fn test_reactivation() {
        let flow = UnboundedWorkflow::unbounded();
        let first = Arc::new(AtomicUsize::new(0));
        let task_first = Arc::clone(&first);
        assert!(flow.activate(2, move |item: Option<u32>| {
            if item.is_some() {
                task_first.fetch_add(1, Ordering::SeqCst);
            }
        }));
        flow.push(1);
        flow.push_stop();
        flow.wait_until_stopped();
        assert_eq!(first.load(Ordering::SeqCst), 1);

        let second = Arc::new(AtomicUsize::new(0));
        let task_second = Arc::clone(&second);
        assert!(flow.activate(3, move |item: Option<u32>| {
            if item.is_some() {
                task_second.fetch_add(1, Ordering::SeqCst);
            }
        }));
        for i in 0..10 {
            flow.push(i);
        }
        flow.push_stop();
        flow.wait_until_stopped();
        assert_eq!(second.load(Ordering::SeqCst), 10);
    }

    // (5) Dropping an active workflow joins its workers cleanly.
    #[test]
    fn test_drop_active_workflow() {
        let flow = UnboundedWorkflow::unbounded();
        assert!(flow.activate(4, |_: Option<u32>| {}));
        flow.push(1);
        drop(flow);
        // Reaching this point means the drop-injected stop token cascaded.
    }
}
