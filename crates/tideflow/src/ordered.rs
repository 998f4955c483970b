//! Order-preserving multi-threaded workflow.
//!
//! ## Design
//!
//! An [`OrderedWorkflow`] has the same public contract as the unordered
//! workflow with one additional guarantee: for any two non-stop pushes A
//! then B, the output of A (if any) is emitted before the output of B, even
//! though workers process items out of order.
//!
//! Each push is tagged with a monotonically increasing sequence number under
//! the process mutex and the number is recorded in a request min-heap before
//! the item enters the bounded tidal input queue (the push may then block at
//! high tide; ordering is already established). Workers run the task
//! function outside the mutex, then re-acquire it: a result whose sequence
//! matches the top of the request heap is emitted directly and the processed
//! min-heap is drained while its top keeps matching; any other result parks
//! in the processed heap.
//!
//! Invariants:
//! - the request heap top is the smallest outstanding sequence;
//! - every pushed sequence is in exactly one of: request heap, processed
//!   heap, or already emitted;
//! - the output queue is strictly ordered by sequence.
//!
//! The task function may return `None` to skip producing an output; the
//! sequence is still consumed. The output queue is unbounded by default and
//! can be capped, in which case workers block on an output-room condition
//! before taking new input.

use std::cmp::Ordering as CmpOrdering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::queue::MtQueue;
use crate::tidal::{TidalQueue, DEFAULT_HIGH_TIDE, DEFAULT_LOW_TIDE};
use crate::unordered::FlowState;

/// Output queue size meaning "no cap".
pub const UNBOUNDED_OUTPUT: usize = 0;

/// A processed result parked until its sequence reaches the front.
struct ProcessedEntry<O> {
    sequence: u64,
    output: Option<O>,
}

impl<O> PartialEq for ProcessedEntry<O> {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl<O> Eq for ProcessedEntry<O> {}

impl<O> PartialOrd for ProcessedEntry<O> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<O> Ord for ProcessedEntry<O> {
    // Reversed so the smallest sequence sits at the heap top.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.sequence.cmp(&self.sequence)
    }
}

/// Re-ordering state guarded by the process mutex. Worker CPU work runs
/// outside this mutex; only the heap bookkeeping runs inside it.
struct ProcessInner<O> {
    sequence_counter: u64,
    requests: BinaryHeap<Reverse<u64>>,
    processed: BinaryHeap<ProcessedEntry<O>>,
}

struct ProcessShared<O> {
    inner: Mutex<ProcessInner<O>>,
    output_room: Condvar,
}

struct StateShared {
    state: Mutex<FlowState>,
    active: Condvar,
    stopped: Condvar,
    active_threads: AtomicUsize,
}

/// Multi-threaded workflow that emits outputs in input-submission order.
pub struct OrderedWorkflow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    input_queue: Arc<TidalQueue<(u64, Option<I>)>>,
    output_queue: Arc<MtQueue<O>>,
    process: Arc<ProcessShared<O>>,
    state: Arc<StateShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    max_output: usize,
}

impl<I, O> OrderedWorkflow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a workflow with the given input tide band and an unbounded
    /// output queue.
    pub fn new(high_tide: usize, low_tide: usize) -> Self {
        Self::build(TidalQueue::new(high_tide, low_tide), UNBOUNDED_OUTPUT)
    }

    /// Creates a workflow whose input queue is monitored under `name`.
    pub fn monitored(
        high_tide: usize,
        low_tide: usize,
        name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self::build(
            TidalQueue::monitored(high_tide, low_tide, name, interval),
            UNBOUNDED_OUTPUT,
        )
    }

    /// Creates a workflow whose output queue is capped at `max_output`
    /// results. Workers block before taking new input while the output queue
    /// is at the cap, which may in turn block producers at the input high
    /// tide.
    pub fn with_output_cap(high_tide: usize, low_tide: usize, max_output: usize) -> Self {
        Self::build(TidalQueue::new(high_tide, low_tide), max_output)
    }

    fn build(input_queue: TidalQueue<(u64, Option<I>)>, max_output: usize) -> Self {
        Self {
            input_queue: Arc::new(input_queue),
            output_queue: Arc::new(MtQueue::new()),
            process: Arc::new(ProcessShared {
                inner: Mutex::new(ProcessInner {
                    sequence_counter: 0,
                    requests: BinaryHeap::new(),
                    processed: BinaryHeap::new(),
                }),
                output_room: Condvar::new(),
            }),
            state: Arc::new(StateShared {
                state: Mutex::new(FlowState::Stopped),
                active: Condvar::new(),
                stopped: Condvar::new(),
                active_threads: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
            max_output,
        }
    }

    /// Spawns `threads` workers (minimum one) running `task`.
    ///
    /// `task` is shared read-only by all workers; it receives `Some(item)`
    /// for work and `None` exactly once when the stop token arrives, and may
    /// return `None` to skip emitting an output for that item.
    ///
    /// Returns `false` without side effects unless the workflow is STOPPED;
    /// a STOPPED workflow may be re-activated with a different task function
    /// and thread count.
    pub fn activate<F>(&self, threads: usize, task: F) -> bool
    where
        F: Fn(Option<I>) -> Option<O> + Send + Sync + 'static,
    {
        {
            let state = self.state.state.lock().expect("workflow state mutex poisoned");
            if *state != FlowState::Stopped {
                return false;
            }
        }

        let mut workers = self.workers.lock().expect("workflow workers mutex poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }

        let threads = threads.max(1);
        self.state.active_threads.store(threads, Ordering::SeqCst);
        let task: Arc<dyn Fn(Option<I>) -> Option<O> + Send + Sync> = Arc::new(task);
        for id in 0..threads {
            let input_queue = Arc::clone(&self.input_queue);
            let output_queue = Arc::clone(&self.output_queue);
            let process = Arc::clone(&self.process);
            let state = Arc::clone(&self.state);
            let task = Arc::clone(&task);
            let max_output = self.max_output;
            let handle = std::thread::Builder::new()
                .name(format!("ordered-worker-{id}"))
                .spawn(move || {
                    Self::worker_loop(
                        &input_queue,
                        &output_queue,
                        &process,
                        &state,
                        task.as_ref(),
                        max_output,
                    )
                })
                .expect("failed to spawn workflow worker thread");
            workers.push(handle);
        }

        {
            let mut state = self.state.state.lock().expect("workflow state mutex poisoned");
            *state = FlowState::Active;
        }
        self.state.active.notify_all();
        true
    }

    /// Enqueues one item, blocking until the workflow is ACTIVE (and then,
    /// possibly, at the input high tide).
    pub fn push(&self, item: I) {
        let mut item = item;
        loop {
            match self.try_push(item) {
                None => return,
                Some(returned) => {
                    item = returned;
                    self.wait_until_active();
                }
            }
        }
    }

    /// Enqueues one item if the workflow is ACTIVE; otherwise hands the item
    /// back to the caller. May still block briefly at the input high tide.
    pub fn try_push(&self, item: I) -> Option<I> {
        {
            let state = self.state.state.lock().expect("workflow state mutex poisoned");
            if *state != FlowState::Active {
                return Some(item);
            }
        }

        // Register the sequence before entering the tidal queue: the push
        // below may block, but ordering is already established.
        let sequence = {
            let mut inner = self.process.inner.lock().expect("workflow process mutex poisoned");
            inner.sequence_counter += 1;
            let sequence = inner.sequence_counter;
            inner.requests.push(Reverse(sequence));
            sequence
        };

        self.input_queue.push((sequence, Some(item)));
        None
    }

    /// Enqueues the stop token and transitions ACTIVE to SHUTDOWN. A no-op
    /// unless the workflow is ACTIVE.
    pub fn push_stop(&self) {
        {
            let mut state = self.state.state.lock().expect("workflow state mutex poisoned");
            if *state != FlowState::Active {
                return;
            }
            *state = FlowState::Shutdown;
        }
        // Sequence 0 is never assigned to an item, so the token bypasses the
        // re-ordering heaps entirely.
        self.input_queue.push((0, None));
    }

    /// Dequeues the next in-order output, blocking while none is available.
    pub fn wait_and_pop(&self) -> O {
        let output = self.output_queue.wait_and_pop();
        if self.max_output != UNBOUNDED_OUTPUT {
            // Room now exists; wake a worker parked on the output cap.
            self.process.output_room.notify_one();
        }
        output
    }

    /// Current published state. Racy by nature: another thread may push the
    /// stop token between this read and any action taken on it; prefer
    /// [`wait_until_stopped`](Self::wait_until_stopped).
    pub fn state(&self) -> FlowState {
        *self.state.state.lock().expect("workflow state mutex poisoned")
    }

    /// Blocks until the workflow reaches STOPPED.
    pub fn wait_until_stopped(&self) {
        let mut state = self.state.state.lock().expect("workflow state mutex poisoned");
        while *state != FlowState::Stopped {
            state = self
                .state
                .stopped
                .wait(state)
                .expect("workflow stopped condvar poisoned");
        }
    }

    /// Blocks until the workflow reaches ACTIVE.
    pub fn wait_until_active(&self) {
        let mut state = self.state.state.lock().expect("workflow state mutex poisoned");
        while *state != FlowState::Active {
            state = self
                .state
                .active
                .wait(state)
                .expect("workflow active condvar poisoned");
        }
    }

    /// The bounded input queue, for size/activity observation.
    pub fn input_queue(&self) -> &TidalQueue<(u64, Option<I>)> {
        &self.input_queue
    }

    /// The output queue, for size/activity observation.
    pub fn output_queue(&self) -> &MtQueue<O> {
        &self.output_queue
    }

    fn worker_loop(
        input_queue: &TidalQueue<(u64, Option<I>)>,
        output_queue: &MtQueue<O>,
        process: &ProcessShared<O>,
        state: &StateShared,
        task: &(dyn Fn(Option<I>) -> Option<O> + Send + Sync),
        max_output: usize,
    ) {
        loop {
            // The output cap is enforced by holding back input consumption;
            // the output queue itself cannot block because results are
            // emitted inside the critical section.
            if max_output != UNBOUNDED_OUTPUT {
                let mut inner = process.inner.lock().expect("workflow process mutex poisoned");
                while output_queue.len() >= max_output {
                    inner = process
                        .output_room
                        .wait(inner)
                        .expect("workflow output condvar poisoned");
                }
            }

            let (sequence, item) = input_queue.wait_and_pop();

            let Some(item) = item else {
                if state.active_threads.fetch_sub(1, Ordering::AcqRel) != 1 {
                    // Not the last worker: cascade the stop token.
                    input_queue.push((sequence, None));
                } else {
                    // Last worker: flush hook, optional final output, then
                    // publish STOPPED.
                    if let Some(output) = task(None) {
                        output_queue.push(output);
                    }
                    {
                        let mut flow_state =
                            state.state.lock().expect("workflow state mutex poisoned");
                        *flow_state = FlowState::Stopped;
                    }
                    state.stopped.notify_all();
                }
                // Peers parked on the output cap must re-check so the stop
                // token can cascade through them.
                process.output_room.notify_all();
                return;
            };

            // CPU work runs outside the process mutex.
            let output = task(Some(item));

            let mut inner = process.inner.lock().expect("workflow process mutex poisoned");
            if inner.requests.peek() == Some(&Reverse(sequence)) {
                inner.requests.pop();
                if let Some(output) = output {
                    output_queue.push(output);
                }
                // Drain parked results while they stay contiguous with the
                // smallest outstanding request.
                loop {
                    let next_matches = match (inner.requests.peek(), inner.processed.peek()) {
                        (Some(&Reverse(request)), Some(parked)) => request == parked.sequence,
                        _ => false,
                    };
                    if !next_matches {
                        break;
                    }
                    inner.requests.pop();
                    let parked = inner.processed.pop().expect("processed heap non-empty");
                    if let Some(output) = parked.output {
                        output_queue.push(output);
                    }
                }
            } else {
                inner.processed.push(ProcessedEntry { sequence, output });
            }
        }
    }
}

impl<I, O> Default for OrderedWorkflow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_TIDE, DEFAULT_LOW_TIDE)
    }
}

impl<I, O> Drop for OrderedWorkflow<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn drop(&mut self) {
        {
            let mut state = self.state.state.lock().expect("workflow state mutex poisoned");
            if *state == FlowState::Active {
                *state = FlowState::Shutdown;
                drop(state);
                self.input_queue.push((0, None));
            }
        }
        let mut workers = self.workers.lock().expect("workflow workers mutex poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // (1) Identity workflow: outputs arrive in exact input order despite
    // many workers.
    #[test]
    fn test_output_order_preserved() {
        const N: u64 = 20_000;
        let flow: Arc<OrderedWorkflow<u64, u64>> = Arc::new(OrderedWorkflow::new(256, 64));
        assert!(flow.activate(8, |item| item));

        let producer = {
            let flow = Arc::clone(&flow);
            std::thread::spawn(move || {
                for i in 1..=N {
                    flow.push(i);
                }
                flow.push_stop();
            })
        };

        for expected in 1..=N {
            assert_eq!(flow.wait_and_pop(), expected, "out-of-order output");
        }
        producer.join().expect("producer panicked");
        flow.wait_until_stopped();
        assert_eq!(flow.output_queue().len(), 0);
    }

    // (2) The task may skip outputs; emitted outputs keep ascending order.
    #[test]
    fn test_skipped_outputs_keep_order() {
        let flow: OrderedWorkflow<u64, u64> = OrderedWorkflow::new(128, 32);
        assert!(flow.activate(4, |item| item.filter(|value| value % 3 == 0)));

        for i in 1..=3_000u64 {
            flow.push(i);
        }
        flow.push_stop();
        flow.wait_until_stopped();

        let mut previous = 0;
        for _ in 0..1_000 {
            let value = flow.wait_and_pop();
            assert!(value > previous, "indices must be strictly increasing");
            assert_eq!(value % 3, 0);
            previous = value;
        }
        assert!(flow.output_queue().is_empty());
    }

    // (3) try_push on a stopped workflow returns the item.
    #[test]
    fn test_try_push_when_stopped() {
        let flow: OrderedWorkflow<u32, u32> = OrderedWorkflow::new(16, 4);
        assert_eq!(flow.try_push(9), Some(9), "stopped workflow must refuse items");
    }

    // (4) The flush hook may emit a final output after all items.
    #[test]
    fn test_flush_hook_output_is_last() {
        let flow: OrderedWorkflow<u32, u32> = OrderedWorkflow::new(64, 16);
        assert!(flow.activate(4, |item| match item {
            Some(value) => Some(value),
            None => Some(u32::MAX),
        }));
        for i in 1..=100 {
            flow.push(i);
        }
        flow.push_stop();
        for expected in 1..=100 {
            assert_eq!(flow.wait_and_pop(), expected);
        }
        assert_eq!(flow.wait_and_pop(), u32::MAX, "flush output must come last");
        flow.wait_until_stopped();
    }

    // (5) Re-activation works after a stop.
    #[test]
    fn test_reactivation() {
        let flow: OrderedWorkflow<u32, u32> = OrderedWorkflow::new(64, 16);
        assert!(flow.activate(2, |item| item));
        flow.push(1);
        flow.push_stop();
        assert_eq!(flow.wait_and_pop(), 1);
        flow.wait_until_stopped();

        assert!(flow.activate(3, |item| item.map(|value| value * 10)));
        flow.push(5);
        flow.push_stop();
        assert_eq!(flow.wait_and_pop(), 50);
        flow.wait_until_stopped();
    }

    // (6) A capped output queue stays near its cap while a slow consumer
    // drains it.
    #[test]
    fn test_output_cap_respected() {
        const CAP: usize = 8;
        let flow: Arc<OrderedWorkflow<u32, u32>> =
            Arc::new(OrderedWorkflow::with_output_cap(64, 16, CAP));
        assert!(flow.activate(4, |item| item));

        let producer = {
            let flow = Arc::clone(&flow);
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    flow.push(i);
                }
                flow.push_stop();
            })
        };

        let mut max_seen = 0;
        for expected in 0..200u32 {
            max_seen = max_seen.max(flow.output_queue().len());
            assert_eq!(flow.wait_and_pop(), expected);
            std::thread::sleep(std::time::Duration::from_micros(100));
        }
        producer.join().expect("producer panicked");
        flow.wait_until_stopped();
        // Workers hold back input while the cap is reached, so the queue can
        // only overshoot by the results already in flight (one per worker).
        assert!(
            max_seen <= CAP + 4,
            "output queue grew to {max_seen}, cap {CAP} plus in-flight slack exceeded"
        );
    }
}
