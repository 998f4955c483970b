//! Order-preserving pipeline built from result handles.
//!
//! A [`Pipeline`] is a thread pool whose `push` returns work to the caller
//! through the queue itself: each pushed item is packaged with the shared
//! task function and a one-shot result slot, the package joins a bounded
//! tidal input queue for the workers, and the matching [`TaskHandle`] joins
//! a bounded tidal output queue in push order. A consumer that dequeues
//! handles in order therefore observes outputs in input order while the
//! workers run in parallel.
//!
//! Unlike the ordered workflow there are no re-ordering heaps, only one
//! in-flight slot per item; the price is head-of-line blocking, where a slow
//! item delays every handle behind it. If single threads push and pop, the
//! input-to-output ordering is exact; with several pushers or poppers the
//! ordering is per-push interleaving.
//!
//! Shutdown uses the runtime's cascade idiom: a `None` package makes each
//! worker re-enqueue the token and exit.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::task::{TaskHandle, TaskSlot};
use crate::tidal::{TidalQueue, DEFAULT_HIGH_TIDE, DEFAULT_LOW_TIDE};

type SharedTask<I, O> = Arc<dyn Fn(I) -> O + Send + Sync>;

/// One packaged unit of work: the shared task function, the input it owns,
/// and the slot its result fulfils. Opaque to callers; exposed only through
/// the input-queue observation accessor.
pub struct WorkPackage<I, O> {
    task: SharedTask<I, O>,
    input: I,
    slot: TaskSlot<O>,
}

/// Thread-pool pipeline with in-order result handles.
pub struct Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    input_queue: Arc<TidalQueue<Option<WorkPackage<I, O>>>>,
    output_queue: TidalQueue<TaskHandle<O>>,
    task: Mutex<Option<SharedTask<I, O>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates an inactive pipeline with the given tide band on both
    /// internal queues.
    pub fn new(high_tide: usize, low_tide: usize) -> Self {
        Self {
            input_queue: Arc::new(TidalQueue::new(high_tide, low_tide)),
            output_queue: TidalQueue::new(high_tide, low_tide),
            task: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Creates an inactive pipeline whose internal queues are monitored
    /// under `name` with an `-input` / `-output` suffix.
    pub fn monitored(
        high_tide: usize,
        low_tide: usize,
        name: &str,
        interval: Duration,
    ) -> Self {
        Self {
            input_queue: Arc::new(TidalQueue::monitored(
                high_tide,
                low_tide,
                format!("{name}-input"),
                interval,
            )),
            output_queue: TidalQueue::monitored(
                high_tide,
                low_tide,
                format!("{name}-output"),
                interval,
            ),
            task: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Installs `task` and spawns `threads` workers (minimum one). Any
    /// previously active workers are joined first, so the pipeline can be
    /// re-activated with a different task function.
    pub fn activate<F>(&self, threads: usize, task: F)
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        self.join_workers();
        {
            let mut shared = self.task.lock().expect("pipeline task mutex poisoned");
            *shared = Some(Arc::new(task));
        }

        let threads = threads.max(1);
        let mut workers = self.workers.lock().expect("pipeline workers mutex poisoned");
        for id in 0..threads {
            let input_queue = Arc::clone(&self.input_queue);
            let handle = std::thread::Builder::new()
                .name(format!("pipeline-worker-{id}"))
                .spawn(move || Self::worker_loop(&input_queue))
                .expect("failed to spawn pipeline worker thread");
            workers.push(handle);
        }
    }

    /// Packages `input` with the task function, enqueues it for the workers
    /// and pushes its result handle onto the output queue.
    ///
    /// May block at the high tide of either internal queue.
    ///
    /// # Panics
    /// Panics if the pipeline has not been activated.
    pub fn push(&self, input: I) {
        let task = self
            .task
            .lock()
            .expect("pipeline task mutex poisoned")
            .clone()
            .expect("pipeline not activated; call activate() first");
        let (slot, handle) = TaskHandle::slot();
        self.input_queue.push(Some(WorkPackage { task, input, slot }));
        self.output_queue.push(handle);
    }

    /// Dequeues the next result handle and blocks on its fulfilment.
    pub fn wait_and_pop(&self) -> O {
        self.output_queue.wait_and_pop().wait()
    }

    /// Joins the workers and discards everything buffered in both queues.
    pub fn clear(&self) {
        self.join_workers();
        self.input_queue.clear();
        self.output_queue.clear();
    }

    /// The input queue, for size/activity observation.
    pub fn input_queue(&self) -> &TidalQueue<Option<WorkPackage<I, O>>> {
        &self.input_queue
    }

    /// The output queue, for size/activity observation.
    pub fn output_queue(&self) -> &TidalQueue<TaskHandle<O>> {
        &self.output_queue
    }

    fn worker_loop(input_queue: &TidalQueue<Option<WorkPackage<I, O>>>) {
        loop {
            match input_queue.wait_and_pop() {
                Some(package) => {
                    let WorkPackage { task, input, slot } = package;
                    let output = (*task)(input);
                    // A dropped handle just discards the result.
                    let _ = slot.send(output);
                }
                None => {
                    // Cascade the shutdown token to the next worker.
                    input_queue.push(None);
                    break;
                }
            }
        }
    }

    fn join_workers(&self) {
        let mut workers = self.workers.lock().expect("pipeline workers mutex poisoned");
        if workers.is_empty() {
            return;
        }
        self.input_queue.push(None);
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        // Remove the residual cascade token (and any unprocessed packages).
        self.input_queue.clear();
    }
}

impl<I, O> Default for Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_TIDE, DEFAULT_LOW_TIDE)
    }
}

impl<I, O> Drop for Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn drop(&mut self) {
        self.join_workers();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
