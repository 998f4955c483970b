//! Fixed-size thread pool consuming move-only callables off an internal
//! thread-safe queue.
//!
//! ## Design
//!
//! The pool queues `Option<Task>`: `Some` is work, `None` is the shutdown
//! token. Each worker loops on `wait_and_pop`; on `None` it re-enqueues the
//! token before exiting, so a single `None` cascades through every worker
//! regardless of pool size and shutdown needs no coordinated wake-ups.
//! Exactly one token is ever in the queue during shutdown.
//!
//! Work is submitted fire-and-forget ([`enqueue_void`](ThreadPool::enqueue_void))
//! or with a result handle ([`enqueue_future`](ThreadPool::enqueue_future))
//! that blocks on fulfilment.
//!
//! ## Zero unsafe blocks
//!
//! This file contains no `unsafe` code. All concurrency uses safe Rust APIs
//! (`Mutex`, `Condvar`, `mpsc`, `Arc`).

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::queue::MtQueue;
use crate::task::{Task, TaskHandle};

/// Fixed pool of worker threads over an internal [`MtQueue`] of callables.
pub struct ThreadPool {
    queue: Arc<MtQueue<Option<Task>>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool of `threads` workers (minimum one).
    ///
    /// Each worker thread is named `tideflow-pool-{id}` with a 0-based id.
    ///
    /// # Panics
    /// Panics if a worker thread cannot be spawned.
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let queue = Arc::new(MtQueue::new());
        let workers = (0..threads)
            .map(|id| {
                let queue = Arc::clone(&queue);
                std::thread::Builder::new()
                    .name(format!("tideflow-pool-{id}"))
                    .spawn(move || Self::worker_loop(&queue))
                    .expect("failed to spawn pool worker thread")
            })
            .collect();
        Self { queue, workers }
    }

    /// Default worker count: available hardware threads minus one, minimum
    /// one.
    pub fn default_threads() -> usize {
        num_cpus::get().saturating_sub(1).max(1)
    }

    /// Default worker count clamped to `job_size` queued jobs; one thread
    /// for an empty job.
    pub fn default_threads_for(job_size: usize) -> usize {
        if job_size == 0 {
            1
        } else {
            Self::default_threads().min(job_size)
        }
    }

    /// Submits fire-and-forget work.
    pub fn enqueue_void<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Some(Box::new(f)));
    }

    /// Submits work and returns a handle that yields the result when the
    /// worker completes it.
    pub fn enqueue_future<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (slot, handle) = TaskHandle::slot();
        self.queue.push(Some(Box::new(move || {
            // A dropped handle just discards the result.
            let _ = slot.send(f());
        })));
        handle
    }

    /// Number of worker threads in the pool.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of callables waiting in the internal queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn worker_loop(queue: &MtQueue<Option<Task>>) {
        loop {
            match queue.wait_and_pop() {
                Some(task) => task(),
                None => {
                    // Cascade the shutdown token to the next worker.
                    queue.push(None);
                    break;
                }
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.queue.push(None);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
