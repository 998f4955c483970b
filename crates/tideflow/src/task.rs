//! Move-only callables and one-shot result handles.
//!
//! The thread pool and the pipeline queue callables whose captured state may
//! be move-only (owned buffers, file handles, result senders). Rust's boxed
//! `FnOnce` is exactly that type-erased move-only callable, so no custom
//! erasure is needed; [`Task`] is the alias the worker queues carry.
//!
//! [`TaskHandle`] is the consumer side of a one-shot result slot: the worker
//! fulfils the slot once, the holder blocks on [`wait`](TaskHandle::wait).
//! The slot is a rendezvous channel of capacity one, so fulfilment never
//! blocks the worker.

use std::sync::mpsc;

/// A type-erased move-only callable executed by a worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The sending side of a one-shot result slot.
pub type TaskSlot<T> = mpsc::SyncSender<T>;

/// A handle to a result that a worker thread will produce exactly once.
pub struct TaskHandle<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Creates a connected slot/handle pair.
    pub fn slot() -> (TaskSlot<T>, TaskHandle<T>) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (sender, TaskHandle { receiver })
    }

    /// Blocks until the worker fulfils the slot and returns the result.
    ///
    /// # Panics
    /// Panics if the slot was dropped unfulfilled, which only happens when
    /// the producing worker died; that is a programming error, not a
    /// recoverable condition.
    pub fn wait(self) -> T {
        self.receiver
            .recv()
            .expect("result slot dropped before fulfilment")
    }

    /// Returns the result if the slot has already been fulfilled.
    pub fn try_wait(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskHandle")
    }
}
