//! Queue-buffered multi-threaded adapter over any line stream.
//!
//! As soon as [`open`](StreamBuffer::open) succeeds, one worker thread
//! drains the underlying stream into a bounded tidal queue; consumers take
//! records with [`read_line`](StreamBuffer::read_line). The EOF record is
//! re-enqueued when observed so that every blocked consumer unblocks, the
//! same cascade idiom the workflows use for their stop token.
//!
//! A single consumer sees records in file order. Multiple consumers are
//! safe, but the interleaving of lines across consumers is not defined.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::pool::ThreadPool;
use crate::stream::open_stream;
use crate::tidal::TidalQueue;
use crate::types::{LineRecord, StreamError};

const BUFFER_HIGH_TIDE: usize = 10_000;
const BUFFER_LOW_TIDE: usize = 2_000;
const BUFFER_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Pre-reading line buffer over the stream I/O facade.
pub struct StreamBuffer {
    queue: Arc<TidalQueue<LineRecord>>,
    eof: Arc<AtomicBool>,
    close_flag: Arc<AtomicBool>,
    reader_thread: Option<ThreadPool>,
    read_lock: Mutex<()>,
}

impl StreamBuffer {
    /// Creates a closed buffer; call [`open`](Self::open) to start reading.
    pub fn new() -> Self {
        Self {
            queue: Arc::new(TidalQueue::monitored(
                BUFFER_HIGH_TIDE,
                BUFFER_LOW_TIDE,
                "stream-buffer",
                BUFFER_MONITOR_INTERVAL,
            )),
            eof: Arc::new(AtomicBool::new(false)),
            close_flag: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            read_lock: Mutex::new(()),
        }
    }

    /// Opens `path` through the extension dispatch of
    /// [`open_stream`](crate::stream::open_stream) and starts the pre-reader
    /// thread. `decompression_threads` only affects block-gzip files.
    ///
    /// A closed buffer can be re-opened on another file.
    pub fn open<P: AsRef<Path>>(
        &mut self,
        path: P,
        decompression_threads: usize,
    ) -> Result<(), StreamError> {
        let mut stream = open_stream(path, decompression_threads)?;

        self.eof.store(false, Ordering::SeqCst);
        self.close_flag.store(false, Ordering::SeqCst);
        self.queue.clear();

        let queue = Arc::clone(&self.queue);
        let close_flag = Arc::clone(&self.close_flag);
        let reader_thread = ThreadPool::new(1);
        reader_thread.enqueue_void(move || loop {
            if close_flag.load(Ordering::SeqCst) {
                return;
            }
            let record = stream.read_line();
            let at_eof = record.is_eof();
            queue.push(record);
            if at_eof {
                return;
            }
        });
        self.reader_thread = Some(reader_thread);
        Ok(())
    }

    /// Takes the next buffered record. Blocks while the queue is empty and
    /// no EOF has been served; once EOF is observed it is re-enqueued so
    /// later calls (and other consumers) return without blocking.
    pub fn read_line(&self) -> LineRecord {
        let _serialize = self.read_lock.lock().expect("StreamBuffer read mutex poisoned");
        if self.eof.load(Ordering::SeqCst) && self.queue.is_empty() {
            return LineRecord::Eof;
        }
        let record = self.queue.wait_and_pop();
        if record.is_eof() {
            self.eof.store(true, Ordering::SeqCst);
            self.queue.push(LineRecord::Eof);
        }
        record
    }

    /// Stops the pre-reader, joins it and clears the queue. The buffer can
    /// be re-opened afterwards.
    pub fn close(&mut self) {
        self.close_flag.store(true, Ordering::SeqCst);
        // Unblock a reader parked at the high tide so it can observe the
        // close flag.
        self.queue.clear();
        self.reader_thread = None;
        self.queue.clear();
        self.eof.store(true, Ordering::SeqCst);
    }

    /// The buffered line queue, for size/activity observation.
    pub fn line_queue(&self) -> &TidalQueue<LineRecord> {
        &self.queue
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // (1) Buffered records match the file in order, then EOF repeats.
    #[test]
    fn test_buffered_read_in_order() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").expect("write file");

        let mut buffer = StreamBuffer::new();
        buffer.open(&path, 1).expect("open buffer");

        for expected in ["one", "two", "three"] {
            match buffer.read_line() {
                LineRecord::Line { text, .. } => assert_eq!(text, expected),
                LineRecord::Eof => panic!("premature EOF"),
            }
        }
        assert!(buffer.read_line().is_eof());
        assert!(buffer.read_line().is_eof(), "EOF must repeat without blocking");
    }

    // (2) Buffered lines are served before EOF even when the reader has
    // already finished the whole file.
    #[test]
    fn test_no_lines_lost_to_fast_reader() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("burst.txt");
        let content: String = (0..500).map(|i| format!("line-{i}\n")).collect();
        std::fs::write(&path, content).expect("write file");

        let mut buffer = StreamBuffer::new();
        buffer.open(&path, 1).expect("open buffer");
        // Give the pre-reader time to finish the entire file.
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut count = 0;
        while let LineRecord::Line { number, .. } = buffer.read_line() {
            count += 1;
            assert_eq!(number, count);
        }
        assert_eq!(count, 500, "every buffered line must be served before EOF");
    }

    // (3) Multiple consumers drain the buffer without losing records.
    #[test]
    fn test_multiple_consumers() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("shared.txt");
        let content: String = (0..1_000).map(|i| format!("{i}\n")).collect();
        std::fs::write(&path, content).expect("write file");

        let mut buffer = StreamBuffer::new();
        buffer.open(&path, 1).expect("open buffer");
        let buffer = Arc::new(buffer);

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    let mut seen = 0usize;
                    while !buffer.read_line().is_eof() {
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        let total: usize = consumers
            .into_iter()
            .map(|consumer| consumer.join().expect("consumer panicked"))
            .sum();
        assert_eq!(total, 1_000, "consumers together must see every line exactly once");
    }

    // (4) close() then open() re-uses the buffer.
    #[test]
    fn test_close_and_reopen() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, "f\n").expect("write first");
        std::fs::write(&second, "s\n").expect("write second");

        let mut buffer = StreamBuffer::new();
        buffer.open(&first, 1).expect("open first");
        assert_eq!(buffer.read_line().into_parts(), Some((1, "f".to_string())));
        buffer.close();

        buffer.open(&second, 1).expect("re-open second");
        assert_eq!(buffer.read_line().into_parts(), Some((1, "s".to_string())));
        assert!(buffer.read_line().is_eof());
    }
}
