//! Multi-threaded BGZF decompression and line reassembly.
//!
//! ## Pipeline
//!
//! 1. One reader thread walks the file block by block: it parses each fixed
//!    header, reads the compressed payload and trailer, tags the block with
//!    a 1-based id and pushes it into the decompression [`Pipeline`]. After
//!    the last block it pushes the stop token and checks the terminal
//!    28-byte EOF member.
//! 2. N pipeline workers inflate blocks in parallel and split each
//!    decompressed buffer on `\n`. A terminal newline yields a trailing
//!    empty token; the reassembly step depends on that.
//! 3. One reassembly thread consumes blocks in id order (the pipeline hands
//!    results back in push order), splices the partial line carried across
//!    each block boundary, and pushes numbered [`LineRecord`]s onto a
//!    bounded tidal line queue.
//!
//! [`read_line`](BgzStream::read_line) serves records strictly in file
//! order regardless of the worker count and never blocks once EOF has been
//! reached. Block failures are logged, flagged through
//! [`good`](BgzStream::good) and end the stream early with a clean EOF.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::bgzf::{
    check_eof_marker, inflate_block, parse_header, parse_trailer, CompressedBlock, EOF_MARKER,
    HEADER_SIZE, TRAILER_SIZE,
};
use crate::pipeline::Pipeline;
use crate::pool::ThreadPool;
use crate::stream::LineStream;
use crate::tidal::TidalQueue;
use crate::types::{LineRecord, StreamError};

/// Lifecycle of a [`BgzStream`]: ACTIVE between `open` and `close` (an EOF
/// condition is still ACTIVE), STOPPED otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgzStreamState {
    Active,
    Stopped,
}

/// One inflated block with its buffer already tokenized on `\n`.
struct DecompressedBlock {
    block_id: u64,
    lines: Vec<String>,
    ok: bool,
}

type BlockPipeline = Pipeline<Option<CompressedBlock>, Option<DecompressedBlock>>;

// Tide levels are guessed as reasonable values; the block queues are small
// because each entry holds up to 64 KiB.
const BLOCK_HIGH_TIDE: usize = 4_000;
const BLOCK_LOW_TIDE: usize = 2_000;
const LINE_HIGH_TIDE: usize = 20_000;
const LINE_LOW_TIDE: usize = 10_000;
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Multi-threaded block-gzip line stream.
///
/// Opening starts the reader, inflate workers and reassembler; the object
/// presents a stream-like [`read_line`](BgzStream::read_line) interface and
/// can be closed and re-opened on another file.
pub struct BgzStream {
    threads: usize,
    state: BgzStreamState,
    close_flag: Arc<AtomicBool>,
    error_flag: Arc<AtomicBool>,
    eof_flag: Arc<AtomicBool>,
    pipeline: Arc<BlockPipeline>,
    line_queue: Arc<TidalQueue<LineRecord>>,
    reader_thread: Option<ThreadPool>,
    assemble_thread: Option<ThreadPool>,
}

impl BgzStream {
    /// Creates a stopped stream that will decompress with `threads` workers;
    /// zero selects [`ThreadPool::default_threads`].
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 { ThreadPool::default_threads() } else { threads };
        Self {
            threads,
            state: BgzStreamState::Stopped,
            close_flag: Arc::new(AtomicBool::new(false)),
            error_flag: Arc::new(AtomicBool::new(false)),
            eof_flag: Arc::new(AtomicBool::new(false)),
            pipeline: Arc::new(Pipeline::monitored(
                BLOCK_HIGH_TIDE,
                BLOCK_LOW_TIDE,
                "bgz-decompress",
                MONITOR_INTERVAL,
            )),
            line_queue: Arc::new(TidalQueue::monitored(
                LINE_HIGH_TIDE,
                LINE_LOW_TIDE,
                "bgz-line-records",
                MONITOR_INTERVAL,
            )),
            reader_thread: None,
            assemble_thread: None,
        }
    }

    /// Opens `path` and returns the stream already decompressing.
    pub fn open_path<P: AsRef<Path>>(path: P, threads: usize) -> Result<Self, StreamError> {
        let mut stream = Self::new(threads);
        stream.open(path)?;
        Ok(stream)
    }

    /// Opens the file and starts the decompression stages. Fails if the
    /// stream is already ACTIVE or the file cannot be opened.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<(), StreamError> {
        if self.state == BgzStreamState::Active {
            error!("bgz stream is already active; call close() first");
            return Err(StreamError::AlreadyActive);
        }
        let path = path.as_ref().to_path_buf();
        let open_error = |source: std::io::Error| StreamError::Open {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(&path).map_err(open_error)?;
        let file_size = file.metadata().map_err(open_error)?.len();

        self.close_flag.store(false, Ordering::SeqCst);
        self.error_flag.store(false, Ordering::SeqCst);
        self.eof_flag.store(false, Ordering::SeqCst);
        self.line_queue.clear();

        self.pipeline
            .activate(self.threads, |block: Option<CompressedBlock>| {
                block.map(decompress_block)
            });

        let reader_thread = ThreadPool::new(1);
        {
            let pipeline = Arc::clone(&self.pipeline);
            let close_flag = Arc::clone(&self.close_flag);
            let error_flag = Arc::clone(&self.error_flag);
            reader_thread.enqueue_void(move || {
                read_loop(file, file_size, path, &pipeline, &close_flag, &error_flag);
            });
        }
        self.reader_thread = Some(reader_thread);

        let assemble_thread = ThreadPool::new(1);
        {
            let pipeline = Arc::clone(&self.pipeline);
            let line_queue = Arc::clone(&self.line_queue);
            let close_flag = Arc::clone(&self.close_flag);
            let error_flag = Arc::clone(&self.error_flag);
            let eof_flag = Arc::clone(&self.eof_flag);
            assemble_thread.enqueue_void(move || {
                assemble_loop(&pipeline, &line_queue, &close_flag, &error_flag, &eof_flag);
            });
        }
        self.assemble_thread = Some(assemble_thread);

        self.state = BgzStreamState::Active;
        Ok(())
    }

    /// Stops all stages, joins their threads and clears the internal
    /// queues. The stream can be re-opened afterwards. Idempotent.
    pub fn close(&mut self) {
        self.close_flag.store(true, Ordering::SeqCst);
        // Unpark an assembler blocked at the line-queue high tide so it can
        // observe the close flag and drain the pipeline.
        self.line_queue.clear();
        self.reader_thread = None;
        self.assemble_thread = None;
        self.pipeline.clear();
        self.line_queue.clear();
        self.state = BgzStreamState::Stopped;
    }

    /// Guaranteed sequential line reader; never blocks once EOF is reached.
    pub fn read_line(&mut self) -> LineRecord {
        if self.eof_flag.load(Ordering::SeqCst) && self.line_queue.is_empty() {
            return LineRecord::Eof;
        }
        self.line_queue.wait_and_pop()
    }

    /// `false` once any block has failed decompression or framing; the
    /// stream then ends early with a clean EOF.
    pub fn good(&self) -> bool {
        !self.error_flag.load(Ordering::SeqCst)
    }

    /// ACTIVE between `open` and `close`, STOPPED otherwise.
    pub fn state(&self) -> BgzStreamState {
        self.state
    }

    /// The bounded line queue, for size/activity observation.
    pub fn line_queue(&self) -> &TidalQueue<LineRecord> {
        &self.line_queue
    }
}

impl Drop for BgzStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl LineStream for BgzStream {
    fn read_line(&mut self) -> LineRecord {
        BgzStream::read_line(self)
    }

    fn good(&self) -> bool {
        BgzStream::good(self)
    }
}

// ── Reader stage ─────────────────────────────────────────────────────────────

fn read_loop(
    mut file: File,
    file_size: u64,
    path: PathBuf,
    pipeline: &BlockPipeline,
    close_flag: &AtomicBool,
    error_flag: &AtomicBool,
) {
    let eof_len = EOF_MARKER.len() as u64;
    if file_size < eof_len {
        error!(
            file = %path.display(),
            size = file_size,
            "file too small to hold the terminal EOF member"
        );
        error_flag.store(true, Ordering::SeqCst);
        pipeline.push(None);
        return;
    }

    let mut offset: u64 = 0;
    let mut block_id: u64 = 0;
    while offset < file_size - eof_len {
        if close_flag.load(Ordering::SeqCst) {
            pipeline.push(None);
            return;
        }
        block_id += 1;
        match read_block(&mut file, block_id) {
            Ok(block) => {
                offset += (HEADER_SIZE + block.payload.len() + TRAILER_SIZE) as u64;
                pipeline.push(Some(block));
            }
            Err(stream_error) => {
                error!(file = %path.display(), error = %stream_error, "compressed block read failed");
                error_flag.store(true, Ordering::SeqCst);
                pipeline.push(None);
                return;
            }
        }
    }

    // Stop token first so downstream can finish; then check the trailer.
    pipeline.push(None);
    if let Err(defect) = check_eof_marker(&mut file, file_size - offset) {
        warn!(file = %path.display(), "{defect}");
    }
}

fn read_block(file: &mut File, block_id: u64) -> Result<CompressedBlock, StreamError> {
    let read_error = |source: std::io::Error| StreamError::Read { block_id, source };

    let mut header_bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut header_bytes).map_err(read_error)?;
    let header = parse_header(block_id, &header_bytes)?;

    let mut payload = vec![0u8; header.payload_size()];
    file.read_exact(&mut payload).map_err(read_error)?;

    let mut trailer_bytes = [0u8; TRAILER_SIZE];
    file.read_exact(&mut trailer_bytes).map_err(read_error)?;
    let trailer = parse_trailer(block_id, &trailer_bytes)?;

    Ok(CompressedBlock {
        block_id,
        payload,
        crc: trailer.crc,
        uncompressed_size: trailer.uncompressed_size,
    })
}

// ── Decompression stage ──────────────────────────────────────────────────────

fn decompress_block(block: CompressedBlock) -> DecompressedBlock {
    match inflate_block(&block) {
        Ok(data) => DecompressedBlock {
            block_id: block.block_id,
            lines: split_lines(&data),
            ok: true,
        },
        Err(stream_error) => {
            error!(block = block.block_id, error = %stream_error, "block decompression failed");
            DecompressedBlock {
                block_id: block.block_id,
                lines: Vec::new(),
                ok: false,
            }
        }
    }
}

// A terminal '\n' yields a trailing empty token; the reassembler relies on
// that to distinguish a complete final line from a partial one.
fn split_lines(data: &[u8]) -> Vec<String> {
    data.split(|&byte| byte == b'\n')
        .map(|token| String::from_utf8_lossy(token).into_owned())
        .collect()
}

// ── Reassembly stage ─────────────────────────────────────────────────────────

fn assemble_loop(
    pipeline: &BlockPipeline,
    line_queue: &TidalQueue<LineRecord>,
    close_flag: &AtomicBool,
    error_flag: &AtomicBool,
    eof_flag: &AtomicBool,
) {
    let mut line_number: u64 = 0;
    let mut expected_block: u64 = 0;
    let mut carry: Option<String> = None;
    let mut dropped = false;

    // Once the close flag is up, records are discarded instead of queued so
    // a push can never re-park at the high tide while close() is joining.
    let push_record = |record: LineRecord| {
        if !close_flag.load(Ordering::SeqCst) {
            line_queue.push(record);
        }
    };

    loop {
        if close_flag.load(Ordering::SeqCst) {
            drain_pipeline(pipeline);
            dropped = true;
            break;
        }

        let Some(block) = pipeline.wait_and_pop() else {
            break;
        };
        if !block.ok {
            warn!(block = block.block_id, "dropping stream after failed block");
            error_flag.store(true, Ordering::SeqCst);
            drain_pipeline(pipeline);
            dropped = true;
            break;
        }

        expected_block += 1;
        if block.block_id != expected_block {
            warn!(
                queued = block.block_id,
                counted = expected_block,
                "block id mismatch"
            );
        }

        let token_count = block.lines.len();
        if token_count == 0 {
            continue;
        }
        let mut tokens = block.lines.into_iter();
        let first = tokens.next().expect("token count checked above");

        if token_count == 1 {
            // No newline anywhere in the block: the lone token extends the
            // carried partial line.
            match carry.as_mut() {
                Some(partial) => partial.push_str(&first),
                None => carry = Some(first),
            }
            continue;
        }

        // The first token completes the carried partial line.
        let first_line = match carry.take() {
            Some(mut partial) => {
                partial.push_str(&first);
                partial
            }
            None => first,
        };
        line_number += 1;
        push_record(LineRecord::line(line_number, first_line));

        // Middle tokens are complete lines; the final token is the next
        // carry (empty when the block ended with '\n').
        for _ in 1..token_count - 1 {
            let line = tokens.next().expect("middle token");
            line_number += 1;
            push_record(LineRecord::line(line_number, line));
        }
        carry = Some(tokens.next().expect("final token"));
    }

    // The final partial line belongs to the stream when it ended cleanly
    // without a trailing newline.
    if !dropped {
        if let Some(partial) = carry.take() {
            if !partial.is_empty() {
                line_number += 1;
                push_record(LineRecord::line(line_number, partial));
            }
        }
    }

    line_queue.push(LineRecord::Eof);
    eof_flag.store(true, Ordering::SeqCst);
}

fn drain_pipeline(pipeline: &BlockPipeline) {
    while pipeline.wait_and_pop().is_some() {}
}

// ── Tests ────────────────────────────────────────────────────────────────────
