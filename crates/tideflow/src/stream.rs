//! Stream I/O facade: one line-reading interface over plain text, gzip,
//! bzip2 and block-gzip files.
//!
//! [`open_stream`] inspects the file extension (case-insensitive) and
//! returns the matching reader behind the [`LineStream`] trait:
//! - `.gz`: the first block header is peeked; block-gzip framing routes to
//!   the multi-threaded [`BgzStream`](crate::bgzstream::BgzStream), anything
//!   else to a plain gzip reader.
//! - `.bgz`: block gzip unconditionally.
//! - `.bz2`: Burrows-Wheeler decompression.
//! - anything else: plain text.
//!
//! Every variant produces [`LineRecord`]s with dense 1-based numbering and
//! the `\n` terminator stripped, and returns the EOF sentinel at end of
//! data. Read errors degrade to an error-EOF observable through
//! [`good`](LineStream::good).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use tracing::{info, warn};

use crate::bgzf::is_bgzf;
use crate::bgzstream::BgzStream;
use crate::types::{LineRecord, StreamError};

/// The uniform line-reading interface shared by all stream variants.
pub trait LineStream: Send {
    /// Returns the next line record, or the EOF sentinel. Does not block
    /// once EOF has been reached.
    fn read_line(&mut self) -> LineRecord;

    /// `true` while the stream has seen no integrity errors; a stream that
    /// ended early reports `false` after EOF.
    fn good(&self) -> bool {
        true
    }
}

/// Opens `path` and dispatches to the reader matching its extension.
///
/// `decompression_threads` is only meaningful for block-gzip files (zero
/// selects the hardware default); other stream types ignore it.
pub fn open_stream<P: AsRef<Path>>(
    path: P,
    decompression_threads: usize,
) -> Result<Box<dyn LineStream>, StreamError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_uppercase())
        .unwrap_or_default();

    match extension.as_str() {
        "GZ" => {
            if is_bgzf(path) {
                info!(file = %path.display(), "block-gzip framing detected, using the multi-threaded reader");
                Ok(Box::new(BgzStream::open_path(path, decompression_threads)?))
            } else {
                info!(file = %path.display(), "no block-gzip framing, using the general gzip reader");
                Ok(Box::new(GzStream::open(path)?))
            }
        }
        "BGZ" => Ok(Box::new(BgzStream::open_path(path, decompression_threads)?)),
        "BZ2" => Ok(Box::new(Bz2Stream::open(path)?)),
        _ => Ok(Box::new(TextStream::open(path)?)),
    }
}

fn open_file(path: &Path) -> Result<File, StreamError> {
    File::open(path).map_err(|source| StreamError::Open {
        path: path.display().to_string(),
        source,
    })
}

// Shared line-reading step: read up to '\n', strip it, number the record.
// Invalid UTF-8 is replaced rather than failing the stream.
fn next_line(
    reader: &mut impl BufRead,
    counter: &mut u64,
    error_flag: &mut bool,
) -> LineRecord {
    let mut buffer = Vec::new();
    match reader.read_until(b'\n', &mut buffer) {
        Ok(0) => LineRecord::Eof,
        Ok(_) => {
            if buffer.last() == Some(&b'\n') {
                buffer.pop();
            }
            *counter += 1;
            LineRecord::line(*counter, String::from_utf8_lossy(&buffer).into_owned())
        }
        Err(read_error) => {
            warn!(error = %read_error, "stream read failed, ending stream early");
            *error_flag = true;
            LineRecord::Eof
        }
    }
}

// ── Plain text ───────────────────────────────────────────────────────────────

/// Uncompressed record-based text file reader.
pub struct TextStream {
    reader: BufReader<File>,
    counter: u64,
    error: bool,
}

impl TextStream {
    /// Opens a plain text file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let file = open_file(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(file),
            counter: 0,
            error: false,
        })
    }
}

impl LineStream for TextStream {
    fn read_line(&mut self) -> LineRecord {
        next_line(&mut self.reader, &mut self.counter, &mut self.error)
    }

    fn good(&self) -> bool {
        !self.error
    }
}

// ── Plain gzip ───────────────────────────────────────────────────────────────

/// Single-threaded reader for ordinary (non-block) gzip files.
pub struct GzStream {
    reader: BufReader<MultiGzDecoder<File>>,
    counter: u64,
    error: bool,
}

impl GzStream {
    /// Opens a gzip-compressed text file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let file = open_file(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(MultiGzDecoder::new(file)),
            counter: 0,
            error: false,
        })
    }
}

impl LineStream for GzStream {
    fn read_line(&mut self) -> LineRecord {
        next_line(&mut self.reader, &mut self.counter, &mut self.error)
    }

    fn good(&self) -> bool {
        !self.error
    }
}

// ── bzip2 ────────────────────────────────────────────────────────────────────

/// Single-threaded reader for Burrows-Wheeler (.bz2) compressed files.
pub struct Bz2Stream {
    reader: BufReader<MultiBzDecoder<File>>,
    counter: u64,
    error: bool,
}

impl Bz2Stream {
    /// Opens a bzip2-compressed text file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StreamError> {
        let file = open_file(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(MultiBzDecoder::new(file)),
            counter: 0,
            error: false,
        })
    }
}

impl LineStream for Bz2Stream {
    fn read_line(&mut self) -> LineRecord {
        next_line(&mut self.reader, &mut self.counter, &mut self.error)
    }

    fn good(&self) -> bool {
        !self.error
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
