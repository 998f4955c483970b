//! Foundational public types for the tideflow library.
//!
//! This module defines the data structures shared by the stream readers and
//! the decompression engine:
//! - [`LineRecord`] is the unit every stream produces: a 1-based line number
//!   plus the line text with its terminator stripped, or the EOF sentinel.
//! - [`StreamError`] is the structured error type for fallible stream
//!   operations (open, block read, framing, decompression).

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One record read from a line stream.
///
/// `Line` carries a dense, 1-based line number and the line content between
/// two `\n` delimiters (or between the last delimiter and end of file),
/// excluding the delimiter itself. `Eof` is the sentinel that terminates
/// every stream; it is an ordinary value and can be pushed through the
/// thread-safe queues like any other record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LineRecord {
    /// A line of text with its 1-based position in the stream.
    Line {
        /// 1-based line number; numbers are dense (1, 2, 3, ...).
        number: u64,
        /// Line content with the trailing `\n` removed.
        text: String,
    },

    /// End-of-stream sentinel.
    Eof,
}

impl LineRecord {
    /// Builds a line record from a number and its text.
    pub fn line(number: u64, text: String) -> Self {
        LineRecord::Line { number, text }
    }

    /// Returns `true` for the EOF sentinel.
    pub fn is_eof(&self) -> bool {
        matches!(self, LineRecord::Eof)
    }

    /// The line number, or `None` for the EOF sentinel.
    pub fn number(&self) -> Option<u64> {
        match self {
            LineRecord::Line { number, .. } => Some(*number),
            LineRecord::Eof => None,
        }
    }

    /// Consumes the record and returns `(number, text)`, or `None` for EOF.
    pub fn into_parts(self) -> Option<(u64, String)> {
        match self {
            LineRecord::Line { number, text } => Some((number, text)),
            LineRecord::Eof => None,
        }
    }
}

/// Structured error variants for stream open and read failures.
///
/// Errors local to a single block inside the decompression engine are logged
/// and degrade the stream to an error-EOF instead of surfacing here; callers
/// distinguish the two cases by checking `good()` after EOF.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The file could not be opened.
    #[error("could not open '{path}': {source}")]
    Open {
        /// Path as given by the caller.
        path: String,
        #[source]
        source: io::Error,
    },

    /// Short read or unexpected end of file inside a block.
    #[error("I/O error reading block {block_id}: {source}")]
    Read {
        /// 1-based id of the affected block.
        block_id: u64,
        #[source]
        source: io::Error,
    },

    /// Header or trailer bytes do not match the BGZF block structure.
    #[error("bad BGZF framing in block {block_id}: {reason}")]
    Framing { block_id: u64, reason: String },

    /// The DEFLATE payload of a block could not be inflated or failed the
    /// CRC/size check against its trailer.
    #[error("decompression failed for block {block_id}: {reason}")]
    Decompress { block_id: u64, reason: String },

    /// The stream is already active; `close()` must be called first.
    #[error("stream is already active; call close() first")]
    AlreadyActive,
}
