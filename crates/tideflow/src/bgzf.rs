//! BGZF block structure: parsing, verification and single-block inflation.
//!
//! A BGZF file (RFC 1952) is a concatenation of gzip members, each carrying
//! a 6-byte extra subfield identified by the ASCII bytes `B`,`C` whose
//! 2-byte payload `BSIZE` records the total member size minus one. The
//! member payload is raw DEFLATE; the trailer carries the CRC32 of the
//! uncompressed data and its size, which must not exceed 64 KiB. The file
//! ends with a fixed 28-byte empty member ([`EOF_MARKER`]).
//!
//! Headers are parsed field by field with explicit little-endian reads;
//! nothing is ever cast from raw memory, so there are no layout or padding
//! hazards.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use flate2::{Decompress, FlushDecompress, Status};
use tracing::{error, info, warn};

use crate::types::StreamError;

/// Maximum uncompressed size of one block.
pub const MAX_UNCOMPRESSED_SIZE: usize = 65_536;

/// Fixed gzip-plus-subfield header size.
pub const HEADER_SIZE: usize = 18;

/// Fixed trailer size (CRC32 + uncompressed size).
pub const TRAILER_SIZE: usize = 8;

/// The empty gzip member every BGZF file must end with.
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

// Mandatory structural constants. Don't change these.
const BLOCK_ID1: u8 = 0x1f;
const BLOCK_ID2: u8 = 0x8b;
const SUBFIELD_ID1: u8 = b'B';
const SUBFIELD_ID2: u8 = b'C';
const EXTRA_LENGTH: u16 = 6;

const MIN_BLOCK_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

// ── Header and trailer ───────────────────────────────────────────────────────

/// The validated fields of one block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Total member size in bytes, header and trailer included (BSIZE + 1).
    pub block_size: usize,
}

impl BlockHeader {
    /// Size of the raw DEFLATE payload between header and trailer.
    pub fn payload_size(&self) -> usize {
        self.block_size - MIN_BLOCK_SIZE
    }
}

/// The validated fields of one block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrailer {
    /// CRC32 of the uncompressed block data.
    pub crc: u32,
    /// Uncompressed data size recorded in the trailer.
    pub uncompressed_size: usize,
}

/// Parses and validates an 18-byte block header.
///
/// Checks the fields that are structural constants: both gzip ID bytes,
/// both subfield ID bytes, the extra-field length, and the BSIZE bounds.
pub fn parse_header(block_id: u64, bytes: &[u8; HEADER_SIZE]) -> Result<BlockHeader, StreamError> {
    let framing = |reason: String| StreamError::Framing { block_id, reason };

    if bytes[0] != BLOCK_ID1 {
        return Err(framing(format!(
            "bad gzip id byte 1: {:#04x}, expected {BLOCK_ID1:#04x}",
            bytes[0]
        )));
    }
    if bytes[1] != BLOCK_ID2 {
        return Err(framing(format!(
            "bad gzip id byte 2: {:#04x}, expected {BLOCK_ID2:#04x}",
            bytes[1]
        )));
    }
    let extra_length = u16::from_le_bytes([bytes[10], bytes[11]]);
    if extra_length != EXTRA_LENGTH {
        return Err(framing(format!(
            "bad extra field length: {extra_length}, expected {EXTRA_LENGTH}"
        )));
    }
    if bytes[12] != SUBFIELD_ID1 {
        return Err(framing(format!(
            "bad subfield id byte 1: {:#04x}, expected {SUBFIELD_ID1:#04x}",
            bytes[12]
        )));
    }
    if bytes[13] != SUBFIELD_ID2 {
        return Err(framing(format!(
            "bad subfield id byte 2: {:#04x}, expected {SUBFIELD_ID2:#04x}",
            bytes[13]
        )));
    }

    let block_size = usize::from(u16::from_le_bytes([bytes[16], bytes[17]])) + 1;
    if block_size < MIN_BLOCK_SIZE {
        return Err(framing(format!(
            "declared block size {block_size} below the {MIN_BLOCK_SIZE} byte minimum"
        )));
    }
    let header = BlockHeader { block_size };
    if header.payload_size() > MAX_UNCOMPRESSED_SIZE {
        return Err(framing(format!(
            "compressed payload size {} exceeds the {MAX_UNCOMPRESSED_SIZE} byte block limit",
            header.payload_size()
        )));
    }
    Ok(header)
}

/// Parses and validates an 8-byte block trailer.
pub fn parse_trailer(block_id: u64, bytes: &[u8; TRAILER_SIZE]) -> Result<BlockTrailer, StreamError> {
    let crc = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let uncompressed_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if uncompressed_size > MAX_UNCOMPRESSED_SIZE {
        return Err(StreamError::Framing {
            block_id,
            reason: format!(
                "uncompressed size {uncompressed_size} exceeds the {MAX_UNCOMPRESSED_SIZE} byte block limit"
            ),
        });
    }
    Ok(BlockTrailer { crc, uncompressed_size })
}

// ── Blocks ───────────────────────────────────────────────────────────────────

/// One compressed block read from the file, exclusively owned by whichever
/// stage currently holds it.
#[derive(Debug)]
pub struct CompressedBlock {
    /// 1-based position of the block in the file.
    pub block_id: u64,
    /// Raw DEFLATE payload between header and trailer.
    pub payload: Vec<u8>,
    /// Trailer CRC32 of the uncompressed data.
    pub crc: u32,
    /// Trailer uncompressed size.
    pub uncompressed_size: usize,
}

/// Inflates one block payload and checks it against the trailer.
///
/// Any inflate status other than end-of-stream fails the block, as does a
/// size or CRC32 mismatch with the trailer.
pub fn inflate_block(block: &CompressedBlock) -> Result<Vec<u8>, StreamError> {
    let decompress_error = |reason: String| StreamError::Decompress {
        block_id: block.block_id,
        reason,
    };

    let mut inflater = Decompress::new(false);
    let mut data = Vec::with_capacity(MAX_UNCOMPRESSED_SIZE);
    match inflater.decompress_vec(&block.payload, &mut data, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => {}
        Ok(_) => {
            return Err(decompress_error(
                "inflate did not reach end of stream within the block limit".to_string(),
            ));
        }
        Err(inflate_error) => {
            return Err(decompress_error(format!("inflate failed: {inflate_error}")));
        }
    }

    if data.len() != block.uncompressed_size {
        return Err(decompress_error(format!(
            "inflated size {} does not match trailer size {}",
            data.len(),
            block.uncompressed_size
        )));
    }
    if crc32fast::hash(&data) != block.crc {
        return Err(decompress_error("CRC32 mismatch with block trailer".to_string()));
    }
    Ok(data)
}

// ── File-level checks ────────────────────────────────────────────────────────

/// Returns `true` when the file starts with a valid BGZF block header.
///
/// This is the cheap signature peek used to distinguish block-gzipped files
/// from plain gzip behind a shared `.gz` extension; I/O failures count as
/// "not BGZF".
pub fn is_bgzf<P: AsRef<Path>>(path: P) -> bool {
    let mut header_bytes = [0u8; HEADER_SIZE];
    let Ok(mut file) = File::open(path.as_ref()) else {
        return false;
    };
    if file.read_exact(&mut header_bytes).is_err() {
        return false;
    }
    parse_header(1, &header_bytes).is_ok()
}

/// Walks the whole file without decompressing and checks every structural
/// field plus the terminal EOF member. Returns `true` for a conformant
/// file; every defect is logged before returning `false`.
///
/// Reads the entire file, so this may be slow on very large inputs.
pub fn verify<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(open_error) => {
            warn!(file = %path.display(), error = %open_error, "verify: cannot open file");
            return false;
        }
    };
    let file_size = match file.metadata() {
        Ok(metadata) => metadata.len(),
        Err(metadata_error) => {
            warn!(file = %path.display(), error = %metadata_error, "verify: cannot stat file");
            return false;
        }
    };
    info!(file = %path.display(), size = file_size, "verifying bgz file structure");

    if file_size < EOF_MARKER.len() as u64 {
        error!(
            file = %path.display(),
            size = file_size,
            "file too small to hold the terminal EOF member"
        );
        return false;
    }

    let mut offset: u64 = 0;
    let mut block_count: u64 = 0;
    let mut total_compressed: u64 = 0;
    let mut total_uncompressed: u64 = 0;

    while offset < file_size - EOF_MARKER.len() as u64 {
        block_count += 1;

        let mut header_bytes = [0u8; HEADER_SIZE];
        if let Err(read_error) = file.read_exact(&mut header_bytes) {
            error!(block = block_count, error = %read_error, "header read failed");
            return false;
        }
        let header = match parse_header(block_count, &header_bytes) {
            Ok(header) => header,
            Err(framing_error) => {
                error!(block = block_count, error = %framing_error, "header check failed");
                return false;
            }
        };
        offset += HEADER_SIZE as u64;

        // Skip the compressed payload; verify only checks structure.
        let payload_size = header.payload_size() as u64;
        if let Err(seek_error) = file.seek(SeekFrom::Current(payload_size as i64)) {
            error!(block = block_count, error = %seek_error, "payload seek failed");
            return false;
        }
        offset += payload_size;
        total_compressed += payload_size;

        let mut trailer_bytes = [0u8; TRAILER_SIZE];
        if let Err(read_error) = file.read_exact(&mut trailer_bytes) {
            error!(block = block_count, error = %read_error, "trailer read failed");
            return false;
        }
        let trailer = match parse_trailer(block_count, &trailer_bytes) {
            Ok(trailer) => trailer,
            Err(framing_error) => {
                error!(block = block_count, error = %framing_error, "trailer check failed");
                return false;
            }
        };
        offset += TRAILER_SIZE as u64;
        total_uncompressed += trailer.uncompressed_size as u64;
    }

    if let Err(defect) = check_eof_marker(&mut file, file_size - offset) {
        error!(file = %path.display(), "{defect}");
        return false;
    }

    info!(
        file = %path.display(),
        blocks = block_count,
        uncompressed = total_uncompressed,
        compressed = total_compressed,
        "bgz file structure verified"
    );
    true
}

/// Checks that exactly the 28 EOF-member bytes remain and match
/// [`EOF_MARKER`]. On mismatch, returns a description naming the observed
/// and expected values; the caller chooses the log severity (streaming mode
/// warns and keeps its decoded lines, verify mode fails the file).
pub(crate) fn check_eof_marker(file: &mut File, remaining: u64) -> Result<(), String> {
    if remaining != EOF_MARKER.len() as u64 {
        return Err(format!(
            "EOF member byte count mismatch: {remaining} bytes remain, expected {}",
            EOF_MARKER.len()
        ));
    }

    let mut marker = [0u8; EOF_MARKER.len()];
    file.read_exact(&mut marker)
        .map_err(|read_error| format!("EOF member read failed: {read_error}"))?;
    for (index, (observed, expected)) in marker.iter().zip(EOF_MARKER.iter()).enumerate() {
        if observed != expected {
            return Err(format!(
                "EOF member byte {index} is {observed:#04x}, expected {expected:#04x}"
            ));
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
