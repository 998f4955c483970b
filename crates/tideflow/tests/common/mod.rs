//! Shared helpers for the end-to-end scenarios: building well-formed BGZF
//! files block by block, mirroring the layout the reader parses.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

use flate2::{Compress, Compression, FlushCompress, Status};

/// Fixed header size of one BGZF member.
pub const HEADER_SIZE: usize = 18;
/// Fixed trailer size of one BGZF member.
pub const TRAILER_SIZE: usize = 8;
/// Largest uncompressed chunk placed in one block (the conventional bgzip
/// payload size, comfortably below the 64 KiB block limit).
pub const CHUNK_SIZE: usize = 65_280;

/// The terminal empty member every BGZF file ends with.
pub const EOF_MARKER: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Raw DEFLATE compression of `data` (no gzip wrapper).
pub fn deflate_raw(data: &[u8]) -> Vec<u8> {
    let mut compressor = Compress::new(Compression::default(), false);
    let mut out = Vec::with_capacity(data.len() + 64);
    loop {
        let consumed = compressor.total_in() as usize;
        let status = compressor
            .compress_vec(&data[consumed..], &mut out, FlushCompress::Finish)
            .expect("deflate failed");
        match status {
            Status::StreamEnd => break,
            _ => out.reserve(256),
        }
    }
    out
}

/// Builds one complete BGZF member holding `data`.
pub fn bgzf_block(data: &[u8]) -> Vec<u8> {
    assert!(data.len() <= 65_536, "block data above the 64 KiB limit");
    let payload = deflate_raw(data);
    let block_size = HEADER_SIZE + payload.len() + TRAILER_SIZE;
    let mut block = Vec::with_capacity(block_size);
    block.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff]);
    block.extend_from_slice(&6u16.to_le_bytes());
    block.push(b'B');
    block.push(b'C');
    block.extend_from_slice(&2u16.to_le_bytes());
    block.extend_from_slice(&((block_size - 1) as u16).to_le_bytes());
    block.extend_from_slice(&payload);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    block
}

/// Serializes `data` as a BGZF byte stream, chunked at [`CHUNK_SIZE`], with
/// the terminal EOF member appended.
pub fn bgzf_bytes(data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for chunk in data.chunks(CHUNK_SIZE) {
        bytes.extend_from_slice(&bgzf_block(chunk));
    }
    bytes.extend_from_slice(&EOF_MARKER);
    bytes
}

/// Writes `data` to `path` as a BGZF file.
pub fn write_bgzf(path: &Path, data: &[u8]) {
    let mut file = std::fs::File::create(path).expect("create bgz file");
    file.write_all(&bgzf_bytes(data)).expect("write bgz file");
    file.flush().expect("flush bgz file");
}

/// Writes explicit per-block chunks to `path`, one member per chunk.
pub fn write_bgzf_chunks(path: &Path, chunks: &[&[u8]]) {
    let mut file = std::fs::File::create(path).expect("create bgz file");
    for chunk in chunks {
        file.write_all(&bgzf_block(chunk)).expect("write bgz block");
    }
    file.write_all(&EOF_MARKER).expect("write EOF member");
    file.flush().expect("flush bgz file");
}
