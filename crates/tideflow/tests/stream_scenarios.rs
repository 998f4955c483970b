//! End-to-end facade scenarios: extension dispatch, newline edge cases and
//! the buffered adapter.

mod common;

use std::io::Write;

use tideflow::{open_stream, LineRecord, StreamBuffer};

fn collect(stream: &mut dyn tideflow::LineStream) -> Vec<(u64, String)> {
    let mut lines = Vec::new();
    loop {
        match stream.read_line() {
            LineRecord::Line { number, text } => lines.push((number, text)),
            LineRecord::Eof => break,
        }
    }
    lines
}

/// Plain text, no trailing newline: exactly three records.
#[test]
fn test_plain_text_without_trailing_newline() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("s1.txt");
    std::fs::write(&path, "a\nbb\nccc").expect("write file");

    let mut stream = open_stream(&path, 1).expect("open stream");
    assert_eq!(
        collect(stream.as_mut()),
        vec![(1, "a".to_string()), (2, "bb".to_string()), (3, "ccc".to_string())]
    );
}

/// Plain text with a trailing newline: still exactly three records.
#[test]
fn test_plain_text_with_trailing_newline() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("s2.txt");
    std::fs::write(&path, "a\nbb\nccc\n").expect("write file");

    let mut stream = open_stream(&path, 1).expect("open stream");
    let lines = collect(stream.as_mut());
    assert_eq!(lines.len(), 3, "trailing newline must not become a fourth record");
    assert_eq!(lines[2], (3, "ccc".to_string()));
}

/// A .gz file carrying BGZF framing routes to the multi-threaded reader and
/// still yields the right records.
#[test]
fn test_gz_extension_with_bgzf_framing() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("framed.gz");
    std::fs::write(&path, common::bgzf_bytes(b"one\ntwo\n")).expect("write file");

    let mut stream = open_stream(&path, 2).expect("open stream");
    assert_eq!(
        collect(stream.as_mut()),
        vec![(1, "one".to_string()), (2, "two".to_string())]
    );
}

/// A .gz file written by an ordinary gzip encoder routes to the plain gzip
/// reader.
#[test]
fn test_gz_extension_plain_gzip() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("plain.gz");
    let file = std::fs::File::create(&path).expect("create file");
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(b"alpha\nbeta").expect("write gzip data");
    encoder.finish().expect("finish gzip stream");

    let mut stream = open_stream(&path, 4).expect("open stream");
    assert_eq!(
        collect(stream.as_mut()),
        vec![(1, "alpha".to_string()), (2, "beta".to_string())]
    );
}

/// The buffered adapter serves a BGZF file in order through its tidal
/// queue.
#[test]
fn test_buffer_over_bgzf() {
    const LINES: usize = 30_000;
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("buffered.bgz");
    let content: String = (0..LINES).map(|i| format!("variant-{i}\n")).collect();
    common::write_bgzf(&path, content.as_bytes());

    let mut buffer = StreamBuffer::new();
    buffer.open(&path, 4).expect("open buffer");

    let mut count = 0usize;
    loop {
        match buffer.read_line() {
            LineRecord::Line { number, text } => {
                assert_eq!(number as usize, count + 1, "buffered numbering must stay dense");
                assert_eq!(text, format!("variant-{count}"));
                count += 1;
            }
            LineRecord::Eof => break,
        }
    }
    assert_eq!(count, LINES);

    buffer.close();
    assert_eq!(buffer.line_queue().len(), 0, "queue must be empty after close");
}

/// Lines spanning BGZF block boundaries survive the facade dispatch.
#[test]
fn test_block_boundary_lines_via_facade() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("boundary.bgz");
    common::write_bgzf_chunks(&path, &[b"head\npart", b"ial\ntail\n"]);

    let mut stream = open_stream(&path, 2).expect("open stream");
    assert_eq!(
        collect(stream.as_mut()),
        vec![
            (1, "head".to_string()),
            (2, "partial".to_string()),
            (3, "tail".to_string()),
        ]
    );
}
