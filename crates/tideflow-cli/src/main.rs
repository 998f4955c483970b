use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tideflow::{bgzf, open_stream, LineRecord};
use tracing_subscriber::EnvFilter;

/// Stream and verify large genomic text files.
#[derive(Parser, Debug)]
#[command(name = "tideflow", about = "Stream and verify large genomic text files")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a text, gzip, bgz or bz2 file as numbered line records.
    Cat {
        /// File to stream; the reader is chosen by extension.
        file: PathBuf,

        /// Decompression threads for block-gzip files (0 = hardware default).
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Only count the lines instead of printing them.
        #[arg(long)]
        count_only: bool,
    },

    /// Verify the block structure of a BGZF file and emit a JSON result.
    Verify {
        /// BGZF file to check.
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Cat { file, threads, count_only } => cat(&file, threads, count_only),
        Command::Verify { file } => verify(&file),
    }
}

fn cat(file: &PathBuf, threads: usize, count_only: bool) -> ExitCode {
    let mut stream = match open_stream(file, threads) {
        Ok(stream) => stream,
        Err(open_error) => {
            eprintln!("Error opening {}: {open_error}", file.display());
            return ExitCode::FAILURE;
        }
    };

    let mut count: u64 = 0;
    loop {
        match stream.read_line() {
            LineRecord::Line { number, text } => {
                count = number;
                if !count_only {
                    println!("{number}\t{text}");
                }
            }
            LineRecord::Eof => break,
        }
    }

    if count_only {
        println!("{count}");
    }
    // An error-EOF means the file was only partially streamed.
    if stream.good() {
        ExitCode::SUCCESS
    } else {
        eprintln!("Error: stream ended early, output is incomplete");
        ExitCode::FAILURE
    }
}

fn verify(file: &PathBuf) -> ExitCode {
    let ok = bgzf::verify(file);
    let result = serde_json::json!({
        "file": file.display().to_string(),
        "ok": ok,
    });
    println!("{result}");
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
