//! Kanzi CLI - lossless block compressor
//!
//! Compresses a file through a configurable transform chain and entropy
//! coder into a self-describing `.knz` container, and back.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use kanzi_core::error::KanziError;
use kanzi_core::event::{Event, EventType, Listener};
use kanzi_io::{CompressedInputStream, CompressedOutputStream, Config};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

// Exit codes, matching the original tool
const ERR_CREATE_COMPRESSOR: u8 = 4;
const ERR_OUTPUT_IS_DIR: u8 = 5;
const ERR_OVERWRITE_FILE: u8 = 6;
const ERR_OPEN_FILE: u8 = 7;
const ERR_READ_FILE: u8 = 8;
const ERR_WRITE_FILE: u8 = 9;
const ERR_PROCESS_BLOCK: u8 = 10;
const ERR_CREATE_DECOMPRESSOR: u8 = 11;
const ERR_INVALID_PARAM: u8 = 12;
const ERR_CREATE_FILE: u8 = 13;
const ERR_STREAM_VERSION: u8 = 14;
const ERR_CRC_CHECK: u8 = 15;
const ERR_INVALID_FILE: u8 = 16;
const ERR_UNKNOWN: u8 = 127;

#[derive(Parser)]
#[command(name = "kanzi")]
#[command(author, version, about = "Lossless block compressor")]
#[command(long_about = "
Kanzi cuts the input into fixed-size blocks, runs each through a chain of
reversible transforms and an entropy coder, and writes a self-describing
container.

Examples:
  kanzi compress file.txt
  kanzi compress -t BWT+RANK+ZRLT -e ANS0 -b 4m -j 4 file.txt
  kanzi compress -l 4 file.txt -o archive.knz
  kanzi decompress archive.knz -o file.txt
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file
    #[command(alias = "c")]
    Compress {
        /// Input file
        input: PathBuf,

        /// Output file (default: input + ".knz")
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Block size, with optional k/m/g suffix
        #[arg(short, long, default_value = "1m")]
        block: String,

        /// Worker count
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Entropy codec: NONE, HUFFMAN, ANS0, ANS1, RANGE, FPAQ, PAQ, CM, TPAQ, TPAQX
        #[arg(short, long, default_value = "ANS0")]
        entropy: String,

        /// Transform chain, e.g. BWT+RANK+ZRLT
        #[arg(short, long, default_value = "BWT+RANK+ZRLT")]
        transform: String,

        /// Preset level 0..5 overriding entropy and transform
        #[arg(short, long)]
        level: Option<u32>,

        /// Add per-block checksums
        #[arg(short = 'x', long)]
        checksum: bool,

        /// Store blocks that look incompressible
        #[arg(long)]
        skip_blocks: bool,

        /// Overwrite the output file if it exists
        #[arg(short, long)]
        force: bool,

        /// Print block events
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decompress a container
    #[command(alias = "d")]
    Decompress {
        /// Input container
        input: PathBuf,

        /// Output file (default: input without ".knz")
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker count
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Overwrite the output file if it exists
        #[arg(short, long)]
        force: bool,

        /// Print block events
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Parse sizes like "65536", "64k", "4m", "1g".
fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim().to_ascii_lowercase();
    let (num, mult) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1024),
        'm' => (&s[..s.len() - 1], 1024 * 1024),
        'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (&s[..], 1),
    };

    num.parse::<usize>().ok().map(|n| n * mult)
}

/// Prints block events as they happen.
struct VerboseListener;

impl Listener for VerboseListener {
    fn process_event(&self, event: &Event) {
        eprintln!("{event}");
    }
}

/// Advances a progress bar on each committed block.
struct ProgressListener {
    bar: ProgressBar,
    block_size: u64,
}

impl Listener for ProgressListener {
    fn process_event(&self, event: &Event) {
        if event.event_type == EventType::AfterEntropy {
            self.bar.inc(self.block_size);
        }
    }
}

fn exit_code_for(err: &KanziError) -> u8 {
    match err {
        KanziError::Io(_) => ERR_READ_FILE,
        KanziError::InvalidArgument { .. } => ERR_INVALID_PARAM,
        KanziError::InvalidCodec { .. } => ERR_INVALID_PARAM,
        KanziError::BlockSize { .. } => ERR_INVALID_PARAM,
        KanziError::StreamVersion { .. } => ERR_STREAM_VERSION,
        KanziError::InvalidMagic { .. } => ERR_INVALID_FILE,
        KanziError::CrcMismatch { .. } => ERR_CRC_CHECK,
        KanziError::InvalidStream { .. } => ERR_INVALID_FILE,
        KanziError::Transform { .. } | KanziError::Entropy { .. } => ERR_PROCESS_BLOCK,
        KanziError::BitStreamEof | KanziError::BitStreamClosed => ERR_INVALID_FILE,
    }
}

fn io_exit_code(err: &io::Error) -> u8 {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<KanziError>())
    {
        Some(k) => exit_code_for(k),
        None => ERR_PROCESS_BLOCK,
    }
}

fn check_output(path: &Path, force: bool) -> Result<(), u8> {
    if path.is_dir() {
        eprintln!("The output file {} is a directory", path.display());
        return Err(ERR_OUTPUT_IS_DIR);
    }

    if path.exists() && !force {
        eprintln!(
            "The output file {} exists (use --force to overwrite)",
            path.display()
        );
        return Err(ERR_OVERWRITE_FILE);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compress_file(
    input: &Path,
    output: Option<PathBuf>,
    block: &str,
    jobs: usize,
    entropy: &str,
    transform: &str,
    level: Option<u32>,
    checksum: bool,
    skip_blocks: bool,
    force: bool,
    verbose: bool,
) -> Result<(), u8> {
    let output = output.unwrap_or_else(|| {
        let mut p = input.as_os_str().to_owned();
        p.push(".knz");
        PathBuf::from(p)
    });
    check_output(&output, force)?;

    let mut cfg = match level {
        Some(l) => Config::from_level(l),
        None => Config::from_names(entropy, transform),
    }
    .map_err(|e| {
        eprintln!("{e}");
        ERR_INVALID_PARAM
    })?;

    cfg.block_size = parse_size(block).ok_or_else(|| {
        eprintln!("Invalid block size: {block}");
        ERR_INVALID_PARAM
    })?;
    cfg.jobs = jobs;
    cfg.checksum = checksum;
    cfg.skip_blocks = skip_blocks;

    let in_file = File::open(input).map_err(|e| {
        eprintln!("Cannot open input file {}: {e}", input.display());
        ERR_OPEN_FILE
    })?;
    let file_size = in_file.metadata().map(|m| m.len()).ok();
    cfg.file_size = file_size;

    let out_file = File::create(&output).map_err(|e| {
        eprintln!("Cannot create output file {}: {e}", output.display());
        ERR_CREATE_FILE
    })?;

    let mut cos =
        CompressedOutputStream::new(BufWriter::new(out_file), &cfg).map_err(|e| {
            eprintln!("Cannot create compressor: {e}");

            if matches!(e, KanziError::InvalidArgument { .. }) {
                ERR_INVALID_PARAM
            } else {
                ERR_CREATE_COMPRESSOR
            }
        })?;

    if verbose {
        cos.add_listener(Arc::new(VerboseListener));
    }

    let bar = file_size.filter(|&sz| sz > 0).map(|sz| {
        let bar = ProgressBar::new(sz);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes}")
                .expect("progress template"),
        );
        cos.add_listener(Arc::new(ProgressListener {
            bar: bar.clone(),
            block_size: cfg.block_size as u64,
        }));
        bar
    });

    let mut reader = BufReader::new(in_file);
    let mut buf = vec![0u8; 65536];
    let mut read_total = 0u64;

    loop {
        let n = reader.read(&mut buf).map_err(|e| {
            eprintln!("Read error: {e}");
            ERR_READ_FILE
        })?;

        if n == 0 {
            break;
        }

        read_total += n as u64;
        cos.write_bytes(&buf[..n]).map_err(|e| {
            eprintln!("{e}");
            exit_code_for(&e)
        })?;
    }

    cos.close().map_err(|e| {
        eprintln!("{e}");
        ERR_WRITE_FILE
    })?;

    let written = cos.written();

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    println!(
        "{}: {} => {} bytes ({:.2}%)",
        input.display(),
        read_total,
        written,
        if read_total > 0 {
            written as f64 * 100.0 / read_total as f64
        } else {
            0.0
        }
    );

    Ok(())
}

fn decompress_file(
    input: &Path,
    output: Option<PathBuf>,
    jobs: usize,
    force: bool,
    verbose: bool,
) -> Result<(), u8> {
    let output = output.unwrap_or_else(|| {
        match input.extension().and_then(|e| e.to_str()) {
            Some("knz") => input.with_extension(""),
            _ => {
                let mut p = input.as_os_str().to_owned();
                p.push(".out");
                PathBuf::from(p)
            }
        }
    });
    check_output(&output, force)?;

    let in_file = File::open(input).map_err(|e| {
        eprintln!("Cannot open input file {}: {e}", input.display());
        ERR_OPEN_FILE
    })?;

    let out_file = File::create(&output).map_err(|e| {
        eprintln!("Cannot create output file {}: {e}", output.display());
        ERR_CREATE_FILE
    })?;

    let mut cis =
        CompressedInputStream::new(BufReader::new(in_file), jobs).map_err(|e| {
            eprintln!("Cannot create decompressor: {e}");

            if matches!(e, KanziError::InvalidArgument { .. }) {
                ERR_INVALID_PARAM
            } else {
                ERR_CREATE_DECOMPRESSOR
            }
        })?;

    if verbose {
        cis.add_listener(Arc::new(VerboseListener));
    }

    let mut writer = BufWriter::new(out_file);
    let mut buf = vec![0u8; 65536];
    let mut total = 0u64;

    loop {
        let n = match cis.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                eprintln!("{e}");
                return Err(io_exit_code(&e));
            }
        };

        total += n as u64;
        writer.write_all(&buf[..n]).map_err(|e| {
            eprintln!("Write error: {e}");
            ERR_WRITE_FILE
        })?;
    }

    writer.flush().map_err(|_| ERR_WRITE_FILE)?;
    println!("{}: {} bytes", output.display(), total);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let res = match cli.command {
        Commands::Compress {
            input,
            output,
            block,
            jobs,
            entropy,
            transform,
            level,
            checksum,
            skip_blocks,
            force,
            verbose,
        } => compress_file(
            &input,
            output,
            &block,
            jobs,
            &entropy,
            &transform,
            level,
            checksum,
            skip_blocks,
            force,
            verbose,
        ),
        Commands::Decompress {
            input,
            output,
            jobs,
            force,
            verbose,
        } => decompress_file(&input, output, jobs, force, verbose),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(if code == 0 { ERR_UNKNOWN } else { code }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("64k"), Some(65536));
        assert_eq!(parse_size("4M"), Some(4 * 1024 * 1024));
        assert_eq!(parse_size("1g"), Some(1 << 30));
        assert_eq!(parse_size("abc"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.bin");
        let payload = b"some test data with repetition, repetition, repetition. ".repeat(2000);
        std::fs::write(&input, &payload).unwrap();

        compress_file(
            &input, None, "64k", 2, "HUFFMAN", "LZ4", None, true, false, false, false,
        )
        .unwrap();

        let knz = dir.path().join("data.bin.knz");
        assert!(knz.exists());
        assert!(std::fs::metadata(&knz).unwrap().len() < payload.len() as u64);

        let restored = dir.path().join("restored.bin");
        decompress_file(&knz, Some(restored.clone()), 2, false, false).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), payload);
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        std::fs::write(&input, b"payload").unwrap();
        let output = dir.path().join("out.knz");
        std::fs::write(&output, b"existing").unwrap();

        let err = compress_file(
            &input,
            Some(output),
            "1m",
            1,
            "NONE",
            "NONE",
            None,
            false,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(err, ERR_OVERWRITE_FILE);
    }
}
