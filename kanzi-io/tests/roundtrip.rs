//! End-to-end container tests.

use kanzi_core::error::KanziError;
use kanzi_io::{CompressedInputStream, CompressedOutputStream, Config};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::io::{Cursor, Read, Write};

fn compress(data: &[u8], cfg: &Config) -> Vec<u8> {
    let mut sink = Vec::new();
    let mut out = CompressedOutputStream::new(&mut sink, cfg).unwrap();
    out.write_all(data).unwrap();
    out.close().unwrap();
    drop(out);
    sink
}

fn decompress(container: &[u8], jobs: usize) -> Vec<u8> {
    let mut input = CompressedInputStream::new(Cursor::new(container), jobs).unwrap();
    let mut out = Vec::new();
    input.read_to_end(&mut out).unwrap();
    out
}

fn roundtrip(data: &[u8], cfg: &Config) -> Vec<u8> {
    let container = compress(data, cfg);
    assert_eq!(decompress(&container, cfg.jobs), data, "roundtrip mismatch");
    container
}

fn text_corpus(len: usize) -> Vec<u8> {
    b"The compression pipeline cuts input bytes into fixed size blocks. \
      Each block traverses a transform pipeline and an entropy coder. "
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}

#[test]
fn test_empty_input() {
    let cfg = Config::default();
    let container = compress(&[], &cfg);
    // Just the 16-byte header and the end marker
    assert_eq!(container.len(), 18);
    assert_eq!(decompress(&container, 1), b"");
}

#[test]
fn test_small_block_copy_mode() {
    // 11 bytes go through the stored path regardless of configuration
    let mut cfg = Config::from_names("HUFFMAN", "BWT+MTFT+ZRLT").unwrap();
    cfg.block_size = 1024;
    roundtrip(b"hello block", &cfg);
}

#[test]
fn test_all_entropy_codecs() {
    let data = text_corpus(100_000);

    for codec in [
        "NONE", "HUFFMAN", "FPAQ", "PAQ", "RANGE", "ANS0", "CM", "TPAQ", "ANS1", "TPAQX",
    ] {
        let mut cfg = Config::from_names(codec, "NONE").unwrap();
        cfg.block_size = 1 << 16;
        roundtrip(&data, &cfg);
    }
}

#[test]
fn test_all_transforms() {
    let data = text_corpus(80_000);

    for transform in [
        "NONE", "BWT", "BWTS", "LZ4", "SNAPPY", "RLT", "ZRLT", "MTFT", "RANK", "X86", "TEXT",
        "ROLZ",
    ] {
        let mut cfg = Config::from_names("NONE", transform).unwrap();
        cfg.block_size = 1 << 16;
        roundtrip(&data, &cfg);
    }
}

#[test]
fn test_typical_chains() {
    let data = text_corpus(300_000);

    for (transform, codec) in [
        ("BWT+MTFT+ZRLT", "ANS0"),
        ("BWT+RANK+ZRLT", "FPAQ"),
        ("TEXT+LZ4", "HUFFMAN"),
        ("BWT", "CM"),
    ] {
        let mut cfg = Config::from_names(codec, transform).unwrap();
        cfg.block_size = 1 << 17;
        let container = roundtrip(&data, &cfg);
        assert!(container.len() < data.len() / 2, "{transform}/{codec}");
    }
}

#[test]
fn test_levels_roundtrip() {
    let data = text_corpus(150_000);

    for level in 0..=5 {
        let mut cfg = Config::from_level(level).unwrap();
        cfg.block_size = 1 << 16;
        roundtrip(&data, &cfg);
    }
}

#[test]
fn test_zeros_with_zrlt_huffman_is_tiny() {
    // 1 MiB of zeros shrinks to a few dozen bytes
    let data = vec![0u8; 1 << 20];
    let mut cfg = Config::from_names("HUFFMAN", "ZRLT").unwrap();
    cfg.block_size = 1 << 20;
    cfg.checksum = true;
    let container = roundtrip(&data, &cfg);
    assert!(container.len() <= 64, "container is {} bytes", container.len());
}

#[test]
fn test_incompressible_blocks_stored() {
    // Random data with skip_blocks set: every block goes to copy mode
    let mut rng = StdRng::seed_from_u64(0xFEED);
    let data: Vec<u8> = (0..1 << 22).map(|_| rng.r#gen()).collect();
    let mut cfg = Config::from_level(3).unwrap();
    cfg.block_size = 1 << 20;
    cfg.skip_blocks = true;
    let container = roundtrip(&data, &cfg);

    let blocks = data.len().div_ceil(cfg.block_size);
    assert!(container.len() <= data.len() + 8 * blocks + 32);
}

#[test]
fn test_multi_block_streams() {
    let mut rng = StdRng::seed_from_u64(77);
    let data: Vec<u8> = (0..300_000).map(|_| rng.r#gen::<u8>() % 40).collect();

    let mut cfg = Config::from_names("ANS0", "LZ4").unwrap();
    cfg.block_size = 1 << 14; // 19 blocks
    cfg.checksum = true;
    roundtrip(&data, &cfg);
}

#[test]
fn test_parallel_output_identical_to_serial() {
    let data = text_corpus(1 << 20);

    for (transform, codec) in [("BWT+RANK+ZRLT", "ANS0"), ("LZ4", "HUFFMAN")] {
        let mut cfg = Config::from_names(codec, transform).unwrap();
        cfg.block_size = 1 << 16;
        cfg.jobs = 1;
        let serial = compress(&data, &cfg);

        for jobs in [2usize, 4] {
            cfg.jobs = jobs;
            let parallel = compress(&data, &cfg);
            assert_eq!(serial, parallel, "jobs = {jobs}");
            assert_eq!(decompress(&parallel, jobs), data);
        }
    }
}

#[test]
fn test_decoder_jobs_do_not_matter() {
    let data = text_corpus(500_000);
    let mut cfg = Config::from_names("HUFFMAN", "BWT+MTFT+ZRLT").unwrap();
    cfg.block_size = 1 << 15;
    let container = compress(&data, &cfg);

    for jobs in [1usize, 3, 8] {
        assert_eq!(decompress(&container, jobs), data);
    }
}

#[test]
fn test_checksum_detects_corruption() {
    let data = text_corpus(200_000);
    let mut cfg = Config::from_names("HUFFMAN", "LZ4").unwrap();
    cfg.block_size = 1 << 16;
    cfg.checksum = true;
    let mut container = compress(&data, &cfg);

    // Flip one payload bit past the header area
    let idx = container.len() / 2;
    container[idx] ^= 0x10;

    let mut input = CompressedInputStream::new(Cursor::new(&container), 1).unwrap();
    let mut out = Vec::new();
    let err = input.read_to_end(&mut out).unwrap_err();
    let inner = err.get_ref().and_then(|e| e.downcast_ref::<KanziError>());
    assert!(
        matches!(
            inner,
            Some(KanziError::CrcMismatch { .. })
                | Some(KanziError::InvalidStream { .. })
                | Some(KanziError::Entropy { .. })
                | Some(KanziError::Transform { .. })
                | Some(KanziError::BitStreamEof)
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn test_bad_magic_rejected() {
    let mut container = compress(b"payload payload payload", &Config::default());
    container[0] ^= 0xFF;

    let mut input = CompressedInputStream::new(Cursor::new(&container), 1).unwrap();
    let mut out = Vec::new();
    let err = input.read_to_end(&mut out).unwrap_err();
    let inner = err.get_ref().and_then(|e| e.downcast_ref::<KanziError>());
    assert!(matches!(inner, Some(KanziError::InvalidMagic { .. })));
    assert!(out.is_empty());
}

#[test]
fn test_wrong_version_rejected() {
    let data = b"version check payload";
    let mut container = compress(data, &Config::default());

    // The 5-bit version field sits right after the 32-bit magic:
    // bits 32..37 of the stream. Overwrite version 6 with 7.
    let b4 = container[4];
    let version = (b4 >> 3) & 0x1F;
    assert_eq!(version, 6);
    container[4] = (b4 & 0x07) | (7 << 3);

    let mut input = CompressedInputStream::new(Cursor::new(&container), 1).unwrap();
    let mut out = Vec::new();
    let err = input.read_to_end(&mut out).unwrap_err();
    let inner = err.get_ref().and_then(|e| e.downcast_ref::<KanziError>());
    assert!(matches!(
        inner,
        Some(KanziError::StreamVersion { version: 7 })
    ));
    assert!(out.is_empty());
}

#[test]
fn test_truncated_container_fails() {
    let data = text_corpus(100_000);
    let mut cfg = Config::from_names("ANS0", "BWT+MTFT+ZRLT").unwrap();
    cfg.block_size = 1 << 16;
    let container = compress(&data, &cfg);

    let cut = &container[..container.len() / 3];
    let mut input = CompressedInputStream::new(Cursor::new(cut), 1).unwrap();
    let mut out = Vec::new();
    assert!(input.read_to_end(&mut out).is_err());
}

#[test]
fn test_pi_digits_chain() {
    // First 32 digits of pi as raw byte values
    let pi: Vec<u8> = [
        3u8, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3, 2, 3, 8, 4, 6, 2, 6, 4, 3, 3, 8, 3,
        2, 7, 9, 5,
    ]
    .to_vec();

    let mut cfg = Config::from_names("ANS0", "BWT+MTFT+ZRLT").unwrap();
    cfg.block_size = 1024;
    roundtrip(&pi, &cfg);
}

#[test]
fn test_declared_size_hint() {
    let data = text_corpus(70_000);
    let mut cfg = Config::from_names("HUFFMAN", "LZ4").unwrap();
    cfg.block_size = 1 << 14;
    cfg.file_size = Some(data.len() as u64);
    roundtrip(&data, &cfg);
}

#[test]
fn test_write_in_odd_sized_chunks() {
    let data = text_corpus(123_457);
    let mut cfg = Config::from_names("RANGE", "MTFT").unwrap();
    cfg.block_size = 1 << 14;

    let mut sink = Vec::new();
    let mut out = CompressedOutputStream::new(&mut sink, &cfg).unwrap();

    for chunk in data.chunks(977) {
        out.write_all(chunk).unwrap();
    }

    out.close().unwrap();
    drop(out);
    assert_eq!(decompress(&sink, 1), data);
}

#[test]
fn test_read_in_odd_sized_chunks() {
    let data = text_corpus(90_000);
    let mut cfg = Config::from_names("HUFFMAN", "NONE").unwrap();
    cfg.block_size = 1 << 14;
    let container = compress(&data, &cfg);

    let mut input = CompressedInputStream::new(Cursor::new(&container), 1).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 331];

    loop {
        let n = input.read(&mut buf).unwrap();

        if n == 0 {
            break;
        }

        out.extend_from_slice(&buf[..n]);
    }

    assert_eq!(out, data);
}
