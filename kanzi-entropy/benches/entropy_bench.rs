//! Benchmarks for the entropy coders.

use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_entropy::factory::{self, CodecContext};
use std::io::Cursor;
use std::time::Instant;

fn main() {
    let data: Vec<u8> = b"a man a plan a canal panama. "
        .iter()
        .cycle()
        .take(1024 * 1024)
        .copied()
        .collect();

    let ctx = CodecContext {
        block_size: data.len(),
        size: data.len(),
        extra: false,
    };

    println!("Entropy Coder Benchmarks (1 MiB text)");
    println!("=====================================\n");

    for (name, etype) in [
        ("huffman", factory::HUFFMAN_TYPE),
        ("range", factory::RANGE_TYPE),
        ("ans0", factory::ANS0_TYPE),
        ("ans1", factory::ANS1_TYPE),
        ("fpaq", factory::FPAQ_TYPE),
        ("cm", factory::CM_TYPE),
    ] {
        let mut sink = Vec::with_capacity(data.len());

        let start = Instant::now();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = factory::new_encoder(&mut obs, &ctx, etype).unwrap();
            enc.encode(&data).unwrap();
            enc.dispose().unwrap();
            drop(enc);
            obs.close().unwrap();
        }
        let enc_time = start.elapsed();

        let start = Instant::now();
        let mut out = vec![0u8; data.len()];
        {
            let mut ibs = InputBitStream::new(Cursor::new(&sink));
            let mut dec = factory::new_decoder(&mut ibs, &ctx, etype).unwrap();
            dec.decode(&mut out).unwrap();
        }
        let dec_time = start.elapsed();

        assert_eq!(out, data, "roundtrip failed for {name}");

        let mbs = data.len() as f64 / 1024.0 / 1024.0;
        println!(
            "{:8} {:8} bytes  enc {:7.2} MB/s  dec {:7.2} MB/s",
            name,
            sink.len(),
            mbs / enc_time.as_secs_f64(),
            mbs / dec_time.as_secs_f64()
        );
    }
}
