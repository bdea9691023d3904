//! Benchmarks for suffix array construction.

use kanzi_transform::DivSufSort;
use std::time::Instant;

fn main() {
    let cases = vec![
        ("text_64k", generate_text(64 * 1024)),
        ("text_1m", generate_text(1024 * 1024)),
        ("zeros_1m", vec![0u8; 1024 * 1024]),
        ("random_1m", generate_random(1024 * 1024)),
        ("ab_repeat_1m", b"ab".repeat(512 * 1024)),
    ];

    println!("DivSufSort Benchmarks");
    println!("=====================\n");

    let mut dss = DivSufSort::new();

    for (name, data) in &cases {
        let mut sa = vec![0i32; data.len()];

        let start = Instant::now();
        dss.compute_suffix_array(data, &mut sa);
        let elapsed = start.elapsed();

        let throughput = data.len() as f64 / elapsed.as_secs_f64() / 1024.0 / 1024.0;
        println!(
            "{:14} {:8} bytes  {:7.2} MB/s  ({:8.2} ms)",
            name,
            data.len(),
            throughput,
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

fn generate_text(size: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog and runs through the forest. "
        .iter()
        .cycle()
        .take(size)
        .copied()
        .collect()
}

fn generate_random(size: usize) -> Vec<u8> {
    // Simple xorshift, no external dependency needed here
    let mut state = 0x4B41_4E5Au32;
    (0..size)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
