//! Canonical Huffman coder.
//!
//! Code lengths come from the in-place Moffat-Katajainen algorithm and are
//! capped at 24 bits. The header per chunk is an alphabet followed by
//! signed Exp-Golomb deltas of the code lengths. Decoding runs through a
//! 12-bit prefix table, falling back to a bit-by-bit walk for longer codes,
//! and prefetches 64 bits per batch of symbols.

use crate::golomb::{ExpGolombDecoder, ExpGolombEncoder};
use crate::utils;
use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::{KanziError, Result};
use kanzi_core::traits::{EntropyDecoder, EntropyEncoder};
use std::io::{Read, Write};

/// Default chunk: symbol statistics reset every 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;

const MAX_SYMBOL_SIZE: u32 = 24;
const DECODING_BATCH_SIZE: u32 = 12;
const DECODING_MASK: usize = (1 << DECODING_BATCH_SIZE) - 1;
const MAX_DECODING_INDEX: u32 = (DECODING_BATCH_SIZE << 8) | 0xFF;
const SYMBOL_ABSENT: i32 = i32::MAX;

/// Assign canonical codes from sorted (length, symbol) order.
/// Returns -1 when the 24-bit cap is exceeded.
fn generate_canonical_codes(sizes: &[u16; 256], codes: &mut [u32; 256], ranks: &mut [usize]) -> i32 {
    // Sort by increasing size, then increasing symbol
    ranks.sort_by_key(|&r| ((sizes[r] as u32) << 8) | r as u32);

    let mut code = 0u32;
    let mut len = sizes[ranks[0]] as u32;

    for &r in ranks.iter() {
        if (sizes[r] as u32) > len {
            code <<= sizes[r] as u32 - len;
            len = sizes[r] as u32;

            if len > MAX_SYMBOL_SIZE {
                return -1;
            }
        }

        codes[r] = code;
        code += 1;
    }

    ranks.len() as i32
}

/// First pass of the in-place code length computation.
fn compute_in_place_sizes_phase1(data: &mut [u32], n: usize) {
    let mut s = 0usize;
    let mut r = 0usize;

    for t in 0..n - 1 {
        let mut sum = 0u32;

        for _ in 0..2 {
            if s >= n || (r < t && data[r] < data[s]) {
                sum += data[r];
                data[r] = t as u32;
                r += 1;
            } else {
                sum += data[s];

                if s > t {
                    data[s] = 0;
                }

                s += 1;
            }
        }

        data[t] = sum;
    }
}

/// Second pass: internal node depths become leaf code lengths.
fn compute_in_place_sizes_phase2(data: &mut [u32], n: usize) {
    let mut level_top = n - 2;
    let mut depth = 1u32;
    let mut i = n;
    let mut total_nodes_at_level = 2usize;

    while i > 0 {
        let mut k = level_top;

        while k > 0 && data[k - 1] as usize >= level_top {
            k -= 1;
        }

        let internal_nodes_at_level = level_top - k;
        let leaves_at_level = total_nodes_at_level - internal_nodes_at_level;

        for _ in 0..leaves_at_level {
            i -= 1;
            data[i] = depth;
        }

        total_nodes_at_level = internal_nodes_at_level << 1;
        level_top = k;
        depth += 1;
    }
}

/// Huffman encoder over a borrowed bit stream.
pub struct HuffmanEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    freqs: [u32; 256],
    codes: [u32; 256],
    sizes: [u16; 256],
    chunk_size: usize,
}

impl<'a, W: Write> HuffmanEncoder<'a, W> {
    /// Create an encoder with the default chunk size.
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        Self::with_chunk_size(bitstream, DEFAULT_CHUNK_SIZE)
    }

    /// Create an encoder; `chunk_size` 0 means one chunk for the block.
    pub fn with_chunk_size(bitstream: &'a mut OutputBitStream<W>, chunk_size: usize) -> Self {
        Self {
            bitstream,
            freqs: [0; 256],
            codes: [0; 256],
            sizes: [0; 256],
            chunk_size,
        }
    }

    /// Rebuild codes for the chunk frequencies and emit the header.
    fn update_frequencies(&mut self) -> Result<()> {
        let mut ranks = Vec::with_capacity(256);

        for i in 0..256usize {
            self.sizes[i] = 0;
            self.codes[i] = 0;

            if self.freqs[i] > 0 {
                ranks.push(i);
            }
        }

        let count = ranks.len();

        if count == 1 {
            self.sizes[ranks[0]] = 1;
        } else {
            self.compute_code_lengths(&ranks)?;
        }

        utils::encode_alphabet(self.bitstream, &ranks, count)?;

        // Transmit only the code lengths, as deltas
        let mut egenc = ExpGolombEncoder::new(self.bitstream, true);
        let mut prev_size = 2i32;

        for &r in &ranks {
            let curr_size = self.sizes[r] as i32;
            egenc.encode_byte((curr_size - prev_size) as u8)?;
            prev_size = curr_size;
        }

        let mut sranks = ranks.clone();

        if generate_canonical_codes(&self.sizes, &mut self.codes, &mut sranks) < 0 {
            return Err(KanziError::invalid_stream(
                "Could not generate codes: max code length (24 bits) exceeded",
            ));
        }

        // Pack the size with the code for the hot loop
        for &r in &ranks {
            self.codes[r] |= (self.sizes[r] as u32) << 24;
        }

        Ok(())
    }

    fn compute_code_lengths(&mut self, ranks: &[usize]) -> Result<()> {
        let count = ranks.len();
        // Sort symbols by increasing frequency, then symbol value
        let mut sranks = ranks.to_vec();
        sranks.sort_by_key(|&r| (self.freqs[r], r));

        let mut buffer = vec![0u32; count];

        for (i, &r) in sranks.iter().enumerate() {
            buffer[i] = self.freqs[r];
        }

        compute_in_place_sizes_phase1(&mut buffer, count);
        compute_in_place_sizes_phase2(&mut buffer, count);

        for (i, &r) in sranks.iter().enumerate() {
            let code_len = buffer[i];

            if code_len == 0 || code_len > MAX_SYMBOL_SIZE {
                return Err(KanziError::invalid_stream(
                    "Could not generate codes: max code length (24 bits) exceeded",
                ));
            }

            self.sizes[r] = code_len as u16;
        }

        Ok(())
    }
}

impl<W: Write> EntropyEncoder for HuffmanEncoder<'_, W> {
    fn encode(&mut self, block: &[u8]) -> Result<usize> {
        if block.is_empty() {
            return Ok(0);
        }

        let sz = if self.chunk_size == 0 {
            block.len()
        } else {
            self.chunk_size
        };

        for chunk in block.chunks(sz) {
            self.freqs.fill(0);

            for &b in chunk {
                self.freqs[b as usize] += 1;
            }

            self.update_frequencies()?;

            for &b in chunk {
                let val = self.codes[b as usize];
                self.bitstream.write_bits(u64::from(val), val >> 24)?;
            }
        }

        Ok(block.len())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Huffman decoder over a borrowed bit stream.
pub struct HuffmanDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    codes: [u32; 256],
    ranks: [usize; 256],
    sizes: [u16; 256],
    fd_table: Vec<u32>,
    sd_table: [u32; 256],
    sdt_indexes: [i32; MAX_SYMBOL_SIZE as usize + 1],
    chunk_size: usize,
    state: u64,
    bits: u32,
    min_code_len: u32,
}

impl<'a, R: Read> HuffmanDecoder<'a, R> {
    /// Create a decoder with the default chunk size.
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        Self::with_chunk_size(bitstream, DEFAULT_CHUNK_SIZE)
    }

    /// Create a decoder; `chunk_size` must match the encoder.
    pub fn with_chunk_size(bitstream: &'a mut InputBitStream<R>, chunk_size: usize) -> Self {
        Self {
            bitstream,
            codes: [0; 256],
            ranks: [0; 256],
            sizes: [0; 256],
            fd_table: vec![0u32; 1 << DECODING_BATCH_SIZE],
            sd_table: [0; 256],
            sdt_indexes: [SYMBOL_ABSENT; MAX_SYMBOL_SIZE as usize + 1],
            chunk_size,
            state: 0,
            bits: 0,
            min_code_len: 8,
        }
    }

    /// Read the chunk header and rebuild the decoding tables.
    fn read_lengths(&mut self) -> Result<usize> {
        let count = utils::decode_alphabet(self.bitstream, &mut self.ranks)?;

        if count == 0 {
            return Ok(0);
        }

        let mut egdec = ExpGolombDecoder::new(self.bitstream, true);
        self.min_code_len = MAX_SYMBOL_SIZE;
        let mut prev_size = 2i32;

        for i in 0..count {
            let r = self.ranks[i];

            if r > 255 {
                return Err(KanziError::invalid_stream(format!(
                    "incorrect Huffman symbol {r}"
                )));
            }

            self.codes[r] = 0;
            let curr_size = prev_size + i32::from(egdec.decode_byte()? as i8);

            if curr_size <= 0 || curr_size as u32 > MAX_SYMBOL_SIZE {
                return Err(KanziError::invalid_stream(format!(
                    "incorrect size {curr_size} for Huffman symbol {r}"
                )));
            }

            self.min_code_len = self.min_code_len.min(curr_size as u32);
            self.sizes[r] = curr_size as u16;
            prev_size = curr_size;
        }

        let mut sranks = self.ranks[..count].to_vec();

        if generate_canonical_codes(&self.sizes, &mut self.codes, &mut sranks) < 0 {
            return Err(KanziError::invalid_stream(
                "Could not generate codes: max code length (24 bits) exceeded",
            ));
        }

        self.ranks[..count].copy_from_slice(&sranks);
        self.build_decoding_tables(count);
        Ok(count)
    }

    /// Fast table: every 12-bit prefix maps to (size << 8) | symbol.
    /// Slow table: codes in canonical order with per-length base indexes.
    fn build_decoding_tables(&mut self, count: usize) {
        self.fd_table.fill(0);
        self.sd_table.fill(0);
        self.sdt_indexes.fill(SYMBOL_ABSENT);

        let mut len = 0u32;

        for i in 0..count {
            let r = self.ranks[i];
            let code = self.codes[r];

            if (self.sizes[r] as u32) > len {
                len = self.sizes[r] as u32;
                self.sdt_indexes[len as usize] = i as i32 - code as i32;
            }

            let val = ((self.sizes[r] as u32) << 8) | r as u32;
            self.sd_table[i] = val;

            let (idx, end) = if len < DECODING_BATCH_SIZE {
                let idx = (code << (DECODING_BATCH_SIZE - len)) as usize;
                (idx, idx + (1 << (DECODING_BATCH_SIZE - len)))
            } else {
                let idx = (code >> (len - DECODING_BATCH_SIZE)) as usize;
                (idx, idx + 1)
            };

            for slot in &mut self.fd_table[idx..end] {
                *slot = val;
            }
        }
    }

    fn slow_decode_byte(&mut self, mut code: u32, mut code_len: u32) -> Result<u8> {
        while code_len < MAX_SYMBOL_SIZE {
            code_len += 1;
            code <<= 1;

            if self.bits == 0 {
                code |= self.bitstream.read_bit()?;
            } else {
                // Consume the bits still held in the state word
                self.bits -= 1;
                code |= ((self.state >> self.bits) & 1) as u32;
            }

            let idx = self.sdt_indexes[code_len as usize];

            if idx == SYMBOL_ABSENT {
                continue;
            }

            let entry_idx = idx + code as i32;

            if !(0..256).contains(&entry_idx) {
                continue;
            }

            let entry = self.sd_table[entry_idx as usize];

            if entry >> 8 == code_len {
                return Ok(entry as u8);
            }
        }

        Err(KanziError::invalid_stream("incorrect Huffman code"))
    }

    /// 64 bits must be available downstream.
    fn fast_decode_byte(&mut self) -> Result<u8> {
        if self.bits < DECODING_BATCH_SIZE {
            let read = self.bitstream.read_bits(64 - self.bits)?;
            let mask = (1u64 << self.bits).wrapping_sub(1);
            self.state = if self.bits == 0 {
                read
            } else {
                ((self.state & mask) << (64 - self.bits)) | read
            };
            self.bits = 64;
        }

        let idx = ((self.state >> (self.bits - DECODING_BATCH_SIZE)) as usize) & DECODING_MASK;
        let val = self.fd_table[idx];

        if val > MAX_DECODING_INDEX {
            self.bits -= DECODING_BATCH_SIZE;
            return self.slow_decode_byte(idx as u32, DECODING_BATCH_SIZE);
        }

        self.bits -= val >> 8;
        Ok(val as u8)
    }
}

impl<R: Read> EntropyDecoder for HuffmanDecoder<'_, R> {
    fn decode(&mut self, block: &mut [u8]) -> Result<usize> {
        if block.is_empty() {
            return Ok(0);
        }

        let len = block.len();
        let sz = if self.chunk_size == 0 {
            len
        } else {
            self.chunk_size
        };

        let mut start_chunk = 0usize;

        while start_chunk < len {
            if self.read_lengths()? == 0 {
                return Ok(start_chunk);
            }

            if self.min_code_len == 0 {
                return Err(KanziError::invalid_stream("invalid min code length"));
            }

            // Keep enough bits in flight for the batched fast path
            let mut end_padding = 64 / self.min_code_len as usize;

            if self.min_code_len as usize * end_padding != 64 {
                end_padding += 1;
            }

            let end_chunk = (start_chunk + sz).min(len);
            let end_chunk1 = end_chunk.saturating_sub(end_padding) & !7usize;
            let mut i = start_chunk;

            while i < end_chunk1 {
                for k in 0..8 {
                    block[i + k] = self.fast_decode_byte()?;
                }

                i += 8;
            }

            while i < end_chunk {
                block[i] = self.slow_decode_byte(0, 0)?;
                i += 1;
            }

            start_chunk = end_chunk;
        }

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::io::Cursor;

    fn roundtrip(data: &[u8]) -> usize {
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = HuffmanEncoder::new(&mut obs);
            assert_eq!(enc.encode(data).unwrap(), data.len());
            obs.close().unwrap();
        }

        let size = sink.len();
        let mut ibs = InputBitStream::new(Cursor::new(sink));
        let mut dec = HuffmanDecoder::new(&mut ibs);
        let mut out = vec![0u8; data.len()];
        assert_eq!(dec.decode(&mut out).unwrap(), data.len());
        assert_eq!(out, data);
        size
    }

    #[test]
    fn test_skewed_data_compresses() {
        let mut data = vec![b'a'; 60_000];
        data.extend_from_slice(&[b'b'; 3000]);
        data.extend_from_slice(&[b'c'; 100]);
        let size = roundtrip(&data);
        assert!(size < data.len() / 4);
    }

    #[test]
    fn test_text_roundtrip() {
        let data = b"it was the best of times, it was the worst of times. ".repeat(500);
        roundtrip(&data);
    }

    #[test]
    fn test_single_symbol() {
        roundtrip(&[7u8; 2000]);
        roundtrip(&[7u8; 1]);
    }

    #[test]
    fn test_two_symbols() {
        let data: Vec<u8> = (0..10_000).map(|i| if i % 3 == 0 { 1 } else { 2 }).collect();
        roundtrip(&data);
    }

    #[test]
    fn test_random_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x48FF);

        for len in [1usize, 7, 255, 256, 65_535, 65_536, 65_537, 200_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            roundtrip(&data);
        }
    }

    #[test]
    fn test_canonical_codes_prefix_free() {
        let mut sizes = [0u16; 256];
        let mut codes = [0u32; 256];
        sizes[0] = 1;
        sizes[1] = 2;
        sizes[2] = 3;
        sizes[3] = 3;
        let mut ranks = vec![0usize, 1, 2, 3];
        assert_eq!(generate_canonical_codes(&sizes, &mut codes, &mut ranks), 4);
        assert_eq!(codes[0], 0b0);
        assert_eq!(codes[1], 0b10);
        assert_eq!(codes[2], 0b110);
        assert_eq!(codes[3], 0b111);
    }
}
