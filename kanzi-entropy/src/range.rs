//! Range coder.
//!
//! Order-0 Subbotin-style range coder over a 60-bit interval with 28-bit
//! renormalization. Each chunk carries an alphabet plus normalized
//! frequencies scaled to `2^lr`, `lr` in `[8, 16]`.

use crate::utils;
use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::{KanziError, Result};
use kanzi_core::traits::{EntropyDecoder, EntropyEncoder};
use std::io::{Read, Write};

const TOP_RANGE: u64 = 0x0FFF_FFFF_FFFF_FFFF;
const BOTTOM_RANGE: u64 = 0x0000_0000_0000_FFFF;
const RANGE_MASK: u64 = 0x0FFF_FFFF_0000_0000;

/// Default chunk: statistics reset every 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;
/// Default scale exponent for normalized frequencies.
pub const DEFAULT_LOG_RANGE: u32 = 13;

/// Range encoder over a borrowed bit stream.
pub struct RangeEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    low: u64,
    range: u64,
    alphabet: [usize; 256],
    freqs: [u32; 256],
    cum_freqs: [u64; 257],
    chunk_size: usize,
    log_range: u32,
    shift: u32,
}

impl<'a, W: Write> RangeEncoder<'a, W> {
    /// Create an encoder with default chunking and range.
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        Self::with_params(bitstream, DEFAULT_CHUNK_SIZE, DEFAULT_LOG_RANGE)
    }

    /// Create an encoder with explicit chunk size and log range.
    pub fn with_params(
        bitstream: &'a mut OutputBitStream<W>,
        chunk_size: usize,
        log_range: u32,
    ) -> Self {
        debug_assert!((8..=16).contains(&log_range));
        Self {
            bitstream,
            low: 0,
            range: TOP_RANGE,
            alphabet: [0; 256],
            freqs: [0; 256],
            cum_freqs: [0; 257],
            chunk_size,
            log_range,
            shift: 0,
        }
    }

    fn update_frequencies(&mut self, size: u32, lr: u32) -> Result<usize> {
        let alphabet_size =
            utils::normalize_frequencies(&mut self.freqs, &mut self.alphabet, size, 1 << lr)?;

        if alphabet_size > 0 {
            self.cum_freqs[0] = 0;

            for i in 0..256 {
                self.cum_freqs[i + 1] = self.cum_freqs[i] + u64::from(self.freqs[i]);
            }
        }

        self.encode_header(alphabet_size, lr)?;
        Ok(alphabet_size)
    }

    fn encode_header(&mut self, alphabet_size: usize, lr: u32) -> Result<()> {
        utils::encode_alphabet(self.bitstream, &self.alphabet, alphabet_size)?;

        if alphabet_size == 0 {
            return Ok(());
        }

        self.bitstream.write_bits(u64::from(lr - 8), 3)?;
        let inc = if alphabet_size > 64 { 16 } else { 8 };
        let mut llr = 3u32;

        while (1 << llr) <= lr {
            llr += 1;
        }

        // All frequencies but the first, in chunks with a max-log prefix
        let mut i = 1usize;

        while i < alphabet_size {
            let end = (i + inc).min(alphabet_size);
            let mut log_max = 1u32;
            let max = self.alphabet[i..end]
                .iter()
                .map(|&s| self.freqs[s])
                .max()
                .unwrap_or(0);

            while (1u32 << log_max) <= max {
                log_max += 1;
            }

            self.bitstream.write_bits(u64::from(log_max - 1), llr)?;

            for &s in &self.alphabet[i..end] {
                self.bitstream.write_bits(u64::from(self.freqs[s]), log_max)?;
            }

            i = end;
        }

        Ok(())
    }

    fn encode_byte(&mut self, b: u8) -> Result<()> {
        let symbol = b as usize;
        let cum_freq = self.cum_freqs[symbol];
        let freq = self.cum_freqs[symbol + 1] - cum_freq;
        self.range >>= self.shift;
        self.low += cum_freq * self.range;
        self.range *= freq;

        loop {
            if (self.low ^ (self.low + self.range)) & RANGE_MASK != 0 {
                if self.range > BOTTOM_RANGE {
                    break;
                }

                // Normalize
                self.range = !self.low.wrapping_sub(1) & BOTTOM_RANGE;
            }

            self.bitstream.write_bits(self.low >> 32, 28)?;
            self.range <<= 28;
            self.low <<= 28;
        }

        Ok(())
    }
}

impl<W: Write> EntropyEncoder for RangeEncoder<'_, W> {
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
            self.range = TOP_RANGE;
            self.low = 0;
            let mut lr = self.log_range;

            // Lower the scale for small chunks
            while lr > 8 && (1 << lr) > chunk.len() {
                lr -= 1;
            }

            self.freqs.fill(0);

            for &b in chunk {
                self.freqs[b as usize] += 1;
            }

            if self.update_frequencies(chunk.len() as u32, lr)? == 0 {
                return Err(KanziError::invalid_stream("empty alphabet in range coder"));
            }

            self.shift = lr;

            for &b in chunk {
                self.encode_byte(b)?;
            }

            self.bitstream.write_bits(self.low, 60)?;
        }

        Ok(block.len())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Range decoder over a borrowed bit stream.
pub struct RangeDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    code: u64,
    low: u64,
    range: u64,
    alphabet: [usize; 256],
    freqs: [u32; 256],
    cum_freqs: [u64; 257],
    f2s: Vec<u16>,
    chunk_size: usize,
    shift: u32,
}

impl<'a, R: Read> RangeDecoder<'a, R> {
    /// Create a decoder with the default chunk size.
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        Self::with_chunk_size(bitstream, DEFAULT_CHUNK_SIZE)
    }

    /// Create a decoder; `chunk_size` must match the encoder.
    pub fn with_chunk_size(bitstream: &'a mut InputBitStream<R>, chunk_size: usize) -> Self {
        Self {
            bitstream,
            code: 0,
            low: 0,
            range: TOP_RANGE,
            alphabet: [0; 256],
            freqs: [0; 256],
            cum_freqs: [0; 257],
            f2s: Vec::new(),
            chunk_size,
            shift: 0,
        }
    }

    fn decode_header(&mut self) -> Result<usize> {
        let alphabet_size = utils::decode_alphabet(self.bitstream, &mut self.alphabet)?;

        if alphabet_size == 0 {
            return Ok(0);
        }

        if alphabet_size != 256 {
            self.freqs.fill(0);
        }

        let log_range = 8 + self.bitstream.read_bits(3)? as u32;
        let scale = 1u32 << log_range;
        self.shift = log_range;
        let mut sum = 0u32;
        let inc = if alphabet_size > 64 { 16 } else { 8 };
        let mut llr = 3u32;

        while (1 << llr) <= log_range {
            llr += 1;
        }

        let mut i = 1usize;

        while i < alphabet_size {
            let log_max = 1 + self.bitstream.read_bits(llr)? as u32;

            if log_max > log_range {
                return Err(KanziError::invalid_stream(format!(
                    "incorrect frequency size {log_max} in range decoder"
                )));
            }

            let end = (i + inc).min(alphabet_size);

            for j in i..end {
                let val = self.bitstream.read_bits(log_max)? as u32;

                if val == 0 || val >= scale {
                    return Err(KanziError::invalid_stream(format!(
                        "incorrect frequency {val} for symbol {} in range decoder",
                        self.alphabet[j]
                    )));
                }

                self.freqs[self.alphabet[j]] = val;
                sum += val;
            }

            i = end;
        }

        // The first frequency is implied by the total
        if scale <= sum {
            return Err(KanziError::invalid_stream(format!(
                "invalid frequency total {sum} in range decoder"
            )));
        }

        self.freqs[self.alphabet[0]] = scale - sum;
        self.cum_freqs[0] = 0;
        self.f2s.clear();
        self.f2s.resize(scale as usize, 0);

        // Cumulative table plus the frequency-to-symbol map
        for i in 0..256usize {
            self.cum_freqs[i + 1] = self.cum_freqs[i] + u64::from(self.freqs[i]);
            let base = self.cum_freqs[i] as usize;

            for j in 0..self.freqs[i] as usize {
                self.f2s[base + j] = i as u16;
            }
        }

        Ok(alphabet_size)
    }

    fn decode_byte(&mut self) -> Result<u8> {
        self.range >>= self.shift;
        let count = (self.code - self.low) / self.range;

        if count as usize >= self.f2s.len() {
            return Err(KanziError::invalid_stream("range decoder out of range"));
        }

        let symbol = self.f2s[count as usize] as usize;
        let cum_freq = self.cum_freqs[symbol];
        let freq = self.cum_freqs[symbol + 1] - cum_freq;
        self.low += cum_freq * self.range;
        self.range *= freq;

        loop {
            if (self.low ^ (self.low + self.range)) & RANGE_MASK != 0 {
                if self.range > BOTTOM_RANGE {
                    break;
                }

                self.range = !self.low.wrapping_sub(1) & BOTTOM_RANGE;
            }

            self.code = (self.code << 28) | self.bitstream.read_bits(28)?;
            self.range <<= 28;
            self.low <<= 28;
        }

        Ok(symbol as u8)
    }
}

impl<R: Read> EntropyDecoder for RangeDecoder<'_, R> {
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

        for chunk in block.chunks_mut(sz) {
            if self.decode_header()? == 0 {
                return Err(KanziError::invalid_stream("empty alphabet in range coder"));
            }

            self.range = TOP_RANGE;
            self.low = 0;
            self.code = self.bitstream.read_bits(60)?;

            for b in chunk.iter_mut() {
                *b = self.decode_byte()?;
            }
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
            let mut enc = RangeEncoder::new(&mut obs);
            assert_eq!(enc.encode(data).unwrap(), data.len());
            obs.close().unwrap();
        }

        let size = sink.len();
        let mut ibs = InputBitStream::new(Cursor::new(sink));
        let mut dec = RangeDecoder::new(&mut ibs);
        let mut out = vec![0u8; data.len()];
        assert_eq!(dec.decode(&mut out).unwrap(), data.len());
        assert_eq!(out, data);
        size
    }

    #[test]
    fn test_skewed_data_compresses() {
        let mut data = vec![0u8; 50_000];

        for i in (0..data.len()).step_by(10) {
            data[i] = 1;
        }

        let size = roundtrip(&data);
        assert!(size < data.len() / 4);
    }

    #[test]
    fn test_text() {
        let data = b"how much wood would a woodchuck chuck ".repeat(400);
        roundtrip(&data);
    }

    #[test]
    fn test_sizes_and_chunk_boundaries() {
        let mut rng = StdRng::seed_from_u64(0x4247);

        for len in [1usize, 2, 100, 65_535, 65_536, 65_537, 150_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 20).collect();
            roundtrip(&data);
        }
    }

    #[test]
    fn test_random_bytes() {
        let mut rng = StdRng::seed_from_u64(3);
        let data: Vec<u8> = (0..100_000).map(|_| rng.r#gen()).collect();
        roundtrip(&data);
    }
}
