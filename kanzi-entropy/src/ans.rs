//! Asymmetric Numeral Systems coder (rANS flavor).
//!
//! State lives above a 24-bit bottom and renormalizes one byte at a time.
//! Symbols are encoded back to front; the 32-bit end state opens each chunk
//! on the decoder side. The order-1 variant keys all tables by the previous
//! byte.

use crate::utils;
use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::{KanziError, Result};
use kanzi_core::traits::{EntropyDecoder, EntropyEncoder};
use std::io::{Read, Write};

const ANS_TOP: u64 = 1 << 24;

/// Default chunk: statistics reset every 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;
/// Default scale exponent for normalized frequencies.
pub const DEFAULT_LOG_RANGE: u32 = 13;

#[derive(Debug, Clone, Copy, Default)]
struct AnsSymbol {
    freq: u32,
    cum_freq: u32,
    x_max: u64,
}

impl AnsSymbol {
    fn reset(&mut self, cum_freq: u32, freq: u32, log_range: u32) {
        // Cap pathological frequencies so x_max stays sane
        let freq = freq.min((1 << log_range) - 1);
        self.freq = freq;
        self.cum_freq = cum_freq;
        self.x_max = ((ANS_TOP >> log_range) << 8) * u64::from(freq);
    }
}

/// ANS encoder over a borrowed bit stream, order 0 or 1.
pub struct AnsEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    order: usize,
    alphabet: [usize; 256],
    freqs: Vec<u32>,
    symbols: Vec<AnsSymbol>,
    buffer: Vec<u8>,
    chunk_size: usize,
    log_range: u32,
}

impl<'a, W: Write> AnsEncoder<'a, W> {
    /// Create an encoder of the given order (0 or 1).
    pub fn new(bitstream: &'a mut OutputBitStream<W>, order: usize) -> Result<Self> {
        Self::with_params(bitstream, order, DEFAULT_CHUNK_SIZE, DEFAULT_LOG_RANGE)
    }

    /// Create an encoder with explicit chunk size and log range.
    pub fn with_params(
        bitstream: &'a mut OutputBitStream<W>,
        order: usize,
        chunk_size: usize,
        log_range: u32,
    ) -> Result<Self> {
        if order != 0 && order != 1 {
            return Err(KanziError::invalid_argument("The order must be 0 or 1"));
        }

        if !(8..=16).contains(&log_range) {
            return Err(KanziError::invalid_argument(format!(
                "Invalid range: {log_range} (must be in [8..16])"
            )));
        }

        let dim = 255 * order + 1;
        Ok(Self {
            bitstream,
            order,
            alphabet: [0; 256],
            freqs: vec![0; dim * 257],
            symbols: vec![AnsSymbol::default(); dim * 256],
            buffer: Vec::new(),
            chunk_size,
            log_range,
        })
    }

    /// Normalize per-context stats and emit all chunk headers.
    fn update_frequencies(&mut self, lr: u32) -> Result<usize> {
        let dim = 255 * self.order + 1;
        let mut res = 0usize;
        self.bitstream.write_bits(u64::from(lr - 8), 3)?;

        for k in 0..dim {
            let row = &mut self.freqs[k * 257..k * 257 + 257];
            let total = row[256];
            let freqs256: &mut [u32] = &mut row[..256];
            let alphabet_size = if total == 0 {
                0
            } else {
                utils::normalize_frequencies(freqs256, &mut self.alphabet, total, 1 << lr)?
            };

            if alphabet_size > 0 {
                let mut sum = 0u32;

                for i in 0..256usize {
                    if freqs256[i] == 0 {
                        continue;
                    }

                    self.symbols[(k << 8) + i].reset(sum, freqs256[i], lr);
                    sum += freqs256[i];
                }
            }

            self.encode_chunk_header(k, alphabet_size, lr)?;
            res += alphabet_size;
        }

        Ok(res)
    }

    fn encode_chunk_header(&mut self, ctx: usize, alphabet_size: usize, lr: u32) -> Result<()> {
        utils::encode_alphabet(self.bitstream, &self.alphabet, alphabet_size)?;

        if alphabet_size == 0 {
            return Ok(());
        }

        let chk_size = if alphabet_size > 64 { 16 } else { 8 };
        let mut llr = 3u32;

        while (1 << llr) <= lr {
            llr += 1;
        }

        let row = &self.freqs[ctx * 257..ctx * 257 + 256];
        let mut i = 1usize;

        while i < alphabet_size {
            let end = (i + chk_size).min(alphabet_size);
            let max = self.alphabet[i..end].iter().map(|&s| row[s]).max().unwrap_or(0);
            let mut log_max = 1u32;

            while (1u32 << log_max) <= max {
                log_max += 1;
            }

            self.bitstream.write_bits(u64::from(log_max - 1), llr)?;

            for &s in &self.alphabet[i..end] {
                self.bitstream.write_bits(u64::from(row[s]), log_max)?;
            }

            i = end;
        }

        Ok(())
    }

    fn rebuild_statistics(&mut self, chunk: &[u8], lr: u32) -> Result<usize> {
        self.freqs.fill(0);

        if self.order == 0 {
            self.freqs[256] = chunk.len() as u32;

            for &b in chunk {
                self.freqs[b as usize] += 1;
            }
        } else {
            let mut prv = 0usize;

            for &b in chunk {
                let cur = b as usize;
                self.freqs[prv + cur] += 1;
                self.freqs[prv + 256] += 1;
                prv = 257 * cur;
            }
        }

        self.update_frequencies(lr)
    }

    fn encode_chunk(&mut self, chunk: &[u8], lr: u32) -> Result<()> {
        let mut st = ANS_TOP;
        self.buffer.clear();

        let mut push = |st: &mut u64, sym: &AnsSymbol, buffer: &mut Vec<u8>| {
            while *st >= sym.x_max {
                buffer.push(*st as u8);
                *st >>= 8;
            }

            // C(s, x) = M floor(x/q) + mod(x, q) + b
            let q = *st / u64::from(sym.freq);
            *st = (q << lr) + (*st % u64::from(sym.freq)) + u64::from(sym.cum_freq);
        };

        if self.order == 0 {
            for &b in chunk.iter().rev() {
                let sym = self.symbols[b as usize];
                push(&mut st, &sym, &mut self.buffer);
            }
        } else {
            let mut prv = chunk[chunk.len() - 1] as usize;

            for &b in chunk[..chunk.len() - 1].iter().rev() {
                let cur = b as usize;
                let sym = self.symbols[(cur << 8) + prv];
                push(&mut st, &sym, &mut self.buffer);
                prv = cur;
            }

            // First byte of the chunk codes in context 0
            let sym = self.symbols[prv];
            push(&mut st, &sym, &mut self.buffer);
        }

        self.bitstream.write_bits(st & 0xFFFF_FFFF, 32)?;

        for &b in self.buffer.iter().rev() {
            self.bitstream.write_bits(u64::from(b), 8)?;
        }

        Ok(())
    }
}

impl<W: Write> EntropyEncoder for AnsEncoder<'_, W> {
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
            let mut lr = self.log_range;

            while lr > 8 && (1 << lr) > chunk.len() {
                lr -= 1;
            }

            if self.rebuild_statistics(chunk, lr)? == 0 {
                return Err(KanziError::invalid_stream("empty alphabet in ANS encoder"));
            }

            self.encode_chunk(chunk, lr)?;
        }

        Ok(block.len())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// ANS decoder over a borrowed bit stream, order 0 or 1.
pub struct AnsDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    order: usize,
    alphabet: [usize; 256],
    freqs: Vec<u32>,
    symbols: Vec<AnsSymbol>,
    f2s: Vec<u8>,
    log_range: u32,
    chunk_size: usize,
}

impl<'a, R: Read> AnsDecoder<'a, R> {
    /// Create a decoder of the given order (0 or 1).
    pub fn new(bitstream: &'a mut InputBitStream<R>, order: usize) -> Result<Self> {
        Self::with_chunk_size(bitstream, order, DEFAULT_CHUNK_SIZE)
    }

    /// Create a decoder; parameters must match the encoder.
    pub fn with_chunk_size(
        bitstream: &'a mut InputBitStream<R>,
        order: usize,
        chunk_size: usize,
    ) -> Result<Self> {
        if order != 0 && order != 1 {
            return Err(KanziError::invalid_argument("The order must be 0 or 1"));
        }

        let dim = 255 * order + 1;
        Ok(Self {
            bitstream,
            order,
            alphabet: [0; 256],
            freqs: vec![0; dim * 256],
            symbols: vec![AnsSymbol::default(); dim * 256],
            f2s: Vec::new(),
            log_range: DEFAULT_LOG_RANGE,
            chunk_size,
        })
    }

    fn decode_header(&mut self) -> Result<usize> {
        let dim = 255 * self.order + 1;
        let mut res = 0usize;
        self.log_range = 8 + self.bitstream.read_bits(3)? as u32;

        if !(8..=16).contains(&self.log_range) {
            return Err(KanziError::invalid_stream("invalid ANS log range"));
        }

        let scale = 1usize << self.log_range;
        self.f2s.clear();
        self.f2s.resize(dim * scale, 0);

        for k in 0..dim {
            let alphabet_size = utils::decode_alphabet(self.bitstream, &mut self.alphabet)?;

            if alphabet_size == 0 {
                continue;
            }

            let row = &mut self.freqs[k << 8..(k + 1) << 8];

            if alphabet_size != 256 {
                row.fill(0);
            }

            let chk_size = if alphabet_size > 64 { 16 } else { 8 };
            let mut sum = 0u32;
            let mut llr = 3u32;

            while (1 << llr) <= self.log_range {
                llr += 1;
            }

            let mut i = 1usize;

            while i < alphabet_size {
                let log_max = 1 + self.bitstream.read_bits(llr)? as u32;

                if (1usize << log_max) > scale {
                    return Err(KanziError::invalid_stream(format!(
                        "incorrect frequency size {log_max} in ANS decoder"
                    )));
                }

                let end = (i + chk_size).min(alphabet_size);

                for j in i..end {
                    let freq = self.bitstream.read_bits(log_max)? as u32;

                    if freq as usize >= scale {
                        return Err(KanziError::invalid_stream(format!(
                            "incorrect frequency {freq} for symbol {} in ANS decoder",
                            self.alphabet[j]
                        )));
                    }

                    row[self.alphabet[j]] = freq;
                    sum += freq;
                }

                i = end;
            }

            // The first frequency is implied
            if scale as u32 <= sum {
                return Err(KanziError::invalid_stream(format!(
                    "invalid frequency total {sum} in ANS decoder"
                )));
            }

            row[self.alphabet[0]] = scale as u32 - sum;
            let mut sum = 0u32;

            for i in 0..256usize {
                if row[i] == 0 {
                    continue;
                }

                for j in 0..row[i] as usize {
                    self.f2s[(k << self.log_range) + sum as usize + j] = i as u8;
                }

                self.symbols[(k << 8) + i].reset(sum, row[i], self.log_range);
                sum += row[i];
            }

            res += alphabet_size;
        }

        Ok(res)
    }

    fn decode_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        let mut st = self.bitstream.read_bits(32)?;
        let mask = (1u64 << self.log_range) - 1;
        let mut prv = 0usize;

        for b in chunk.iter_mut() {
            let cur = self.f2s[(prv << self.log_range) + (st & mask) as usize];
            *b = cur;
            let sym = self.symbols[(prv << 8) + cur as usize];

            // D(x) = (s, q (x/M) + mod(x, M) - b)
            st = u64::from(sym.freq) * (st >> self.log_range) + (st & mask)
                - u64::from(sym.cum_freq);

            while st < ANS_TOP {
                st = (st << 8) | u64::from(self.bitstream.read_bits(8)?);
            }

            if self.order == 1 {
                prv = cur as usize;
            }
        }

        Ok(())
    }
}

impl<R: Read> EntropyDecoder for AnsDecoder<'_, R> {
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
                return Err(KanziError::invalid_stream("empty alphabet in ANS decoder"));
            }

            self.decode_chunk(chunk)?;
        }

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::io::Cursor;

    fn roundtrip(data: &[u8], order: usize) -> usize {
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = AnsEncoder::new(&mut obs, order).unwrap();
            assert_eq!(enc.encode(data).unwrap(), data.len());
            obs.close().unwrap();
        }

        let size = sink.len();
        let mut ibs = InputBitStream::new(Cursor::new(sink));
        let mut dec = AnsDecoder::new(&mut ibs, order).unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(dec.decode(&mut out).unwrap(), data.len());
        assert_eq!(out, data, "order {order}");
        size
    }

    #[test]
    fn test_order0_skewed() {
        let mut data = vec![0u8; 40_000];

        for i in (0..data.len()).step_by(7) {
            data[i] = 3;
        }

        let size = roundtrip(&data, 0);
        assert!(size < data.len() / 3);
    }

    #[test]
    fn test_order1_text_beats_order0() {
        let data = b"she sells sea shells by the sea shore ".repeat(800);
        let s0 = roundtrip(&data, 0);
        let s1 = roundtrip(&data, 1);
        assert!(s1 < s0);
    }

    #[test]
    fn test_sizes_and_chunk_boundaries() {
        let mut rng = StdRng::seed_from_u64(0xA5);

        for order in [0usize, 1] {
            for len in [1usize, 2, 3, 255, 65_535, 65_536, 65_537, 130_000] {
                let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 11).collect();
                roundtrip(&data, order);
            }
        }
    }

    #[test]
    fn test_random_bytes() {
        let mut rng = StdRng::seed_from_u64(0x50A);
        let data: Vec<u8> = (0..80_000).map(|_| rng.r#gen()).collect();
        roundtrip(&data, 0);
        roundtrip(&data, 1);
    }

    #[test]
    fn test_invalid_order_rejected() {
        let mut sink = Vec::new();
        let mut obs = OutputBitStream::new(&mut sink);
        assert!(AnsEncoder::new(&mut obs, 2).is_err());
    }
}
