//! Exp-Golomb and Rice-Golomb byte coders.
//!
//! Small universal codes for near-geometric distributions. The signed
//! Exp-Golomb coder also carries the Huffman code-length deltas inside the
//! Huffman header.

use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::{KanziError, Result};
use kanzi_core::traits::{EntropyDecoder, EntropyEncoder};
use std::io::{Read, Write};

/// Exp-Golomb encoder over a borrowed bit stream.
#[derive(Debug)]
pub struct ExpGolombEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    signed: bool,
}

impl<'a, W: Write> ExpGolombEncoder<'a, W> {
    /// Create an encoder; `signed` selects the signed code.
    pub fn new(bitstream: &'a mut OutputBitStream<W>, signed: bool) -> Self {
        Self { bitstream, signed }
    }

    /// Encode one byte (interpreted as `i8` in signed mode).
    pub fn encode_byte(&mut self, val: u8) -> Result<()> {
        if val == 0 {
            return self.bitstream.write_bit(1);
        }

        if self.signed {
            let sval = val as i8 as i32;
            let a = sval.unsigned_abs();
            // 2^log - 1 <= |v| < 2^(log+1) - 1
            let log = 31 - (a + 1).leading_zeros();
            let rem = a - ((1 << log) - 1);
            let sign = u32::from(sval < 0);
            let emit = (1u64 << (log + 1)) | u64::from(rem << 1) | u64::from(sign);
            self.bitstream.write_bits(emit, 2 * log + 2)
        } else {
            let v = u32::from(val) + 1;
            let log = 31 - v.leading_zeros();
            self.bitstream.write_bits(u64::from(v), 2 * log + 1)
        }
    }

    /// Encode a whole block.
    pub fn encode(&mut self, block: &[u8]) -> Result<usize> {
        for &b in block {
            self.encode_byte(b)?;
        }

        Ok(block.len())
    }
}

/// Exp-Golomb decoder over a borrowed bit stream.
#[derive(Debug)]
pub struct ExpGolombDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    signed: bool,
}

impl<'a, R: Read> ExpGolombDecoder<'a, R> {
    /// Create a decoder; `signed` must match the encoder.
    pub fn new(bitstream: &'a mut InputBitStream<R>, signed: bool) -> Self {
        Self { bitstream, signed }
    }

    /// Decode one byte.
    pub fn decode_byte(&mut self) -> Result<u8> {
        if self.bitstream.read_bit()? == 1 {
            return Ok(0);
        }

        let mut log = 1u32;

        while self.bitstream.read_bit()? == 0 {
            log += 1;

            if log > 8 {
                return Err(KanziError::invalid_stream("invalid exp-golomb prefix"));
            }
        }

        if self.signed {
            let res = self.bitstream.read_bits(log + 1)? as u32;
            let sgn = res & 1;
            let mag = (res >> 1) + (1 << log) - 1;

            if sgn == 1 {
                Ok((mag as u8).wrapping_neg())
            } else {
                Ok(mag as u8)
            }
        } else {
            let rem = self.bitstream.read_bits(log)? as u32;
            Ok(((1u32 << log) - 1 + rem) as u8)
        }
    }

    /// Decode a whole block.
    pub fn decode(&mut self, block: &mut [u8]) -> Result<usize> {
        for b in block.iter_mut() {
            *b = self.decode_byte()?;
        }

        Ok(block.len())
    }
}

/// Rice-Golomb encoder with a fixed log base in `[1, 12]`.
#[derive(Debug)]
pub struct RiceGolombEncoder<W: Write> {
    bitstream: OutputBitStream<W>,
    signed: bool,
    log_base: u32,
    base: u32,
}

impl<W: Write> RiceGolombEncoder<W> {
    /// Create an encoder.
    pub fn new(bitstream: OutputBitStream<W>, log_base: u32, signed: bool) -> Result<Self> {
        if !(1..=12).contains(&log_base) {
            return Err(KanziError::invalid_argument(
                "Invalid logBase value (must be in [1..12])",
            ));
        }

        Ok(Self {
            bitstream,
            signed,
            log_base,
            base: 1 << log_base,
        })
    }

    /// Encode one byte.
    pub fn encode_byte(&mut self, val: u8) -> Result<()> {
        if val == 0 {
            return self
                .bitstream
                .write_bits(u64::from(self.base), self.log_base + 1);
        }

        let sval = if self.signed { val as i8 as i32 } else { i32::from(val) };
        let a = sval.unsigned_abs();

        // Quotient in unary, remainder in binary
        let mut emit = u64::from(self.base | (a & (self.base - 1)));
        let mut n = 1 + (a >> self.log_base) + self.log_base;

        if self.signed {
            n += 1;
            emit = (emit << 1) | u64::from(sval < 0);
        }

        self.bitstream.write_bits(emit, n)
    }

    /// Finish and return the bit stream.
    pub fn into_bitstream(self) -> OutputBitStream<W> {
        self.bitstream
    }
}

impl<W: Write> EntropyEncoder for RiceGolombEncoder<W> {
    fn encode(&mut self, block: &[u8]) -> Result<usize> {
        for &b in block {
            self.encode_byte(b)?;
        }

        Ok(block.len())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Rice-Golomb decoder.
#[derive(Debug)]
pub struct RiceGolombDecoder<R: Read> {
    bitstream: InputBitStream<R>,
    signed: bool,
    log_base: u32,
}

impl<R: Read> RiceGolombDecoder<R> {
    /// Create a decoder; parameters must match the encoder.
    pub fn new(bitstream: InputBitStream<R>, log_base: u32, signed: bool) -> Result<Self> {
        if !(1..=12).contains(&log_base) {
            return Err(KanziError::invalid_argument(
                "Invalid logBase value (must be in [1..12])",
            ));
        }

        Ok(Self {
            bitstream,
            signed,
            log_base,
        })
    }

    /// Decode one byte.
    pub fn decode_byte(&mut self) -> Result<u8> {
        let mut q = 0u32;

        while self.bitstream.read_bit()? == 0 {
            q += 1;
        }

        let res = (q << self.log_base) | self.bitstream.read_bits(self.log_base)? as u32;

        if res != 0 && self.signed && self.bitstream.read_bit()? == 1 {
            return Ok((res as u8).wrapping_neg());
        }

        Ok(res as u8)
    }
}

impl<R: Read> EntropyDecoder for RiceGolombDecoder<R> {
    fn decode(&mut self, block: &mut [u8]) -> Result<usize> {
        for b in block.iter_mut() {
            *b = self.decode_byte()?;
        }

        Ok(block.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_exp_golomb_signed_roundtrip() {
        let values: Vec<u8> = (0..=255u8).collect();
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = ExpGolombEncoder::new(&mut obs, true);
            enc.encode(&values).unwrap();
            obs.close().unwrap();
        }

        let mut ibs = InputBitStream::new(Cursor::new(sink));
        let mut dec = ExpGolombDecoder::new(&mut ibs, true);
        let mut out = vec![0u8; values.len()];
        dec.decode(&mut out).unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn test_exp_golomb_unsigned_roundtrip() {
        let values: Vec<u8> = (0..=255u8).rev().collect();
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = ExpGolombEncoder::new(&mut obs, false);
            enc.encode(&values).unwrap();
            obs.close().unwrap();
        }

        let mut ibs = InputBitStream::new(Cursor::new(sink));
        let mut dec = ExpGolombDecoder::new(&mut ibs, false);
        let mut out = vec![0u8; values.len()];
        dec.decode(&mut out).unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn test_exp_golomb_small_deltas_are_short() {
        // Code-length deltas hover near zero: 0 must cost one bit
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = ExpGolombEncoder::new(&mut obs, true);

            for _ in 0..64 {
                enc.encode_byte(0).unwrap();
            }

            obs.close().unwrap();
        }
        assert_eq!(sink.len(), 8);
    }

    #[test]
    fn test_rice_golomb_roundtrip() {
        for log_base in [1u32, 3, 5] {
            for signed in [false, true] {
                let values: Vec<u8> = (0..=255u8).collect();
                let mut sink = Vec::new();
                {
                    let obs = OutputBitStream::new(&mut sink);
                    let mut enc = RiceGolombEncoder::new(obs, log_base, signed).unwrap();
                    enc.encode(&values).unwrap();
                    enc.into_bitstream().close().unwrap();
                }

                let ibs = InputBitStream::new(Cursor::new(sink));
                let mut dec = RiceGolombDecoder::new(ibs, log_base, signed).unwrap();
                let mut out = vec![0u8; values.len()];
                dec.decode(&mut out).unwrap();
                assert_eq!(out, values, "log_base {log_base} signed {signed}");
            }
        }
    }
}
