//! Binary arithmetic coder.
//!
//! A 56-bit interval split by the probability supplied by a [`Predictor`],
//! renormalizing 32 bits at a time. The predictor is updated with every
//! coded bit, so both sides stay in lockstep.

use crate::predictor::Predictor;
use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::Result;
use kanzi_core::traits::{EntropyDecoder, EntropyEncoder};
use std::io::{Read, Write};

const TOP: u64 = 0x00FF_FFFF_FFFF_FFFF;
const MASK_24_56: u64 = 0x00FF_FFFF_FF00_0000;
const MASK_0_24: u64 = 0x0000_0000_00FF_FFFF;
const MASK_0_32: u64 = 0x0000_0000_FFFF_FFFF;
const MASK_0_56: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Binary arithmetic encoder driven by a predictor.
pub struct BinaryEntropyEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    predictor: Box<dyn Predictor>,
    low: u64,
    high: u64,
    disposed: bool,
}

impl<'a, W: Write> BinaryEntropyEncoder<'a, W> {
    /// Create an encoder around a predictor.
    pub fn new(bitstream: &'a mut OutputBitStream<W>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            bitstream,
            predictor,
            low: 0,
            high: TOP,
            disposed: false,
        }
    }

    /// Encode one byte, MSB first.
    pub fn encode_byte(&mut self, val: u8) -> Result<()> {
        for shift in (0..8).rev() {
            self.encode_bit(i32::from((val >> shift) & 1))?;
        }

        Ok(())
    }

    /// Encode one bit.
    pub fn encode_bit(&mut self, bit: i32) -> Result<()> {
        // Split the interval, biased to keep full precision
        let split = ((self.high - self.low) >> 4).wrapping_mul(self.predictor.get() as u64) >> 8;

        if bit != 0 {
            self.high = self.low + split;
        } else {
            self.low += split + 1;
        }

        self.predictor.update(bit);

        // Emit the settled 32 bits
        while (self.low ^ self.high) & MASK_24_56 == 0 {
            self.bitstream.write_bits(self.high >> 24, 32)?;
            self.low <<= 32;
            self.high = (self.high << 32) | MASK_0_32;
        }

        Ok(())
    }
}

impl<W: Write> EntropyEncoder for BinaryEntropyEncoder<'_, W> {
    fn encode(&mut self, block: &[u8]) -> Result<usize> {
        for &b in block {
            self.encode_byte(b)?;
        }

        Ok(block.len())
    }

    fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }

        self.disposed = true;
        self.bitstream.write_bits(self.low | MASK_0_24, 56)
    }
}

/// Binary arithmetic decoder driven by a predictor.
pub struct BinaryEntropyDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    predictor: Box<dyn Predictor>,
    low: u64,
    high: u64,
    current: u64,
    initialized: bool,
}

impl<'a, R: Read> BinaryEntropyDecoder<'a, R> {
    /// Create a decoder around a predictor matching the encoder's.
    pub fn new(bitstream: &'a mut InputBitStream<R>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            bitstream,
            predictor,
            low: 0,
            high: TOP,
            current: 0,
            initialized: false,
        }
    }

    fn initialize(&mut self) -> Result<()> {
        if !self.initialized {
            self.current = self.bitstream.read_bits(56)?;
            self.initialized = true;
        }

        Ok(())
    }

    /// Decode one byte.
    pub fn decode_byte(&mut self) -> Result<u8> {
        let mut val = 0u8;

        for _ in 0..8 {
            val = (val << 1) | self.decode_bit()? as u8;
        }

        Ok(val)
    }

    /// Decode one bit.
    pub fn decode_bit(&mut self) -> Result<i32> {
        let split = (((self.high - self.low) >> 4).wrapping_mul(self.predictor.get() as u64)
            >> 8)
            + self.low;
        let bit;

        if split >= self.current {
            bit = 1;
            self.high = split;
        } else {
            bit = 0;
            self.low = split + 1;
        }

        self.predictor.update(bit);

        // Pull the next 32 bits
        while (self.low ^ self.high) & MASK_24_56 == 0 {
            self.low = (self.low << 32) & MASK_0_56;
            self.high = ((self.high << 32) | MASK_0_32) & MASK_0_56;
            let next = self.bitstream.read_bits(32)?;
            self.current = ((self.current << 32) | next) & MASK_0_56;
        }

        Ok(bit)
    }
}

impl<R: Read> EntropyDecoder for BinaryEntropyDecoder<'_, R> {
    fn decode(&mut self, block: &mut [u8]) -> Result<usize> {
        self.initialize()?;

        for b in block.iter_mut() {
            *b = self.decode_byte()?;
        }

        Ok(block.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::fpaq::FpaqPredictor;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_with_fpaq() {
        let mut rng = StdRng::seed_from_u64(0xB1);

        for len in [1usize, 100, 10_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 4).collect();

            let mut sink = Vec::new();
            {
                let mut obs = OutputBitStream::new(&mut sink);
                let mut enc =
                    BinaryEntropyEncoder::new(&mut obs, Box::new(FpaqPredictor::new()));
                enc.encode(&data).unwrap();
                enc.dispose().unwrap();
                obs.close().unwrap();
            }

            let mut ibs = InputBitStream::new(Cursor::new(sink));
            let mut dec = BinaryEntropyDecoder::new(&mut ibs, Box::new(FpaqPredictor::new()));
            let mut out = vec![0u8; len];
            dec.decode(&mut out).unwrap();
            assert_eq!(out, data);
        }
    }

    #[test]
    fn test_biased_stream_compresses() {
        let data = vec![0u8; 20_000];
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = BinaryEntropyEncoder::new(&mut obs, Box::new(FpaqPredictor::new()));
            enc.encode(&data).unwrap();
            enc.dispose().unwrap();
            obs.close().unwrap();
        }

        assert!(sink.len() < 1000);
    }
}
