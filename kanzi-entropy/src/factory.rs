//! Entropy codec naming and construction.

use crate::ans::{AnsDecoder, AnsEncoder};
use crate::binary::{BinaryEntropyDecoder, BinaryEntropyEncoder};
use crate::huffman::{HuffmanDecoder, HuffmanEncoder};
use crate::predictor::{CmPredictor, FpaqPredictor, PaqPredictor, TpaqPredictor};
use crate::range::{RangeDecoder, RangeEncoder};
use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::{KanziError, Result};
use kanzi_core::traits::{EntropyDecoder, EntropyEncoder};
use std::io::{Read, Write};

/// No compression.
pub const NONE_TYPE: u32 = 0;
/// Canonical Huffman.
pub const HUFFMAN_TYPE: u32 = 1;
/// Fast PAQ (order 0).
pub const FPAQ_TYPE: u32 = 2;
/// PAQ, stripped for speed.
pub const PAQ_TYPE: u32 = 3;
/// Range coder.
pub const RANGE_TYPE: u32 = 4;
/// ANS order 0.
pub const ANS0_TYPE: u32 = 5;
/// Context model.
pub const CM_TYPE: u32 = 6;
/// Tangelo PAQ.
pub const TPAQ_TYPE: u32 = 7;
/// ANS order 1.
pub const ANS1_TYPE: u32 = 8;
/// Tangelo PAQ with the extra SSE stage.
pub const TPAQX_TYPE: u32 = 9;

/// Per-block parameters the codecs derive their table sizes from.
///
/// Both sides build this from header data plus the frame, so encoder and
/// decoder instantiate identical models.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext {
    /// Registered block size from the container header.
    pub block_size: usize,
    /// Length of the current block (pre-entropy, post-transform).
    pub size: usize,
    /// TPAQX extra-state flag.
    pub extra: bool,
}

/// Token for an entropy codec name.
pub fn entropy_type(name: &str) -> Result<u32> {
    match name.to_ascii_uppercase().as_str() {
        "NONE" => Ok(NONE_TYPE),
        "HUFFMAN" => Ok(HUFFMAN_TYPE),
        "FPAQ" => Ok(FPAQ_TYPE),
        "PAQ" => Ok(PAQ_TYPE),
        "RANGE" => Ok(RANGE_TYPE),
        "ANS0" => Ok(ANS0_TYPE),
        "CM" => Ok(CM_TYPE),
        "TPAQ" => Ok(TPAQ_TYPE),
        "ANS1" => Ok(ANS1_TYPE),
        "TPAQX" => Ok(TPAQX_TYPE),
        _ => Err(KanziError::invalid_codec(name)),
    }
}

/// Name for an entropy codec token.
pub fn entropy_name(etype: u32) -> Result<&'static str> {
    Ok(match etype {
        NONE_TYPE => "NONE",
        HUFFMAN_TYPE => "HUFFMAN",
        FPAQ_TYPE => "FPAQ",
        PAQ_TYPE => "PAQ",
        RANGE_TYPE => "RANGE",
        ANS0_TYPE => "ANS0",
        CM_TYPE => "CM",
        TPAQ_TYPE => "TPAQ",
        ANS1_TYPE => "ANS1",
        TPAQX_TYPE => "TPAQX",
        _ => return Err(KanziError::invalid_codec(etype.to_string())),
    })
}

/// Pass-through coder: whole 64-bit words, then the residue.
#[derive(Debug)]
pub struct NullEntropyEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
}

impl<'a, W: Write> NullEntropyEncoder<'a, W> {
    /// Create a copy encoder.
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        Self { bitstream }
    }
}

impl<W: Write> EntropyEncoder for NullEntropyEncoder<'_, W> {
    fn encode(&mut self, block: &[u8]) -> Result<usize> {
        let mut chunks = block.chunks_exact(8);

        for chunk in &mut chunks {
            let w = u64::from_be_bytes(chunk.try_into().expect("8-byte chunk"));
            self.bitstream.write_bits(w, 64)?;
        }

        for &b in chunks.remainder() {
            self.bitstream.write_bits(u64::from(b), 8)?;
        }

        Ok(block.len())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Mirror of [`NullEntropyEncoder`].
#[derive(Debug)]
pub struct NullEntropyDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
}

impl<'a, R: Read> NullEntropyDecoder<'a, R> {
    /// Create a copy decoder.
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        Self { bitstream }
    }
}

impl<R: Read> EntropyDecoder for NullEntropyDecoder<'_, R> {
    fn decode(&mut self, block: &mut [u8]) -> Result<usize> {
        let len = block.len();
        let mut chunks = block.chunks_exact_mut(8);

        for chunk in &mut chunks {
            let w = self.bitstream.read_bits(64)?;
            chunk.copy_from_slice(&w.to_be_bytes());
        }

        for b in chunks.into_remainder() {
            *b = self.bitstream.read_bits(8)? as u8;
        }

        Ok(len)
    }
}

/// Build the encoder for an entropy token.
///
/// Each block gets a fresh coder so statistics never leak across blocks.
pub fn new_encoder<'a, W: Write>(
    bitstream: &'a mut OutputBitStream<W>,
    ctx: &CodecContext,
    etype: u32,
) -> Result<Box<dyn EntropyEncoder + 'a>> {
    Ok(match etype {
        NONE_TYPE => Box::new(NullEntropyEncoder::new(bitstream)),
        HUFFMAN_TYPE => Box::new(HuffmanEncoder::new(bitstream)),
        FPAQ_TYPE => Box::new(BinaryEntropyEncoder::new(
            bitstream,
            Box::new(FpaqPredictor::new()),
        )),
        PAQ_TYPE => Box::new(BinaryEntropyEncoder::new(
            bitstream,
            Box::new(PaqPredictor::new()),
        )),
        RANGE_TYPE => Box::new(RangeEncoder::new(bitstream)),
        ANS0_TYPE => Box::new(AnsEncoder::new(bitstream, 0)?),
        CM_TYPE => Box::new(BinaryEntropyEncoder::new(
            bitstream,
            Box::new(CmPredictor::new()),
        )),
        TPAQ_TYPE => Box::new(BinaryEntropyEncoder::new(
            bitstream,
            Box::new(TpaqPredictor::new(ctx.block_size, ctx.size, false)),
        )),
        ANS1_TYPE => Box::new(AnsEncoder::new(bitstream, 1)?),
        TPAQX_TYPE => Box::new(BinaryEntropyEncoder::new(
            bitstream,
            Box::new(TpaqPredictor::new(ctx.block_size, ctx.size, true)),
        )),
        _ => return Err(KanziError::invalid_codec(etype.to_string())),
    })
}

/// Build the decoder for an entropy token.
pub fn new_decoder<'a, R: Read>(
    bitstream: &'a mut InputBitStream<R>,
    ctx: &CodecContext,
    etype: u32,
) -> Result<Box<dyn EntropyDecoder + 'a>> {
    Ok(match etype {
        NONE_TYPE => Box::new(NullEntropyDecoder::new(bitstream)),
        HUFFMAN_TYPE => Box::new(HuffmanDecoder::new(bitstream)),
        FPAQ_TYPE => Box::new(BinaryEntropyDecoder::new(
            bitstream,
            Box::new(FpaqPredictor::new()),
        )),
        PAQ_TYPE => Box::new(BinaryEntropyDecoder::new(
            bitstream,
            Box::new(PaqPredictor::new()),
        )),
        RANGE_TYPE => Box::new(RangeDecoder::new(bitstream)),
        ANS0_TYPE => Box::new(AnsDecoder::new(bitstream, 0)?),
        CM_TYPE => Box::new(BinaryEntropyDecoder::new(
            bitstream,
            Box::new(CmPredictor::new()),
        )),
        TPAQ_TYPE => Box::new(BinaryEntropyDecoder::new(
            bitstream,
            Box::new(TpaqPredictor::new(ctx.block_size, ctx.size, false)),
        )),
        ANS1_TYPE => Box::new(AnsDecoder::new(bitstream, 1)?),
        TPAQX_TYPE => Box::new(BinaryEntropyDecoder::new(
            bitstream,
            Box::new(TpaqPredictor::new(ctx.block_size, ctx.size, true)),
        )),
        _ => return Err(KanziError::invalid_codec(etype.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::io::Cursor;

    #[test]
    fn test_name_token_mapping() {
        for (name, token) in [
            ("NONE", 0u32),
            ("HUFFMAN", 1),
            ("FPAQ", 2),
            ("PAQ", 3),
            ("RANGE", 4),
            ("ANS0", 5),
            ("CM", 6),
            ("TPAQ", 7),
            ("ANS1", 8),
            ("TPAQX", 9),
        ] {
            assert_eq!(entropy_type(name).unwrap(), token);
            assert_eq!(entropy_name(token).unwrap(), name);
        }

        assert!(entropy_type("LZMA").is_err());
        assert!(entropy_name(10).is_err());
    }

    #[test]
    fn test_all_codecs_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0xFAC7);
        let data: Vec<u8> = (0..20_000).map(|_| rng.r#gen::<u8>() % 32).collect();
        let ctx = CodecContext {
            block_size: 1 << 16,
            size: data.len(),
            extra: false,
        };

        for etype in 0..=9u32 {
            let mut sink = Vec::new();
            {
                let mut obs = OutputBitStream::new(&mut sink);
                let mut enc = new_encoder(&mut obs, &ctx, etype).unwrap();
                assert_eq!(enc.encode(&data).unwrap(), data.len());
                enc.dispose().unwrap();
                drop(enc);
                obs.close().unwrap();
            }

            let mut ibs = InputBitStream::new(Cursor::new(sink));
            let mut dec = new_decoder(&mut ibs, &ctx, etype).unwrap();
            let mut out = vec![0u8; data.len()];
            assert_eq!(dec.decode(&mut out).unwrap(), data.len());
            assert_eq!(out, data, "codec {}", entropy_name(etype).unwrap());
        }
    }

    #[test]
    fn test_null_codec_is_verbatim() {
        let data: Vec<u8> = (0..100u8).collect();
        let ctx = CodecContext {
            block_size: 1 << 16,
            size: data.len(),
            extra: false,
        };

        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            let mut enc = new_encoder(&mut obs, &ctx, NONE_TYPE).unwrap();
            enc.encode(&data).unwrap();
            drop(enc);
            obs.close().unwrap();
        }

        assert_eq!(sink, data);
    }
}
