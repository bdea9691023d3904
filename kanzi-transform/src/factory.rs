//! Transform naming and construction.
//!
//! Each transform has a 6-bit token; a full chain packs up to 8 tokens into
//! 48 bits, stage 0 in the most significant position. Names compose with
//! `+`, e.g. `"BWT+MTFT+ZRLT"`.

use crate::bwt_codec::BwtBlockCodec;
use crate::bwts::Bwts;
use crate::lz4::Lz4Codec;
use crate::mtft::Mtft;
use crate::rolz::RolzCodec;
use crate::rlt::Rlt;
use crate::sbrt::{Sbrt, SbrtMode};
use crate::sequence::{NullTransform, TransformSequence};
use crate::snappy::SnappyCodec;
use crate::text::TextCodec;
use crate::x86::X86Codec;
use crate::zrlt::Zrlt;
use kanzi_core::{ByteTransform, KanziError, Result};

/// Copy (no transform).
pub const NONE_TYPE: u64 = 0;
/// Burrows-Wheeler transform.
pub const BWT_TYPE: u64 = 1;
/// Bijective Burrows-Wheeler transform.
pub const BWTS_TYPE: u64 = 2;
/// LZ4 block codec.
pub const LZ4_TYPE: u64 = 3;
/// Snappy block codec.
pub const SNAPPY_TYPE: u64 = 4;
/// Run-length codec.
pub const RLT_TYPE: u64 = 5;
/// Zero run-length codec.
pub const ZRLT_TYPE: u64 = 6;
/// Move-to-front transform.
pub const MTFT_TYPE: u64 = 7;
/// Sort-by-rank transform.
pub const RANK_TYPE: u64 = 8;
/// X86 call/jump codec.
pub const X86_TYPE: u64 = 9;
/// Text dictionary codec.
pub const TEXT_TYPE: u64 = 10;
/// Reduced-offset LZ codec.
pub const ROLZ_TYPE: u64 = 11;

const ONE_SHIFT: u32 = 6;
const MAX_SHIFT: u32 = 7 * ONE_SHIFT;
const MASK: u64 = (1 << ONE_SHIFT) - 1;

/// Token for a single transform name.
pub fn transform_token(name: &str) -> Result<u64> {
    match name.to_ascii_uppercase().as_str() {
        "NONE" => Ok(NONE_TYPE),
        "BWT" => Ok(BWT_TYPE),
        "BWTS" => Ok(BWTS_TYPE),
        "LZ4" => Ok(LZ4_TYPE),
        "SNAPPY" => Ok(SNAPPY_TYPE),
        "RLT" => Ok(RLT_TYPE),
        "ZRLT" => Ok(ZRLT_TYPE),
        "MTFT" => Ok(MTFT_TYPE),
        "RANK" => Ok(RANK_TYPE),
        "X86" => Ok(X86_TYPE),
        "TEXT" => Ok(TEXT_TYPE),
        "ROLZ" => Ok(ROLZ_TYPE),
        _ => Err(KanziError::invalid_codec(name)),
    }
}

/// 48-bit chain type for a `+`-separated list of transform names.
pub fn transform_type(name: &str) -> Result<u64> {
    let mut res = 0u64;
    let mut shift = MAX_SHIFT;
    let mut n = 0;

    for token in name.split('+') {
        let t = transform_token(token)?;
        n += 1;

        if n > 8 {
            return Err(KanziError::invalid_argument(format!(
                "Only 8 transforms allowed: {name}"
            )));
        }

        // Null stages are elided
        if t != NONE_TYPE {
            res |= t << shift;
            shift = shift.saturating_sub(ONE_SHIFT);
        }
    }

    Ok(res)
}

fn token_name(t: u64) -> Result<&'static str> {
    Ok(match t {
        NONE_TYPE => "NONE",
        BWT_TYPE => "BWT",
        BWTS_TYPE => "BWTS",
        LZ4_TYPE => "LZ4",
        SNAPPY_TYPE => "SNAPPY",
        RLT_TYPE => "RLT",
        ZRLT_TYPE => "ZRLT",
        MTFT_TYPE => "MTFT",
        RANK_TYPE => "RANK",
        X86_TYPE => "X86",
        TEXT_TYPE => "TEXT",
        ROLZ_TYPE => "ROLZ",
        _ => return Err(KanziError::invalid_codec(t.to_string())),
    })
}

/// Reconstruct the `+`-separated name of a 48-bit chain type.
pub fn transform_name(ttype: u64) -> Result<String> {
    let mut name = String::new();

    for i in 0..8u32 {
        let t = (ttype >> (MAX_SHIFT - ONE_SHIFT * i)) & MASK;

        if t == NONE_TYPE {
            continue;
        }

        if !name.is_empty() {
            name.push('+');
        }

        name.push_str(token_name(t)?);
    }

    if name.is_empty() {
        name.push_str("NONE");
    }

    Ok(name)
}

fn new_token_transform(t: u64, block_size: usize) -> Result<Box<dyn ByteTransform + Send>> {
    Ok(match t {
        NONE_TYPE => Box::new(NullTransform::new()),
        BWT_TYPE => Box::new(BwtBlockCodec::new()),
        BWTS_TYPE => Box::new(Bwts::new()),
        LZ4_TYPE => Box::new(Lz4Codec::new()),
        SNAPPY_TYPE => Box::new(SnappyCodec::new()),
        RLT_TYPE => Box::new(Rlt::default()),
        ZRLT_TYPE => Box::new(Zrlt::new()),
        MTFT_TYPE => Box::new(Mtft::new()),
        RANK_TYPE => Box::new(Sbrt::new(SbrtMode::Rank)),
        X86_TYPE => Box::new(X86Codec::new()),
        TEXT_TYPE => {
            // Scale the dictionary to the block size
            let mut dict_size = 1 << 12;

            for i in (14..=24).step_by(2) {
                if block_size >= 1 << i {
                    dict_size <<= 1;
                }
            }

            Box::new(TextCodec::new(dict_size))
        }
        ROLZ_TYPE => Box::new(RolzCodec::new()),
        _ => return Err(KanziError::invalid_codec(t.to_string())),
    })
}

/// Build the transform sequence for a 48-bit chain type.
///
/// `block_size` lets size-sensitive stages pick their table sizes; the
/// decoder recovers it from the container header, so both sides agree.
pub fn new_transform_sequence(ttype: u64, block_size: usize) -> Result<TransformSequence> {
    let mut stages: Vec<Box<dyn ByteTransform + Send>> = Vec::new();

    for i in 0..8u32 {
        let t = (ttype >> (MAX_SHIFT - ONE_SHIFT * i)) & MASK;

        if t != NONE_TYPE || (i == 0 && ttype == 0) {
            stages.push(new_token_transform(t, block_size)?);
        }
    }

    if stages.is_empty() {
        stages.push(new_token_transform(NONE_TYPE, block_size)?);
    }

    Ok(TransformSequence::new(stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanzi_core::Slice;

    #[test]
    fn test_name_to_type() {
        assert_eq!(
            transform_type("BWT+MTFT+ZRLT").unwrap(),
            (1u64 << 42) | (7 << 36) | (6 << 30)
        );
        assert_eq!(transform_type("NONE").unwrap(), 0);
        assert_eq!(transform_type("bwt").unwrap(), 1 << 42);
        assert_eq!(transform_type("ROLZ").unwrap(), 11 << 42);
    }

    #[test]
    fn test_type_to_name() {
        assert_eq!(
            transform_name((1u64 << 42) | (7 << 36) | (6 << 30)).unwrap(),
            "BWT+MTFT+ZRLT"
        );
        assert_eq!(transform_name(0).unwrap(), "NONE");

        let t = transform_type("X86+RLT+TEXT").unwrap();
        assert_eq!(transform_name(t).unwrap(), "X86+RLT+TEXT");
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert!(transform_token("LZMA").is_err());
        assert!(transform_type("BWT+NOPE").is_err());
        assert!(transform_type("A+B+C+D+E+F+G+H+I").is_err());
    }

    #[test]
    fn test_chain_roundtrip() {
        let ttype = transform_type("BWT+MTFT+ZRLT").unwrap();
        let mut fwd_seq = new_transform_sequence(ttype, 1 << 20).unwrap();
        let mut inv_seq = new_transform_sequence(ttype, 1 << 20).unwrap();

        let data = b"sing a song of sixpence a pocket full of rye ".repeat(40);
        let cap = fwd_seq.max_encoded_len(data.len()) + 64;
        let mut input = vec![0u8; cap];
        input[..data.len()].copy_from_slice(&data);
        let mut fwd = vec![0u8; cap];
        let mut dst = Slice::new(&mut fwd);

        assert!(fwd_seq.forward(&mut Slice::new(&mut input), &mut dst, data.len()));
        let flen = dst.idx;
        assert!(flen < data.len());

        inv_seq.set_skip_flags(fwd_seq.skip_flags());
        let mut back = vec![0u8; cap];
        let mut bsl = Slice::new(&mut back);
        assert!(inv_seq.inverse(&mut Slice::new(&mut fwd), &mut bsl, flen));
        assert_eq!(&back[..data.len()], &data[..]);
    }
}
