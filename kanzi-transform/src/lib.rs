//! # Kanzi Transforms
//!
//! Reversible byte-level transforms for the Kanzi block compressor.
//!
//! Every transform implements [`kanzi_core::ByteTransform`]: forward may
//! refuse (output too big, data unsuitable) and the caller records a skip
//! flag; inverse must reproduce the input exactly. Transforms compose into a
//! [`sequence::TransformSequence`] of up to 8 stages, built by name or token
//! through [`factory`].
//!
//! | Token | Transform |
//! |-------|-----------|
//! | 1 | [`bwt::Bwt`] (via [`bwt_codec::BwtBlockCodec`]) |
//! | 2 | [`bwts::Bwts`] |
//! | 3 | [`lz4::Lz4Codec`] |
//! | 4 | [`snappy::SnappyCodec`] |
//! | 5 | [`rlt::Rlt`] |
//! | 6 | [`zrlt::Zrlt`] |
//! | 7 | [`mtft::Mtft`] |
//! | 8 | [`sbrt::Sbrt`] (rank mode) |
//! | 9 | [`x86::X86Codec`] |
//! | 10 | [`text::TextCodec`] |
//! | 11 | [`rolz::RolzCodec`] |

#![warn(missing_docs)]

pub mod bwt;
pub mod bwt_codec;
pub mod bwts;
pub mod divsufsort;
pub mod factory;
pub mod lz4;
pub mod mtft;
pub mod rlt;
pub mod rolz;
pub mod sbrt;
pub mod sequence;
pub mod snappy;
pub mod text;
pub mod x86;
pub mod zrlt;

pub use divsufsort::DivSufSort;
pub use factory::{new_transform_sequence, transform_name, transform_type};
pub use sequence::TransformSequence;
