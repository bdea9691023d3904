//! # Kanzi Entropy
//!
//! Entropy coders for the Kanzi block compressor.
//!
//! All coders read or write through the [`kanzi_core::bitstream`] types and
//! reset their statistics per block (and per 64 KiB chunk within a block):
//!
//! - [`huffman`]: canonical Huffman, 24-bit cap, 12-bit fast decode table
//! - [`range`]: 60-bit Subbotin range coder
//! - [`ans`]: rANS order 0/1 with a 24-bit bottom
//! - [`binary`]: binary arithmetic coder over a [`predictor::Predictor`]
//!   (FPAQ, CM, PAQ, TPAQ/TPAQX)
//! - [`golomb`]: Exp-Golomb and Rice-Golomb byte codes
//! - [`utils`]: alphabet headers, frequency normalization, entropy estimate
//! - [`factory`]: token table and constructors

#![warn(missing_docs)]

pub mod ans;
pub mod binary;
pub mod factory;
pub mod golomb;
pub mod huffman;
pub mod predictor;
pub mod range;
pub mod utils;

pub use factory::{CodecContext, entropy_name, entropy_type, new_decoder, new_encoder};
pub use predictor::Predictor;
pub use utils::INCOMPRESSIBLE_THRESHOLD;
