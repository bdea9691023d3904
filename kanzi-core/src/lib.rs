//! # Kanzi Core
//!
//! Core components for the Kanzi block compressor.
//!
//! This crate provides the building blocks shared by every layer:
//!
//! - [`bitstream`]: MSB-first bit-packed reader/writer over byte streams
//! - [`hash`]: XXHash32 block checksums
//! - [`global`]: shared squash/stretch/log2 tables
//! - [`event`]: block events and listeners
//! - [`traits`]: transform and entropy codec traits
//! - [`error`]: error types
//!
//! ## Architecture
//!
//! Kanzi is a layered pipeline:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ L4: kanzi-cli                                            │
//! │     file handling, option parsing, progress              │
//! ├──────────────────────────────────────────────────────────┤
//! │ L3: kanzi-io                                             │
//! │     container framing, parallel block pipeline           │
//! ├──────────────────────────────────────────────────────────┤
//! │ L2: kanzi-transform / kanzi-entropy                      │
//! │     BWT/LZ/RLE stages, Huffman/Range/ANS/CM coders       │
//! ├──────────────────────────────────────────────────────────┤
//! │ L1: this crate                                           │
//! │     bit streams, checksums, traits, errors               │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod bitstream;
pub mod error;
pub mod event;
pub mod global;
pub mod hash;
pub mod traits;

// Re-exports for convenience
pub use bitstream::{InputBitStream, OutputBitStream};
pub use error::{KanziError, Result};
pub use event::{Event, EventType, Listener};
pub use hash::XxHash32;
pub use traits::{ByteTransform, EntropyDecoder, EntropyEncoder, Slice};
