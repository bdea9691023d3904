//! Error types for Kanzi operations.
//!
//! One error type covers the whole pipeline: configuration errors are raised
//! before any byte is written, bit-stream errors while parsing a container,
//! and block errors while a worker encodes or decodes. Forward transform
//! failures are not represented here: they are recoverable and turn into a
//! skip flag inside the transform sequence.

use std::io;
use thiserror::Error;

/// The main error type for Kanzi operations.
#[derive(Debug, Error)]
pub enum KanziError {
    /// I/O error from the underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration or API parameter.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected parameter.
        message: String,
    },

    /// The bit stream ran out of bits before a read completed.
    #[error("End of bit stream")]
    BitStreamEof,

    /// Read or write attempted on a closed bit stream.
    #[error("Bit stream closed")]
    BitStreamClosed,

    /// Malformed container data.
    #[error("Invalid stream: {message}")]
    InvalidStream {
        /// Description of the corruption.
        message: String,
    },

    /// Container magic number mismatch.
    #[error("Invalid stream type: {found:#010x}")]
    InvalidMagic {
        /// The 32-bit value found in place of the magic.
        found: u32,
    },

    /// Container written by an unsupported format version.
    #[error("Cannot read this version of the stream: {version}")]
    StreamVersion {
        /// The version field read from the header.
        version: u32,
    },

    /// Block size out of range or not a multiple of 16.
    #[error("Invalid block size: {size}")]
    BlockSize {
        /// The rejected block size.
        size: u64,
    },

    /// Unknown transform or entropy codec name/token.
    #[error("Unknown codec: {name}")]
    InvalidCodec {
        /// The unresolved name or numeric token.
        name: String,
    },

    /// Inverse transform failed while rebuilding a block.
    #[error("Transform inverse failed in block {block_id}: {message}")]
    Transform {
        /// 1-based id of the failing block.
        block_id: u32,
        /// Description of the failure.
        message: String,
    },

    /// Entropy coder failed while processing a block.
    #[error("Entropy codec failed in block {block_id}: {message}")]
    Entropy {
        /// 1-based id of the failing block.
        block_id: u32,
        /// Description of the failure.
        message: String,
    },

    /// Block checksum mismatch.
    #[error("Corrupted bitstream: expected checksum {expected:#010x}, found {computed:#010x}")]
    CrcMismatch {
        /// Checksum read from the container.
        expected: u32,
        /// Checksum computed over the decoded block.
        computed: u32,
    },
}

/// Result type alias for Kanzi operations.
pub type Result<T> = std::result::Result<T, KanziError>;

impl KanziError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an invalid stream error.
    pub fn invalid_stream(message: impl Into<String>) -> Self {
        Self::InvalidStream {
            message: message.into(),
        }
    }

    /// Create an unknown codec error.
    pub fn invalid_codec(name: impl Into<String>) -> Self {
        Self::InvalidCodec { name: name.into() }
    }

    /// Create a transform failure for the given block.
    pub fn transform(block_id: u32, message: impl Into<String>) -> Self {
        Self::Transform {
            block_id,
            message: message.into(),
        }
    }

    /// Create an entropy codec failure for the given block.
    pub fn entropy(block_id: u32, message: impl Into<String>) -> Self {
        Self::Entropy {
            block_id,
            message: message.into(),
        }
    }

    /// Create a checksum mismatch error.
    pub fn crc_mismatch(expected: u32, computed: u32) -> Self {
        Self::CrcMismatch { expected, computed }
    }

    /// True when the error denotes data corruption rather than misuse.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidStream { .. }
                | Self::InvalidMagic { .. }
                | Self::StreamVersion { .. }
                | Self::CrcMismatch { .. }
                | Self::BitStreamEof
        )
    }
}
