//! # Kanzi IO
//!
//! Container streams for the Kanzi block compressor.
//!
//! [`CompressedOutputStream`] cuts written bytes into fixed-size blocks,
//! runs each through the configured transform chain and entropy coder on a
//! worker pool, and frames the results into a self-describing container.
//! [`CompressedInputStream`] reverses the process. Output ordering is
//! strict: with any worker count the bytes match the single-worker run.
//!
//! ## Container layout
//!
//! ```text
//! header:  magic(32) version(5) checksum(1) entropy(5) transform(48)
//!          blockSize/16(26) declaredBlocks(6) reserved(5)
//! block:   mode(8) [skipFlags(8)] length(8*n) [checksum(32)] payload
//! end:     mode 0x80 with a zero length
//! ```

#![warn(missing_docs)]

pub mod compress;
pub mod config;
pub mod decompress;

pub use compress::CompressedOutputStream;
pub use config::Config;
pub use decompress::CompressedInputStream;

use std::sync::atomic::{AtomicI32, Ordering};

/// Container magic, "KANZ".
pub const BITSTREAM_TYPE: u32 = 0x4B41_4E5A;
/// Container format version.
pub const BITSTREAM_FORMAT_VERSION: u32 = 6;
/// Mode bit 7: stored (copy) block.
pub const COPY_BLOCK_MASK: u8 = 0x80;
/// Mode bit 4: a separate skip-flags byte follows.
pub const TRANSFORMS_MASK: u8 = 0x10;
/// Blocks at most this long are always stored.
pub const SMALL_BLOCK_SIZE: usize = 15;
/// Sentinel stored in the processed-block counter to cancel peers.
pub const CANCEL_TASKS_ID: i32 = -1;
/// Padding on decoder staging buffers for in-band transform headers.
pub const EXTRA_BUFFER_SIZE: usize = 1024;

/// Spin until every earlier block committed its bit-stream region.
///
/// Returns false when a peer stored the cancel sentinel.
pub(crate) fn wait_turn(processed: &AtomicI32, block_id: u32) -> bool {
    loop {
        let v = processed.load(Ordering::Acquire);

        if v == CANCEL_TASKS_ID {
            return false;
        }

        if v == block_id as i32 - 1 {
            return true;
        }

        std::hint::spin_loop();
    }
}
