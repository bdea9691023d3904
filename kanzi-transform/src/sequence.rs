//! Ordered composition of up to eight transforms.
//!
//! Stages ping-pong between the two pipeline buffers. A stage whose forward
//! pass fails (no gain, or output would not fit) is bypassed: its input is
//! copied through and the matching skip-flag bit is set, so the decoder
//! applies only the stages that actually ran, in reverse order. Stage `i`
//! maps to bit `7 - i` of the flags byte; bits of unused stages are set.

use kanzi_core::{ByteTransform, Slice};

/// All stages skipped (or absent).
pub const SKIP_MASK: u8 = 0xFF;

/// Identity transform for the NONE token.
#[derive(Debug, Default)]
pub struct NullTransform;

impl NullTransform {
    /// Create a new pass-through transform.
    pub fn new() -> Self {
        Self
    }
}

impl ByteTransform for NullTransform {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count > dst.remaining() {
            return false;
        }

        dst.buf[dst.idx..dst.idx + count].copy_from_slice(&src.buf[src.idx..src.idx + count]);
        src.idx += count;
        dst.idx += count;
        true
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        self.forward(src, dst, count)
    }
}

/// A chain of up to 8 transforms with per-stage skip flags.
pub struct TransformSequence {
    transforms: Vec<Box<dyn ByteTransform + Send>>,
    skip_flags: u8,
}

impl std::fmt::Debug for TransformSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformSequence")
            .field("stages", &self.transforms.len())
            .field("skip_flags", &self.skip_flags)
            .finish()
    }
}

impl TransformSequence {
    /// Build a sequence from its stages. At least one stage is required.
    pub fn new(transforms: Vec<Box<dyn ByteTransform + Send>>) -> Self {
        assert!(
            !transforms.is_empty() && transforms.len() <= 8,
            "a sequence holds 1 to 8 transforms"
        );

        Self {
            transforms,
            skip_flags: 0,
        }
    }

    /// Skip flags from the last forward pass.
    pub fn skip_flags(&self) -> u8 {
        self.skip_flags
    }

    /// Install the decoder-side skip flags.
    pub fn set_skip_flags(&mut self, flags: u8) {
        self.skip_flags = flags;
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// True when the sequence has no stages (never, by construction).
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Worst-case output size over all stages.
    pub fn max_encoded_len(&self, src_len: usize) -> usize {
        self.transforms
            .iter()
            .map(|t| t.max_encoded_len(src_len))
            .fold(src_len, usize::max)
    }

    /// Run every stage forward. Returns false when every stage was skipped.
    pub fn forward<'a>(&mut self, src: &mut Slice<'a>, dst: &mut Slice<'a>, count: usize) -> bool {
        if count == 0 {
            return true;
        }

        if count > src.remaining() {
            return false;
        }

        let block_size = count;
        let mut count = count;
        let mut in_src = true;
        self.skip_flags = 0;

        for i in 0..self.transforms.len() {
            let (from, to): (&mut Slice<'_>, &mut Slice<'_>) = if in_src {
                (&mut *src, &mut *dst)
            } else {
                (&mut *dst, &mut *src)
            };

            let saved_from = from.idx;
            let saved_to = to.idx;

            if self.transforms[i].forward(from, to, count) {
                count = to.idx - saved_to;
            } else {
                // Stage bypassed: copy the input through. The pipeline sizes
                // both buffers to max_encoded_len, so the copy always fits.
                from.idx = saved_from;
                to.idx = saved_to;
                debug_assert!(to.buf.len() - saved_to >= count);
                to.buf[saved_to..saved_to + count]
                    .copy_from_slice(&from.buf[saved_from..saved_from + count]);
                self.skip_flags |= 1 << (7 - i);
            }

            from.idx = saved_from;
            to.idx = saved_to;
            in_src = !in_src;
        }

        for j in self.transforms.len()..8 {
            self.skip_flags |= 1 << (7 - j);
        }

        if in_src {
            // Result sits in the source buffer: move it over
            dst.buf[dst.idx..dst.idx + count].copy_from_slice(&src.buf[src.idx..src.idx + count]);
        }

        src.idx += block_size;
        dst.idx += count;
        self.skip_flags != SKIP_MASK
    }

    /// Apply the inverse stages in reverse order, honoring skip flags.
    pub fn inverse<'a>(&mut self, src: &mut Slice<'a>, dst: &mut Slice<'a>, count: usize) -> bool {
        if count == 0 {
            return true;
        }

        if count > src.remaining() {
            return false;
        }

        let block_size = count;

        if self.skip_flags == SKIP_MASK {
            dst.buf[dst.idx..dst.idx + count].copy_from_slice(&src.buf[src.idx..src.idx + count]);
            src.idx += count;
            dst.idx += count;
            return true;
        }

        let mut count = count;
        let mut in_src = true;
        let mut res = true;

        for i in (0..self.transforms.len()).rev() {
            if self.skip_flags & (1 << (7 - i)) != 0 {
                continue;
            }

            let (from, to): (&mut Slice<'_>, &mut Slice<'_>) = if in_src {
                (&mut *src, &mut *dst)
            } else {
                (&mut *dst, &mut *src)
            };

            let saved_from = from.idx;
            let saved_to = to.idx;
            res = self.transforms[i].inverse(from, to, count);
            count = to.idx - saved_to;
            from.idx = saved_from;
            to.idx = saved_to;
            in_src = !in_src;

            if !res {
                break;
            }
        }

        if res && in_src {
            dst.buf[dst.idx..dst.idx + count].copy_from_slice(&src.buf[src.idx..src.idx + count]);
        }

        src.idx += block_size;
        dst.idx += count;
        res
    }
}
