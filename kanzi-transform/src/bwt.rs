//! Burrows-Wheeler Transform.
//!
//! Forward builds a suffix array and emits the last column; the rank of the
//! original string is kept as the primary index. Inverse rebuilds the text
//! by walking the LF mapping, with a packed `(rank << 8) | byte` array for
//! blocks under 2^24 bytes and split arrays above.
//!
//! ```text
//! Source: mississippi
//! Suffix array: 10 7 4 1 0 9 8 6 3 5 2
//! BWT output:   pssm[i]pissii  (primary index 4)
//! ```
//!
//! The block may conceptually be split into up to 8 chunks with one primary
//! index each; the chunk count is currently always 1.

use crate::divsufsort::DivSufSort;
use kanzi_core::{ByteTransform, Slice};

/// Largest supported block (31 bits would overflow the suffix array).
pub const MAX_BWT_BLOCK_SIZE: usize = 1024 * 1024 * 1024;

/// Number of BWT chunks for a block of the given size. Always 1 for now.
pub fn bwt_chunks(_size: usize) -> usize {
    1
}

/// Burrows-Wheeler transform with reusable buffers.
#[derive(Debug)]
pub struct Bwt {
    sa_algo: DivSufSort,
    sa_buf: Vec<i32>,
    data32: Vec<u32>,
    data8: Vec<u8>,
    primary_indexes: [usize; 9],
}

impl Default for Bwt {
    fn default() -> Self {
        Self::new()
    }
}

impl Bwt {
    /// Create a new transform.
    pub fn new() -> Self {
        Self {
            sa_algo: DivSufSort::new(),
            sa_buf: Vec::new(),
            data32: Vec::new(),
            data8: Vec::new(),
            primary_indexes: [0; 9],
        }
    }

    /// Primary index of chunk `n`.
    pub fn primary_index(&self, n: usize) -> usize {
        self.primary_indexes[n]
    }

    /// Record the primary index of chunk `n`.
    pub fn set_primary_index(&mut self, n: usize, primary_index: usize) -> bool {
        if n >= 9 {
            return false;
        }

        self.primary_indexes[n] = primary_index;
        true
    }

    fn inverse_small(&mut self, src: &[u8], dst: &mut [u8], count: usize) {
        // Packed rank + byte, fits as long as count < 2^24
        self.data32.clear();
        self.data32.resize(count, 0);
        let data = &mut self.data32[..];
        let mut buckets = [0u32; 256];

        let p_idx = self.primary_indexes[0];
        let val0 = src[p_idx] as usize;
        data[p_idx] = val0 as u32;
        buckets[val0] += 1;

        for i in 0..p_idx {
            let val = src[i] as usize;
            data[i] = (buckets[val] << 8) | val as u32;
            buckets[val] += 1;
        }

        for i in p_idx + 1..count {
            let val = src[i] as usize;
            data[i] = (buckets[val] << 8) | val as u32;
            buckets[val] += 1;
        }

        let mut sum = 0u32;

        for b in buckets.iter_mut() {
            sum += *b;
            *b = sum - *b;
        }

        let mut ptr = data[p_idx];
        dst[count - 1] = ptr as u8;

        for i in (0..count - 1).rev() {
            ptr = data[((ptr >> 8) + buckets[(ptr & 0xFF) as usize]) as usize];
            dst[i] = ptr as u8;
        }
    }

    fn inverse_big(&mut self, src: &[u8], dst: &mut [u8], count: usize) {
        // Split arrays for blocks of 2^24 bytes and more
        self.data32.clear();
        self.data32.resize(count, 0);
        self.data8.clear();
        self.data8.resize(count, 0);
        let mut buckets = [0u32; 256];

        let p_idx = self.primary_indexes[0];
        let val0 = src[p_idx] as usize;
        self.data32[p_idx] = buckets[val0];
        self.data8[p_idx] = val0 as u8;
        buckets[val0] += 1;

        for i in 0..p_idx {
            let val = src[i] as usize;
            self.data32[i] = buckets[val];
            self.data8[i] = val as u8;
            buckets[val] += 1;
        }

        for i in p_idx + 1..count {
            let val = src[i] as usize;
            self.data32[i] = buckets[val];
            self.data8[i] = val as u8;
            buckets[val] += 1;
        }

        let mut sum = 0u32;

        for b in buckets.iter_mut() {
            sum += *b;
            *b = sum - *b;
        }

        let mut val1 = self.data32[p_idx];
        let mut val2 = self.data8[p_idx];
        dst[count - 1] = val2;

        for i in (0..count - 1).rev() {
            let n = (val1 + buckets[val2 as usize]) as usize;
            val1 = self.data32[n];
            val2 = self.data8[n];
            dst[i] = val2;
        }
    }
}

impl ByteTransform for Bwt {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count > dst.remaining() || count > MAX_BWT_BLOCK_SIZE {
            return false;
        }

        if count < 2 {
            if count == 1 {
                dst.buf[dst.idx] = src.buf[src.idx];
                src.idx += 1;
                dst.idx += 1;
            }

            return true;
        }

        let s = &src.buf[src.idx..src.idx + count];
        self.sa_buf.clear();
        self.sa_buf.resize(count, 0);
        self.sa_algo.compute_suffix_array(s, &mut self.sa_buf);
        let sa = &self.sa_buf;
        let d = &mut dst.buf[dst.idx..dst.idx + count];

        let mut n = 0usize;

        while n < count {
            if sa[n] == 0 {
                self.primary_indexes[0] = n;
                break;
            }

            d[n] = s[sa[n] as usize - 1];
            n += 1;
        }

        d[n] = s[count - 1];
        n += 1;

        while n < count {
            d[n] = s[sa[n] as usize - 1];
            n += 1;
        }

        src.idx += count;
        dst.idx += count;
        true
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count > dst.remaining() || count > MAX_BWT_BLOCK_SIZE {
            return false;
        }

        if count < 2 {
            if count == 1 {
                dst.buf[dst.idx] = src.buf[src.idx];
                src.idx += 1;
                dst.idx += 1;
            }

            return true;
        }

        if self.primary_indexes[0] >= count {
            return false;
        }

        let (sbase, dbase) = (src.idx, dst.idx);

        {
            let s = &src.buf[sbase..sbase + count];
            let d = &mut dst.buf[dbase..dbase + count];

            if count < 1 << 24 {
                self.inverse_small(s, d, count);
            } else {
                self.inverse_big(s, d, count);
            }
        }

        src.idx += count;
        dst.idx += count;
        true
    }
}
