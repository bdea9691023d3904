//! BWT stage with an embedded primary-index header.
//!
//! The transform sequence moves plain byte arrays between stages, so the
//! BWT primary index travels in a small header at the front of the stage
//! output: per chunk, a 2-bit byte-count tag packed with the top 6 bits of
//! the index, then the remaining index bytes, big-endian.

use crate::bwt::{Bwt, bwt_chunks};
use kanzi_core::{ByteTransform, Slice};

const BWT_MAX_HEADER_SIZE: usize = 4;

/// BWT wrapped with its primary-index framing.
#[derive(Debug, Default)]
pub struct BwtBlockCodec {
    bwt: Bwt,
}

impl BwtBlockCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self { bwt: Bwt::new() }
    }
}

impl ByteTransform for BwtBlockCodec {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || dst.remaining() < self.max_encoded_len(count) {
            return false;
        }

        let chunks = bwt_chunks(count);
        let p0 = dst.idx;

        // Worst-case header, adjusted after the transform
        let log = if count <= 1 {
            1
        } else {
            (usize::BITS - (count - 1).leading_zeros()) as usize
        };
        let header_size1 = (chunks * (2 + log) + 7) >> 3;
        dst.idx += header_size1;

        if !self.bwt.forward(src, dst, count) {
            dst.idx = p0;
            return false;
        }

        // Actual header size from the primary index values
        let mut header_bits = 0usize;

        for i in 0..chunks {
            let primary_index = self.bwt.primary_index(i);
            let mut bits = 6;

            while (1usize << bits) <= primary_index {
                bits += 1;
            }

            header_bits += 2 + bits;
        }

        let header_size2 = (header_bits + 7) >> 3;

        if header_size2 != header_size1 {
            // Shift the payload over the final header size
            dst.buf
                .copy_within(p0 + header_size1..p0 + header_size1 + count, p0 + header_size2);
            dst.idx = dst.idx - header_size1 + header_size2;
        }

        let mut idx = p0;

        for i in 0..chunks {
            let primary_index = self.bwt.primary_index(i);
            let mut bits = 6;

            while (1usize << bits) <= primary_index {
                bits += 1;
            }

            // 2-bit extra-byte count, then the index big-endian
            let p_index_bytes = (2 + bits + 7) >> 3;
            let mut shift = (p_index_bytes - 1) << 3;
            let mode = (((bits + 1) >> 3) << 6) | ((primary_index >> shift) & 0x3F);
            dst.buf[idx] = mode as u8;
            idx += 1;

            for _ in 1..p_index_bytes {
                shift -= 8;
                dst.buf[idx] = (primary_index >> shift) as u8;
                idx += 1;
            }
        }

        true
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        let chunks = bwt_chunks(count);
        let mut remaining = count;

        for i in 0..chunks {
            if remaining == 0 {
                return false;
            }

            let mode = src.buf[src.idx] as usize;
            src.idx += 1;
            let p_index_bytes = 1 + ((mode >> 6) & 0x03);

            if remaining < p_index_bytes {
                return false;
            }

            remaining -= p_index_bytes;
            let mut shift = (p_index_bytes - 1) << 3;
            let mut primary_index = (mode & 0x3F) << shift;

            for _ in 1..p_index_bytes {
                shift -= 8;
                primary_index |= (src.buf[src.idx] as usize) << shift;
                src.idx += 1;
            }

            if !self.bwt.set_primary_index(i, primary_index) {
                return false;
            }
        }

        self.bwt.inverse(src, dst, remaining)
    }

    fn max_encoded_len(&self, src_len: usize) -> usize {
        src_len + BWT_MAX_HEADER_SIZE * bwt_chunks(src_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn roundtrip(data: &[u8]) {
        let mut codec = BwtBlockCodec::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; codec.max_encoded_len(data.len())];
        let mut d = Slice::new(&mut fwd);

        assert!(codec.forward(&mut Slice::new(&mut input), &mut d, data.len()));
        let flen = d.idx;
        assert!(flen <= data.len() + 4);

        let mut back = vec![0u8; data.len()];
        let mut b = Slice::new(&mut back);
        assert!(
            BwtBlockCodec::new().inverse(&mut Slice::new(&mut fwd[..flen]), &mut b, flen)
        );
        assert_eq!(b.idx, data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn test_header_plus_payload() {
        // 11 bytes, primary index 4 fits the 1-byte header form
        let data = b"mississippi";
        let mut codec = BwtBlockCodec::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; codec.max_encoded_len(data.len())];
        let mut d = Slice::new(&mut fwd);

        assert!(codec.forward(&mut Slice::new(&mut input), &mut d, data.len()));
        assert_eq!(d.idx, data.len() + 1);
        let dlen = d.idx;
        assert_eq!(fwd[0], 4); // tag 0, index 4
        assert_eq!(&fwd[1..dlen], b"pssmipissii");
        roundtrip(data);
    }

    #[test]
    fn test_roundtrip_sizes() {
        let mut rng = StdRng::seed_from_u64(17);

        for len in [1usize, 2, 17, 63, 64, 65, 300, 5000, 70_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 8).collect();
            roundtrip(&data);
        }
    }

    #[test]
    fn test_large_primary_index() {
        // Index needs more than 6 bits -> multi-byte header
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        roundtrip(&data);
    }
}
