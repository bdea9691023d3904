//! LZ4 block codec.
//!
//! Byte-compatible with the LZ4 r131 block format: a token packs the literal
//! and match lengths (extended with chained 0xFF bytes), match offsets are
//! 16-bit little-endian, minimum match 4, and every block ends with at least
//! `LAST_LITERALS` literal bytes.

use kanzi_core::{ByteTransform, Slice};

const LZ4_HASH_SEED: u32 = 0x9E37_79B1;
const HASH_LOG: u32 = 12;
const HASH_LOG_64K: u32 = 13;
const MAX_DISTANCE: i32 = (1 << 16) - 1;
const SKIP_STRENGTH: u32 = 6;
const LAST_LITERALS: usize = 5;
const MIN_MATCH: usize = 4;
const MF_LIMIT: usize = 12;
const LZ4_64K_LIMIT: usize = (MAX_DISTANCE as usize) + MF_LIMIT;
const ML_BITS: u32 = 4;
const ML_MASK: usize = (1 << ML_BITS) - 1;
const RUN_MASK: usize = (1 << (8 - ML_BITS)) - 1;
const MIN_LENGTH: usize = 14;
const MAX_LENGTH: usize = (32 * 1024 * 1024) - 4 - MIN_MATCH;
const SEARCH_MATCH_NB: u32 = 1 << SKIP_STRENGTH;

#[inline]
fn read_u32_le(buf: &[u8], idx: usize) -> u32 {
    u32::from_le_bytes([buf[idx], buf[idx + 1], buf[idx + 2], buf[idx + 3]])
}

#[inline]
fn hash(buf: &[u8], idx: usize, shift: u32) -> usize {
    (read_u32_le(buf, idx).wrapping_mul(LZ4_HASH_SEED) >> shift) as usize
}

#[inline]
fn same_ints(buf: &[u8], a: usize, b: usize) -> bool {
    read_u32_le(buf, a) == read_u32_le(buf, b)
}

/// Extended length encoding: chained 0xFF bytes plus a residual.
fn write_length(dst: &mut [u8], mut idx: usize, mut length: usize) -> usize {
    while length >= 0x1FE {
        dst[idx] = 0xFF;
        dst[idx + 1] = 0xFF;
        idx += 2;
        length -= 0x1FE;
    }

    if length >= 0xFF {
        dst[idx] = 0xFF;
        idx += 1;
        length -= 0xFF;
    }

    dst[idx] = length as u8;
    idx + 1
}

fn write_last_literals(src: &[u8], dst: &mut [u8], mut dst_idx: usize, run: usize) -> usize {
    let token = dst_idx;
    dst_idx += 1;

    if run >= RUN_MASK {
        dst[token] = (RUN_MASK << ML_BITS) as u8;
        dst_idx = write_length(dst, dst_idx, run - RUN_MASK);
    } else {
        dst[token] = (run << ML_BITS) as u8;
    }

    dst[dst_idx..dst_idx + run].copy_from_slice(&src[..run]);
    dst_idx + run
}

/// LZ4 block codec.
#[derive(Debug)]
pub struct Lz4Codec {
    table: Vec<i32>,
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Lz4Codec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self {
            table: vec![0i32; 1 << HASH_LOG_64K],
        }
    }
}

impl ByteTransform for Lz4Codec {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || dst.remaining() < self.max_encoded_len(count) {
            return false;
        }

        let s = &src.buf[src.idx..src.idx + count];
        let dbase = dst.idx;
        let d = &mut dst.buf[dbase..];
        let mut dst_idx = 0usize;

        if count <= MIN_LENGTH {
            dst_idx = write_last_literals(s, d, dst_idx, count);
            src.idx += count;
            dst.idx += dst_idx;
            return true;
        }

        let hash_log = if count < LZ4_64K_LIMIT {
            HASH_LOG_64K
        } else {
            HASH_LOG
        };
        let hash_shift = 32 - hash_log;
        let match_limit = count - LAST_LITERALS;
        let mf_limit = count - MF_LIMIT;
        let table = &mut self.table[..1 << hash_log];
        table.fill(0);

        let mut anchor = 0usize;
        let mut src_idx = 0usize;

        // Seed with the first position
        let mut h = hash(s, src_idx, hash_shift);
        table[h] = src_idx as i32;
        src_idx += 1;
        h = hash(s, src_idx, hash_shift);

        loop {
            let mut fwd_idx = src_idx;
            let mut step = 1usize;
            let mut search_match_nb = SEARCH_MATCH_NB;
            let mut matched: usize;

            // Find a match, accelerating through incompressible regions
            loop {
                src_idx = fwd_idx;
                fwd_idx += step;

                if fwd_idx > mf_limit {
                    dst_idx = write_last_literals(&s[anchor..], d, dst_idx, count - anchor);
                    src.idx += count;
                    dst.idx += dst_idx;
                    return true;
                }

                step = (search_match_nb >> SKIP_STRENGTH) as usize;
                search_match_nb += 1;
                matched = table[h] as usize;
                table[h] = src_idx as i32;
                h = hash(s, fwd_idx, hash_shift);

                if same_ints(s, matched, src_idx)
                    && matched as i32 > src_idx as i32 - MAX_DISTANCE
                {
                    break;
                }
            }

            // Catch up backward over equal bytes
            while matched > 0 && src_idx > anchor && s[matched - 1] == s[src_idx - 1] {
                matched -= 1;
                src_idx -= 1;
            }

            // Literal run
            let lit_length = src_idx - anchor;
            let mut token = dst_idx;
            dst_idx += 1;

            if lit_length >= RUN_MASK {
                d[token] = (RUN_MASK << ML_BITS) as u8;
                dst_idx = write_length(d, dst_idx, lit_length - RUN_MASK);
            } else {
                d[token] = (lit_length << ML_BITS) as u8;
            }

            d[dst_idx..dst_idx + lit_length].copy_from_slice(&s[anchor..anchor + lit_length]);
            dst_idx += lit_length;

            loop {
                // Offset
                let delta = src_idx - matched;
                d[dst_idx] = delta as u8;
                d[dst_idx + 1] = (delta >> 8) as u8;
                dst_idx += 2;

                // Extend the match
                src_idx += MIN_MATCH;
                matched += MIN_MATCH;
                anchor = src_idx;

                while src_idx < match_limit && s[src_idx] == s[matched] {
                    src_idx += 1;
                    matched += 1;
                }

                let match_length = src_idx - anchor;

                if match_length >= ML_MASK {
                    d[token] += ML_MASK as u8;
                    dst_idx = write_length(d, dst_idx, match_length - ML_MASK);
                } else {
                    d[token] += match_length as u8;
                }

                anchor = src_idx;

                if src_idx > mf_limit {
                    dst_idx = write_last_literals(&s[anchor..], d, dst_idx, count - anchor);
                    src.idx += count;
                    dst.idx += dst_idx;
                    return true;
                }

                // Record the skipped position
                h = hash(s, src_idx - 2, hash_shift);
                table[h] = (src_idx - 2) as i32;

                // Test the current position for an immediate next match
                h = hash(s, src_idx, hash_shift);
                matched = table[h] as usize;
                table[h] = src_idx as i32;

                if !same_ints(s, matched, src_idx)
                    || matched as i32 <= src_idx as i32 - MAX_DISTANCE
                {
                    break;
                }

                token = dst_idx;
                dst_idx += 1;
                d[token] = 0;
            }

            src_idx += 1;
            h = hash(s, src_idx, hash_shift);
        }
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count == 0 {
            return false;
        }

        let s = &src.buf[src.idx..src.idx + count];
        let dbase = dst.idx;
        let dst_end = dst.remaining();
        let mut si = 0usize;
        let mut di = 0usize;

        loop {
            if si >= count {
                return false;
            }

            // Literal length from the token
            let token = s[si] as usize;
            si += 1;
            let mut length = token >> ML_BITS;

            if length == RUN_MASK {
                loop {
                    if si >= count {
                        return false;
                    }

                    let len = s[si] as usize;
                    si += 1;
                    length += len;

                    if len != 0xFF {
                        break;
                    }
                }

                if length > MAX_LENGTH {
                    return false;
                }
            }

            // Literals
            if si + length > count || di + length > dst_end {
                return false;
            }

            dst.buf[dbase + di..dbase + di + length].copy_from_slice(&s[si..si + length]);
            si += length;
            di += length;

            if si >= count {
                break;
            }

            if si + 2 > count {
                return false;
            }

            // Offset
            let delta = (s[si] as usize) | ((s[si + 1] as usize) << 8);
            si += 2;

            if delta > di {
                return false;
            }

            length = token & ML_MASK;

            if length == ML_MASK {
                loop {
                    if si >= count {
                        return false;
                    }

                    let len = s[si] as usize;
                    si += 1;
                    length += len;

                    if len != 0xFF {
                        break;
                    }
                }

                if length > MAX_LENGTH {
                    return false;
                }
            }

            length += MIN_MATCH;

            if di + length > dst_end {
                return false;
            }

            // Sequential copy handles overlapping references
            let from = di - delta;

            for k in 0..length {
                dst.buf[dbase + di + k] = dst.buf[dbase + from + k];
            }

            di += length;
        }

        src.idx += si;
        dst.idx += di;
        si == count
    }

    fn max_encoded_len(&self, src_len: usize) -> usize {
        src_len + (src_len / 255) + 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn roundtrip(data: &[u8]) -> usize {
        let mut codec = Lz4Codec::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; codec.max_encoded_len(data.len())];
        let mut d = Slice::new(&mut fwd);

        assert!(codec.forward(&mut Slice::new(&mut input), &mut d, data.len()));
        let flen = d.idx;

        let mut back = vec![0u8; data.len()];
        let mut b = Slice::new(&mut back);
        assert!(
            Lz4Codec::new().inverse(&mut Slice::new(&mut fwd[..flen]), &mut b, flen),
            "inverse failed"
        );
        assert_eq!(b.idx, data.len());
        assert_eq!(back, data);
        flen
    }

    #[test]
    fn test_tiny_block_is_literals() {
        // token 0x30 + 3 literals
        let data = b"abc";
        let mut codec = Lz4Codec::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; 32];
        let mut d = Slice::new(&mut fwd);
        assert!(codec.forward(&mut Slice::new(&mut input), &mut d, 3));
        let dlen = d.idx;
        assert_eq!(&fwd[..dlen], &[0x30, b'a', b'b', b'c']);
        roundtrip(data);
    }

    #[test]
    fn test_repetitive_data_compresses() {
        let data = b"abcdefgh".repeat(512);
        let flen = roundtrip(&data);
        assert!(flen < data.len() / 4);
    }

    #[test]
    fn test_text_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog. \
                     the quick brown fox jumps over the lazy dog again."
            .repeat(20);
        roundtrip(&data);
    }

    #[test]
    fn test_random_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x4B41_4E5A);

        for len in [15, 16, 64, 1000, 65_535, 65_548, 200_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 5).collect();
            roundtrip(&data);

            let noise: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            roundtrip(&noise);
        }
    }

    #[test]
    fn test_long_run() {
        let mut data = vec![0u8; 100_000];
        data.extend_from_slice(b"tail bytes here");
        let flen = roundtrip(&data);
        assert!(flen < 1024);
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let data = b"abcdabcdabcdabcdabcdabcdabcdabcd".repeat(8);
        let mut codec = Lz4Codec::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; codec.max_encoded_len(data.len())];
        let mut d = Slice::new(&mut fwd);
        assert!(codec.forward(&mut Slice::new(&mut input), &mut d, data.len()));
        let flen = d.idx;

        let mut back = vec![0u8; data.len()];
        let cut = flen / 2;
        assert!(!Lz4Codec::new().inverse(
            &mut Slice::new(&mut fwd[..cut]),
            &mut Slice::new(&mut back),
            cut
        ));
    }
}
