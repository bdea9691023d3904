//! Reduced Offset Lempel Ziv codec.
//!
//! Matches are addressed not by distance but by an index into a small set of
//! recent positions recorded per order-2 context, so a match costs one byte
//! of length plus `LOG_POS_CHECKS` bits of index. Literal/match flags, match
//! lengths and indices are all coded with a binary arithmetic coder over
//! byte-contexted adaptive probabilities, writing straight into the output
//! buffer.

use kanzi_core::{ByteTransform, Slice};

const HASH_SIZE: usize = 1 << 16;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = MIN_MATCH + 255;
const LOG_POS_CHECKS: u32 = 5;
const CHUNK_SIZE: usize = 1 << 26;
const LITERAL_FLAG: i32 = 0;
const MATCH_FLAG: i32 = 1;
const HASH: u32 = 200_002_979;
const HASH_MASK: u32 = !(CHUNK_SIZE as u32 - 1);

const TOP: u64 = 0x00FF_FFFF_FFFF_FFFF;
const MASK_24_56: u64 = 0x00FF_FFFF_FF00_0000;
const MASK_0_56: u64 = 0x00FF_FFFF_FFFF_FFFF;
const MASK_0_32: u64 = 0x0000_0000_FFFF_FFFF;

#[inline]
fn key(buf: &[u8], pos: usize) -> usize {
    (buf[pos] as usize) | ((buf[pos + 1] as usize) << 8)
}

#[inline]
fn hash(buf: &[u8], pos: usize) -> u32 {
    let v = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
    (v & 0x00FF_FFFF).wrapping_mul(HASH) & HASH_MASK
}

/// Two-speed adaptive bit model, 256 byte contexts.
#[derive(Debug)]
struct RolzPredictor {
    p1: Vec<u16>,
    p2: Vec<u16>,
    log_size: u32,
    size: i32,
    c1: i32,
    ctx: i32,
}

impl RolzPredictor {
    fn new(log_size: u32) -> Self {
        let size = 1usize << log_size;
        let mut p = Self {
            p1: vec![0; 256 * size],
            p2: vec![0; 256 * size],
            log_size,
            size: size as i32,
            c1: 1,
            ctx: 0,
        };
        p.reset();
        p
    }

    fn reset(&mut self) {
        self.c1 = 1;
        self.ctx = 0;
        self.p1.fill(1 << 15);
        self.p2.fill(1 << 15);
    }

    fn set_context(&mut self, ctx: u8) {
        self.ctx = (ctx as i32) << self.log_size;
    }

    fn update(&mut self, bit: i32) {
        let idx = (self.ctx + self.c1) as usize;
        let m = (-bit & 0xFFFF) as u16;
        self.p1[idx] = (self.p1[idx] as i32
            - (((self.p1[idx] as i32 - m as i32) >> 3) + bit)) as u16;
        self.p2[idx] = (self.p2[idx] as i32
            - (((self.p2[idx] as i32 - m as i32) >> 6) + bit)) as u16;
        self.c1 = (self.c1 << 1) + bit;

        if self.c1 >= self.size {
            self.c1 = 1;
        }
    }

    fn get(&self) -> i32 {
        let idx = (self.ctx + self.c1) as usize;
        (self.p1[idx] as i32 + self.p2[idx] as i32) >> 5
    }
}

/// Arithmetic coder over a byte buffer, 56-bit interval.
struct RolzEncoder<'a> {
    buf: &'a mut [u8],
    idx: usize,
    low: u64,
    high: u64,
}

impl<'a> RolzEncoder<'a> {
    fn new(buf: &'a mut [u8], idx: usize) -> Self {
        Self {
            buf,
            idx,
            low: 0,
            high: TOP,
        }
    }

    fn encode_byte(&mut self, pred: &mut RolzPredictor, val: u8) {
        for shift in (0..8).rev() {
            self.encode_bit(pred, i32::from((val >> shift) & 1));
        }
    }

    fn encode_bit(&mut self, pred: &mut RolzPredictor, bit: i32) {
        let split = ((self.high - self.low) >> 4).wrapping_mul(pred.get() as u64) >> 8;

        if bit != 0 {
            self.high = self.low + split;
        } else {
            self.low += split + 1;
        }

        pred.update(bit);

        while (self.low ^ self.high) & MASK_24_56 == 0 {
            self.buf[self.idx..self.idx + 4]
                .copy_from_slice(&((self.high >> 32) as u32).to_be_bytes());
            self.idx += 4;
            self.low <<= 32;
            self.high = (self.high << 32) | MASK_0_32;
        }
    }

    fn dispose(&mut self) {
        for i in 0..8 {
            self.buf[self.idx + i] = (self.low >> 56) as u8;
            self.low <<= 8;
        }

        self.idx += 8;
    }
}

/// Mirror of [`RolzEncoder`].
struct RolzDecoder<'a> {
    buf: &'a [u8],
    idx: usize,
    low: u64,
    high: u64,
    current: u64,
}

impl<'a> RolzDecoder<'a> {
    fn new(buf: &'a [u8], idx: usize) -> Self {
        let mut current = 0u64;

        for i in 0..8 {
            current = (current << 8) | u64::from(buf[idx + i]);
        }

        Self {
            buf,
            idx: idx + 8,
            low: 0,
            high: TOP,
            current,
        }
    }

    fn decode_byte(&mut self, pred: &mut RolzPredictor) -> u8 {
        let mut val = 0u8;

        for _ in 0..8 {
            val = (val << 1) | (self.decode_bit(pred) as u8);
        }

        val
    }

    fn decode_bit(&mut self, pred: &mut RolzPredictor) -> i32 {
        let mid = self.low + (((self.high - self.low) >> 4).wrapping_mul(pred.get() as u64) >> 8);
        let bit;

        if mid >= self.current {
            bit = 1;
            self.high = mid;
        } else {
            bit = 0;
            self.low = mid + 1;
        }

        pred.update(bit);

        while (self.low ^ self.high) & MASK_24_56 == 0 {
            self.low = (self.low << 32) & MASK_0_56;
            self.high = ((self.high << 32) | MASK_0_32) & MASK_0_56;
            let val = if self.idx + 4 <= self.buf.len() {
                u64::from(u32::from_be_bytes([
                    self.buf[self.idx],
                    self.buf[self.idx + 1],
                    self.buf[self.idx + 2],
                    self.buf[self.idx + 3],
                ]))
            } else {
                0
            };
            self.current = ((self.current << 32) | val) & MASK_0_56;
            self.idx += 4;
        }

        bit
    }
}

/// ROLZ codec.
pub struct RolzCodec {
    matches: Vec<i32>,
    counters: Vec<i32>,
    pos_checks: usize,
    mask_checks: i32,
    lit_predictor: RolzPredictor,
    match_predictor: RolzPredictor,
}

impl Default for RolzCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RolzCodec {
    /// Create a codec with the default position-check window.
    pub fn new() -> Self {
        Self {
            matches: vec![0i32; HASH_SIZE << LOG_POS_CHECKS],
            counters: vec![0i32; HASH_SIZE],
            pos_checks: 1 << LOG_POS_CHECKS,
            mask_checks: (1 << LOG_POS_CHECKS) - 1,
            lit_predictor: RolzPredictor::new(9),
            match_predictor: RolzPredictor::new(LOG_POS_CHECKS),
        }
    }

    /// Best match as `(index << 8) | (length - MIN_MATCH)`, registering the
    /// current position.
    fn find_match(&mut self, buf: &[u8], pos: usize, end: usize) -> Option<usize> {
        let k = key(buf, pos - 2);
        let hash32 = hash(buf, pos);
        let counter = self.counters[k];
        let base = k << LOG_POS_CHECKS;
        let max_match = MAX_MATCH.min(end - pos);
        let mut best_len = 0usize;
        let mut best_idx = None;

        for i in 0..self.pos_checks as i32 {
            let r = self.matches[base + (((counter - i) & self.mask_checks) as usize)];

            if r == 0 {
                break;
            }

            if (r as u32) & HASH_MASK != hash32 {
                continue;
            }

            let r = ((r as u32) & !HASH_MASK) as usize;

            if buf[r] != buf[pos] {
                continue;
            }

            let mut n = 1;

            while n < max_match && buf[r + n] == buf[pos + n] {
                n += 1;
            }

            if n > best_len {
                best_idx = Some(i as usize);
                best_len = n;

                if best_len == max_match {
                    break;
                }
            }
        }

        self.counters[k] = counter + 1;
        self.matches[base + (((counter + 1) & self.mask_checks) as usize)] =
            (hash32 | pos as u32) as i32;

        if best_len < MIN_MATCH {
            None
        } else {
            Some((best_idx.unwrap() << 8) | (best_len - MIN_MATCH))
        }
    }
}

impl ByteTransform for RolzCodec {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || dst.remaining() < self.max_encoded_len(count) {
            return false;
        }

        if count <= 16 {
            for i in 0..count {
                dst.buf[dst.idx + i] = src.buf[src.idx + i];
            }

            src.idx += count;
            dst.idx += count;
            return true;
        }

        let sbase = src.idx;
        let dbase = dst.idx;
        let src_end = count - 4;
        let mut dst_idx = 4usize;
        dst.buf[dbase..dbase + 4].copy_from_slice(&(count as u32).to_be_bytes());

        self.lit_predictor.reset();
        self.match_predictor.reset();
        self.counters.fill(0);

        let mut re = RolzEncoder::new(&mut dst.buf[dbase..], dst_idx);
        let mut start_chunk = 0usize;
        let mut size_chunk = count.min(CHUNK_SIZE);
        let mut src_idx = 0usize;

        while start_chunk < src_end {
            self.matches.fill(0);
            let end_chunk = (start_chunk + size_chunk).min(src_end);
            size_chunk = end_chunk - start_chunk;
            let chunk = &src.buf[sbase + start_chunk..];

            self.lit_predictor.set_context(0);
            re.encode_bit(&mut self.lit_predictor, LITERAL_FLAG);
            re.encode_byte(&mut self.lit_predictor, chunk[0]);
            src_idx = 1;

            if start_chunk + 1 < src_end {
                re.encode_bit(&mut self.lit_predictor, LITERAL_FLAG);
                re.encode_byte(&mut self.lit_predictor, chunk[1]);
                src_idx = 2;
            }

            while src_idx < size_chunk {
                self.lit_predictor.set_context(chunk[src_idx - 1]);

                match self.find_match(chunk, src_idx, size_chunk) {
                    None => {
                        re.encode_bit(&mut self.lit_predictor, LITERAL_FLAG);
                        re.encode_byte(&mut self.lit_predictor, chunk[src_idx]);
                        src_idx += 1;
                    }
                    Some(m) => {
                        let match_len = m & 0xFF;
                        re.encode_bit(&mut self.lit_predictor, MATCH_FLAG);
                        re.encode_byte(&mut self.lit_predictor, match_len as u8);
                        let match_idx = (m >> 8) as u32;
                        self.match_predictor.set_context(chunk[src_idx - 1]);

                        for shift in (0..LOG_POS_CHECKS).rev() {
                            re.encode_bit(
                                &mut self.match_predictor,
                                ((match_idx >> shift) & 1) as i32,
                            );
                        }

                        src_idx += match_len + MIN_MATCH;
                    }
                }
            }

            // Last literals of the final chunk
            if end_chunk == src_end {
                for _ in 0..4 {
                    self.lit_predictor.set_context(chunk[src_idx - 1]);
                    re.encode_bit(&mut self.lit_predictor, LITERAL_FLAG);
                    re.encode_byte(&mut self.lit_predictor, chunk[src_idx]);
                    src_idx += 1;
                }
            }

            start_chunk = end_chunk;
        }

        re.dispose();
        dst_idx = re.idx;
        src.idx += start_chunk - size_chunk + src_idx;
        dst.idx += dst_idx;
        src.idx - sbase == count
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() {
            return false;
        }

        if count <= 16 {
            for i in 0..count {
                dst.buf[dst.idx + i] = src.buf[src.idx + i];
            }

            src.idx += count;
            dst.idx += count;
            return true;
        }

        let sbase = src.idx;
        let dbase = dst.idx;
        let s = &src.buf[sbase..sbase + count];
        let dst_end = u32::from_be_bytes([s[0], s[1], s[2], s[3]]) as usize;

        if dst_end <= 16 || dst_end > dst.remaining() {
            return false;
        }

        self.lit_predictor.reset();
        self.match_predictor.reset();
        self.counters.fill(0);

        let mut rd = RolzDecoder::new(s, 4);
        // Same chunk geometry as the encoder: the last 4 bytes sit outside
        let data_end = dst_end - 4;
        let mut start_chunk = 0usize;
        let mut size_chunk = data_end.min(CHUNK_SIZE);
        let mut out_idx = 0usize;

        while start_chunk < data_end {
            self.matches.fill(0);
            let end_chunk = (start_chunk + size_chunk).min(data_end);
            size_chunk = end_chunk - start_chunk;
            let cbase = dbase + start_chunk;

            self.lit_predictor.set_context(0);

            if rd.decode_bit(&mut self.lit_predictor) != LITERAL_FLAG {
                src.idx += count;
                dst.idx += start_chunk;
                return false;
            }

            dst.buf[cbase] = rd.decode_byte(&mut self.lit_predictor);
            let mut dst_idx = 1usize;

            if start_chunk + 1 < data_end {
                if rd.decode_bit(&mut self.lit_predictor) != LITERAL_FLAG {
                    src.idx += count;
                    dst.idx += start_chunk + 1;
                    return false;
                }

                dst.buf[cbase + 1] = rd.decode_byte(&mut self.lit_predictor);
                dst_idx = 2;
            }

            while dst_idx < size_chunk {
                let saved_idx = dst_idx;
                let k = key(&dst.buf[cbase..], dst_idx - 2);
                self.lit_predictor.set_context(dst.buf[cbase + dst_idx - 1]);

                if rd.decode_bit(&mut self.lit_predictor) == MATCH_FLAG {
                    let match_len = rd.decode_byte(&mut self.lit_predictor) as usize;

                    if dst_idx + match_len + MIN_MATCH > size_chunk {
                        src.idx += count;
                        dst.idx += start_chunk + dst_idx;
                        return false;
                    }

                    self.match_predictor.set_context(dst.buf[cbase + dst_idx - 1]);
                    let mut match_idx = 0i32;

                    for _ in 0..LOG_POS_CHECKS {
                        match_idx =
                            (match_idx << 1) | rd.decode_bit(&mut self.match_predictor);
                    }

                    let slot = ((self.counters[k] - match_idx) & self.mask_checks) as usize;
                    let mut r = self.matches[(k << LOG_POS_CHECKS) + slot] as usize;

                    for _ in 0..match_len + MIN_MATCH {
                        dst.buf[cbase + dst_idx] = dst.buf[cbase + r];
                        dst_idx += 1;
                        r += 1;
                    }
                } else {
                    dst.buf[cbase + dst_idx] = rd.decode_byte(&mut self.lit_predictor);
                    dst_idx += 1;
                }

                self.counters[k] += 1;
                self.matches[(k << LOG_POS_CHECKS)
                    + ((self.counters[k] & self.mask_checks) as usize)] = saved_idx as i32;
            }

            // Final 4 literals after the last chunk
            if end_chunk == data_end {
                for _ in 0..4 {
                    self.lit_predictor.set_context(dst.buf[cbase + dst_idx - 1]);

                    if rd.decode_bit(&mut self.lit_predictor) != LITERAL_FLAG {
                        src.idx += count;
                        dst.idx += start_chunk + dst_idx;
                        return false;
                    }

                    dst.buf[cbase + dst_idx] = rd.decode_byte(&mut self.lit_predictor);
                    dst_idx += 1;
                }
            }

            out_idx = start_chunk + dst_idx;
            start_chunk = end_chunk;
        }

        src.idx += count;
        dst.idx += out_idx;
        out_idx == dst_end
    }

    fn max_encoded_len(&self, src_len: usize) -> usize {
        (src_len * 5) / 4 + 32
    }
}

impl std::fmt::Debug for RolzCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolzCodec")
            .field("pos_checks", &self.pos_checks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn roundtrip(data: &[u8]) -> usize {
        let mut codec = RolzCodec::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; codec.max_encoded_len(data.len())];
        let mut d = Slice::new(&mut fwd);

        assert!(
            codec.forward(&mut Slice::new(&mut input), &mut d, data.len()),
            "forward failed"
        );
        let flen = d.idx;

        let mut back = vec![0u8; data.len()];
        let mut b = Slice::new(&mut back);
        assert!(
            RolzCodec::new().inverse(&mut Slice::new(&mut fwd[..flen]), &mut b, flen),
            "inverse failed"
        );
        assert_eq!(b.idx, data.len());
        assert_eq!(back, data);
        flen
    }

    #[test]
    fn test_small_block_copied() {
        let data = b"0123456789abcdef";
        assert_eq!(roundtrip(data), data.len());
    }

    #[test]
    fn test_repetitive_text() {
        let data = b"compression by reduced offsets. ".repeat(256);
        let flen = roundtrip(&data);
        assert!(flen < data.len() / 2);
    }

    #[test]
    fn test_roundtrip_sizes() {
        let mut rng = StdRng::seed_from_u64(99);

        for len in [17, 100, 4096, 70_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 16).collect();
            roundtrip(&data);
        }
    }

    #[test]
    fn test_random_bytes_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1234);
        let data: Vec<u8> = (0..50_000).map(|_| rng.r#gen()).collect();
        roundtrip(&data);
    }
}
