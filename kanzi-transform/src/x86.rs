//! Call/jump address translation for x86 machine code.
//!
//! Relative displacements after `E8`/`E9` opcodes scatter across the whole
//! value range; converting them to absolute targets makes repeated calls to
//! the same function byte-identical and therefore compressible. A transformed
//! displacement is tagged with an escape byte; a literal escape byte after an
//! opcode is itself escaped so the decoder never misparses.
//!
//! Wire format after an `E8`/`E9` opcode:
//! - `0x02, b3, b2, b1, b0`: big-endian `target + 2^24` (top byte <= 0x41),
//!   replacing a 4-byte little-endian displacement whose high byte was
//!   `0x00` or `0xFF`
//! - `0x02, 0xFF`: a literal `0x02`
//! - anything else: untouched input bytes

use kanzi_core::{ByteTransform, Slice};

const INSTRUCTION_MASK: u8 = 0xFE;
const INSTRUCTION_JUMP: u8 = 0xE8;
const ESCAPE: u8 = 0x02;
const ADDRESS_BIAS: i64 = 1 << 24;

/// X86 call/jump codec.
#[derive(Debug, Default)]
pub struct X86Codec;

impl X86Codec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }

    fn is_jump(b: u8) -> bool {
        b & INSTRUCTION_MASK == INSTRUCTION_JUMP
    }
}

impl ByteTransform for X86Codec {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count < 16 {
            return false;
        }

        let s = &src.buf[src.idx..src.idx + count];

        // Prescan: bail out unless the data looks like machine code
        let mut jumps = 0usize;

        for i in 0..count - 8 {
            if Self::is_jump(s[i]) && (s[i + 4] == 0 || s[i + 4] == 0xFF) {
                jumps += 1;
            }
        }

        if jumps < (count >> 7) {
            return false;
        }

        let dbase = dst.idx;
        let dst_end = dst.remaining();
        let mut si = 0usize;
        let mut di = 0usize;

        while si < count {
            if di >= dst_end {
                src.idx += si;
                dst.idx += di;
                return false;
            }

            let b = s[si];
            dst.buf[dbase + di] = b;
            si += 1;
            di += 1;

            if !Self::is_jump(b) {
                continue;
            }

            if si + 4 <= count && (s[si + 3] == 0 || s[si + 3] == 0xFF) {
                // Relative to absolute, biased to stay non-negative
                let disp =
                    i32::from_le_bytes([s[si], s[si + 1], s[si + 2], s[si + 3]]) as i64;
                let addr = disp + si as i64 + ADDRESS_BIAS;
                debug_assert!((0..1 << 31).contains(&addr));

                if di + 5 > dst_end {
                    src.idx += si;
                    dst.idx += di;
                    return false;
                }

                dst.buf[dbase + di] = ESCAPE;
                dst.buf[dbase + di + 1..dbase + di + 5]
                    .copy_from_slice(&(addr as u32).to_be_bytes());
                di += 5;
                si += 4;
            } else if si < count && s[si] == ESCAPE {
                // Literal escape byte after an opcode
                if di + 2 > dst_end {
                    src.idx += si;
                    dst.idx += di;
                    return false;
                }

                dst.buf[dbase + di] = ESCAPE;
                dst.buf[dbase + di + 1] = 0xFF;
                di += 2;
                si += 1;
            }
        }

        src.idx += si;
        dst.idx += di;
        true
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() {
            return false;
        }

        let s = &src.buf[src.idx..src.idx + count];
        let dbase = dst.idx;
        let dst_end = dst.remaining();
        let mut si = 0usize;
        let mut di = 0usize;

        while si < count {
            if di >= dst_end {
                return false;
            }

            let b = s[si];
            dst.buf[dbase + di] = b;
            si += 1;
            di += 1;

            if !Self::is_jump(b) || si >= count || s[si] != ESCAPE {
                continue;
            }

            si += 1;

            if si < count && s[si] == 0xFF {
                // Escaped literal
                if di >= dst_end {
                    return false;
                }

                dst.buf[dbase + di] = ESCAPE;
                si += 1;
                di += 1;
                continue;
            }

            if si + 4 > count || di + 4 > dst_end {
                return false;
            }

            let addr = u32::from_be_bytes([s[si], s[si + 1], s[si + 2], s[si + 3]]) as i64;
            let disp = addr - ADDRESS_BIAS - di as i64;
            dst.buf[dbase + di..dbase + di + 4].copy_from_slice(&(disp as i32).to_le_bytes());
            si += 4;
            di += 4;
        }

        src.idx += si;
        dst.idx += di;
        true
    }

    fn max_encoded_len(&self, src_len: usize) -> usize {
        (src_len * 5) >> 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let mut input = data.to_vec();
        let codec = X86Codec::new();
        let mut fwd = vec![0u8; codec.max_encoded_len(data.len()) + 8];
        let mut t = X86Codec::new();
        let mut d = Slice::new(&mut fwd);

        assert!(
            t.forward(&mut Slice::new(&mut input), &mut d, data.len()),
            "forward failed"
        );

        let flen = d.idx;
        let mut back = vec![0u8; data.len()];
        let mut b = Slice::new(&mut back);
        assert!(X86Codec::new().inverse(&mut Slice::new(&mut fwd[..flen]), &mut b, flen));
        assert_eq!(b.idx, data.len());
        assert_eq!(back, data);
    }

    fn fake_code(calls: usize) -> Vec<u8> {
        // Interleave E8 rel32 call sites with filler, half forward half back
        let mut data = Vec::new();

        for i in 0..calls {
            data.extend_from_slice(&[0x55, 0x89, 0x90]);
            data.push(if i & 1 == 0 { 0xE8 } else { 0xE9 });
            let disp: i32 = if i & 2 == 0 { 0x1234 } else { -0x4321 };
            data.extend_from_slice(&disp.to_le_bytes());
        }

        data.extend_from_slice(&[0xC3; 16]);
        data
    }

    #[test]
    fn test_roundtrip_code() {
        roundtrip(&fake_code(64));
    }

    #[test]
    fn test_repeated_target_becomes_repeated_bytes() {
        // Two calls to the same absolute target from different sites
        let mut data = vec![0x90; 64];
        let target = 1000i32;
        // call at displacement-start 11 and 43
        data[10] = 0xE8;
        let d1 = target - 11;
        data[11..15].copy_from_slice(&d1.to_le_bytes());
        data[42] = 0xE8;
        let d2 = target - 43;
        data[43..47].copy_from_slice(&d2.to_le_bytes());

        let mut input = data.clone();
        let mut fwd = vec![0u8; 128];
        let mut t = X86Codec::new();
        let mut dsl = Slice::new(&mut fwd);
        assert!(t.forward(&mut Slice::new(&mut input), &mut dsl, data.len()));
        let flen = dsl.idx;

        // Both transformed addresses must be identical byte runs
        let a1 = fwd[..flen]
            .windows(5)
            .position(|w| w[0] == 0x02)
            .unwrap();
        let addr1 = &fwd[a1 + 1..a1 + 5].to_vec();
        let a2 = fwd[a1 + 5..flen]
            .windows(5)
            .position(|w| w[0] == 0x02)
            .unwrap()
            + a1
            + 5;
        assert_eq!(addr1, &fwd[a2 + 1..a2 + 5].to_vec());

        roundtrip(&data);
    }

    #[test]
    fn test_literal_escape_after_opcode() {
        let mut data = fake_code(32);
        // An opcode byte followed by a literal 0x02 that is not a displacement
        data.extend_from_slice(&[0xE8, 0x02, 0x77, 0x77, 0x70, 0x90, 0x90, 0x90, 0x90]);
        roundtrip(&data);
    }

    #[test]
    fn test_text_is_rejected() {
        let data = b"not machine code at all, just plain ascii text without calls".repeat(4);
        let mut input = data.clone();
        let mut fwd = vec![0u8; input.len() * 2];
        let mut t = X86Codec::new();

        assert!(!t.forward(
            &mut Slice::new(&mut input),
            &mut Slice::new(&mut fwd),
            data.len()
        ));
    }
}
