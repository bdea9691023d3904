//! Run Length transform.
//!
//! A prescan decides, per symbol, whether encoding its runs pays for itself;
//! the verdicts are packed into a 32-byte flag header so the decoder applies
//! the exact same rule. Runs of a flagged symbol are emitted as `threshold`
//! copies followed by the excess length in 1, 2 or 3 bytes.

use kanzi_core::{ByteTransform, Slice};

const RUN_LEN_ENCODE1: usize = 224;
const RUN_LEN_ENCODE2: usize = (255 - RUN_LEN_ENCODE1) << 8;
const MAX_RUN: usize = 0xFFFF;

/// Run-length codec with a configurable run threshold.
#[derive(Debug)]
pub struct Rlt {
    threshold: usize,
}

impl Default for Rlt {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Rlt {
    /// Create a codec. `threshold` is the shortest run worth encoding and
    /// must be at least 2.
    pub fn new(threshold: usize) -> Self {
        assert!(threshold >= 2, "run threshold must be at least 2");
        Self { threshold }
    }

    fn emit_run(dst: &mut [u8], mut di: usize, prev: u8, mut run: usize) -> usize {
        dst[di] = prev;
        di += 1;

        if run >= RUN_LEN_ENCODE1 {
            if run < RUN_LEN_ENCODE2 {
                run -= RUN_LEN_ENCODE1;
                dst[di] = (RUN_LEN_ENCODE1 + (run >> 8)) as u8;
                di += 1;
            } else {
                run -= RUN_LEN_ENCODE2;
                dst[di] = 0xFF;
                dst[di + 1] = (run >> 8) as u8;
                di += 2;
            }
        }

        dst[di] = run as u8;
        di + 1
    }
}

impl ByteTransform for Rlt {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || dst.remaining() < count.max(32) {
            return false;
        }

        let threshold = self.threshold;
        let max_run = MAX_RUN + threshold;
        let sbase = src.idx;
        let dbase = dst.idx;
        let dst_end = count.min(dst.remaining());

        // Step 1: profitability counters per symbol
        let mut counters = [0i32; 256];
        let mut prev = !src.buf[sbase];
        let mut run = 0usize;

        for i in 0..count {
            let val = src.buf[sbase + i];

            if prev == val && run < MAX_RUN {
                run += 1;
                continue;
            }

            if run >= threshold {
                counters[prev as usize] += (run - threshold) as i32 - 1;
            }

            prev = val;
            run = 1;
        }

        if run >= threshold {
            counters[prev as usize] += (run - threshold) as i32 - 1;
        }

        let mut flags = [0u8; 32];

        for i in 0..256 {
            if counters[i] > 0 {
                flags[i >> 3] |= 1 << (7 - (i & 7));
            }
        }

        let mut di = 32usize;
        dst.buf[dbase..dbase + 32].copy_from_slice(&flags);

        // Step 2: emit literals and run lengths
        let mut si = 0usize;
        prev = !src.buf[sbase];
        run = 0;
        let mut ok = true;

        while si < count {
            let val = src.buf[sbase + si];

            if prev == val && run < max_run && counters[prev as usize] > 0 {
                run += 1;

                if run < threshold {
                    if di >= dst_end {
                        ok = false;
                        break;
                    }

                    dst.buf[dbase + di] = prev;
                    di += 1;
                }

                si += 1;
                continue;
            }

            if run >= threshold {
                // Worst case: symbol + 3 length bytes
                if di + 4 > dst_end {
                    ok = false;
                    break;
                }

                di = Self::emit_run(&mut dst.buf[dbase..], di, prev, run - threshold);
            }

            if di >= dst_end {
                ok = false;
                break;
            }

            dst.buf[dbase + di] = val;
            di += 1;
            prev = val;
            run = 1;
            si += 1;
        }

        // Pending run at end of block
        if ok && run >= threshold {
            if di + 4 > dst_end {
                ok = false;
            } else {
                di = Self::emit_run(&mut dst.buf[dbase..], di, prev, run - threshold);
            }
        }

        src.idx += si;
        dst.idx += di;
        ok && si == count
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count < 32 {
            return false;
        }

        let threshold = self.threshold;
        let max_run = MAX_RUN + threshold;
        let sbase = src.idx;
        let dbase = dst.idx;
        let dst_end = dst.remaining();

        // Read the per-symbol flags
        let mut counters = [0i32; 256];

        for i in 0..32 {
            let flag = src.buf[sbase + i];

            for j in 0..8 {
                counters[(i << 3) + j] = i32::from((flag >> (7 - j)) & 1);
            }
        }

        let mut si = 32usize;
        let mut di = 0usize;
        let mut prev = !src.buf[sbase + si];
        let mut run = 0usize;
        let mut ok = true;

        while si < count {
            let val = src.buf[sbase + si];
            si += 1;

            if prev == val && counters[prev as usize] > 0 {
                run += 1;

                if run >= threshold {
                    // Decode the excess run length
                    if si >= count {
                        ok = false;
                        break;
                    }

                    let mut r = src.buf[sbase + si] as usize;
                    si += 1;

                    if r == 0xFF {
                        if si + 2 > count {
                            ok = false;
                            break;
                        }

                        r = ((src.buf[sbase + si] as usize) << 8)
                            | src.buf[sbase + si + 1] as usize;
                        si += 2;
                        r += RUN_LEN_ENCODE2;
                    } else if r >= RUN_LEN_ENCODE1 {
                        if si >= count {
                            ok = false;
                            break;
                        }

                        r = ((r - RUN_LEN_ENCODE1) << 8) | src.buf[sbase + si] as usize;
                        si += 1;
                        r += RUN_LEN_ENCODE1;
                    }

                    if di + r > dst_end || r > max_run {
                        ok = false;
                        break;
                    }

                    for _ in 0..r {
                        dst.buf[dbase + di] = prev;
                        di += 1;
                    }

                    run = 0;
                }
            } else {
                prev = val;
                run = 1;
            }

            if di >= dst_end {
                ok = false;
                break;
            }

            dst.buf[dbase + di] = val;
            di += 1;
        }

        src.idx += si;
        dst.idx += di;
        ok && si == count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; data.len().max(64)];
        let mut t = Rlt::default();
        let mut d = Slice::new(&mut fwd);

        assert!(
            t.forward(&mut Slice::new(&mut input), &mut d, data.len()),
            "forward failed"
        );

        let flen = d.idx;
        let mut back = vec![0u8; data.len()];
        let mut t2 = Rlt::default();
        let mut b = Slice::new(&mut back);

        assert!(t2.inverse(&mut Slice::with_idx(&mut fwd, 0), &mut b, flen));
        assert_eq!(b.idx, data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn test_long_run_shrinks() {
        let mut data = vec![b'x'; 5000];
        data.push(b'y');

        let mut input = data.clone();
        let mut fwd = vec![0u8; data.len()];
        let mut t = Rlt::default();
        let mut d = Slice::new(&mut fwd);
        assert!(t.forward(&mut Slice::new(&mut input), &mut d, data.len()));
        assert!(d.idx < 64);

        roundtrip(&data);
    }

    #[test]
    fn test_roundtrip_corpus() {
        let cases: Vec<Vec<u8>> = vec![vec![7u8; 230], vec![7u8; 9000], vec![0u8; 40000]];

        for data in cases {
            roundtrip(&data);
        }
    }

    #[test]
    fn test_mixed_flagged_and_unflagged() {
        // 'a' runs pay off, 'b' runs (length == threshold) do not
        let mut data = Vec::new();

        for _ in 0..10 {
            data.extend_from_slice(&[b'a'; 50]);
            data.extend_from_slice(b"bbb");
            data.extend_from_slice(b"xyz");
        }

        roundtrip(&data);
    }

    #[test]
    fn test_incompressible_fails() {
        // No runs at all: the 32-byte header alone forces growth
        let data: Vec<u8> = (0..=255u8).cycle().take(256).collect();
        let mut input = data.clone();
        let mut fwd = vec![0u8; data.len()];
        let mut t = Rlt::default();

        assert!(!t.forward(
            &mut Slice::new(&mut input),
            &mut Slice::new(&mut fwd),
            data.len()
        ));
    }
}
