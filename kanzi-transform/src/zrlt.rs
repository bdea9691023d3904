//! Zero Run Length transform.
//!
//! Made for post-BWT/MTFT data where zero dominates. A run of zeros is
//! emitted as the run length in binary, one bit per byte, most significant
//! bit dropped (it is always 1). Non-zero bytes are shifted up by one;
//! values 0xFE and 0xFF are escaped behind a 0xFF prefix.

use kanzi_core::{ByteTransform, Slice};

const ZRLT_MAX_RUN: usize = 0x7FFF_FFFF;

/// Zero run-length codec.
#[derive(Debug, Default)]
pub struct Zrlt;

impl Zrlt {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl ByteTransform for Zrlt {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() {
            return false;
        }

        let (sbase, dbase) = (src.idx, dst.idx);
        // Output may not grow: cap at the input size
        let dst_end = count.min(dst.remaining());
        let mut si = 0usize;
        let mut di = 0usize;
        let mut run = 1usize;

        while si < count {
            if src.buf[sbase + si] == 0 {
                run += 1;
                si += 1;

                if si < count && run < ZRLT_MAX_RUN {
                    continue;
                }
            }

            if run > 1 {
                // Write the run length bit by bit, except the implied MSB
                let log = 31 - (run as u32).leading_zeros();

                if di + log as usize > dst_end {
                    break;
                }

                for b in (0..log).rev() {
                    dst.buf[dbase + di] = ((run >> b) & 1) as u8;
                    di += 1;
                }

                run = 1;
                continue;
            }

            let val = src.buf[sbase + si];

            if val >= 0xFE {
                if di + 2 > dst_end {
                    break;
                }

                dst.buf[dbase + di] = 0xFF;
                dst.buf[dbase + di + 1] = val - 0xFE;
                di += 2;
            } else {
                if di + 1 > dst_end {
                    break;
                }

                dst.buf[dbase + di] = val + 1;
                di += 1;
            }

            si += 1;
        }

        src.idx += si;
        dst.idx += di;
        si == count && run == 1
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() {
            return false;
        }

        let (sbase, dbase) = (src.idx, dst.idx);
        let dst_end = dst.remaining();
        let mut si = 0usize;
        let mut di = 0usize;
        let mut run = 1usize;

        while di < dst_end {
            if run > 1 {
                run -= 1;
                dst.buf[dbase + di] = 0;
                di += 1;
                continue;
            }

            if si >= count {
                break;
            }

            let mut val = src.buf[sbase + si];

            if val <= 1 {
                // Rebuild the run length, restoring the implied MSB
                run = 1;

                loop {
                    run = (run << 1) | val as usize;
                    si += 1;

                    if si >= count {
                        break;
                    }

                    val = src.buf[sbase + si];

                    if val > 1 {
                        break;
                    }
                }

                continue;
            }

            if val == 0xFF {
                si += 1;

                if si >= count {
                    break;
                }

                dst.buf[dbase + di] = 0xFE + src.buf[sbase + si];
            } else {
                dst.buf[dbase + di] = val - 1;
            }

            si += 1;
            di += 1;
        }

        // Trailing zeros from a run that reached end of input
        let end = di + run - 1;

        if end > dst_end {
            src.idx += si;
            dst.idx += di;
            return false;
        }

        while di < end {
            dst.buf[dbase + di] = 0;
            di += 1;
        }

        src.idx += si;
        dst.idx += di;
        si == count
    }
}
