//! Shared math tables for the probability models.
//!
//! The logistic pair `squash`/`stretch` and the log2 tables are process-wide
//! read-only constants, built once on first use and shared by reference.

use std::sync::OnceLock;

/// 1<<16 * 1/(1 + exp(-alpha*x)) with alpha = 0.52631, at 33 sample points.
const INV_EXP: [i32; 33] = [
    0, 24, 41, 70, 118, 200, 338, 570, 958, 1606, 2673, 4400, 7116, 11203, 16955, 24339, 32768,
    41197, 48581, 54333, 58420, 61136, 62863, 63930, 64578, 64966, 65198, 65336, 65418, 65466,
    65495, 65512, 65522,
];

static SQUASH: OnceLock<Vec<i32>> = OnceLock::new();
static STRETCH: OnceLock<Vec<i32>> = OnceLock::new();
static LOG2_4096: OnceLock<Vec<i32>> = OnceLock::new();

fn squash_table() -> &'static [i32] {
    SQUASH.get_or_init(|| {
        let mut res = vec![0i32; 4095];

        for x in -2047..=2047i32 {
            let w = x & 127;
            let y = (x >> 7) + 16;
            res[(x + 2047) as usize] =
                (INV_EXP[y as usize] * (128 - w) + INV_EXP[(y + 1) as usize] * w) >> 11;
        }

        res
    })
}

/// p = 4096/(1 + e^-d): map a stretched value in [-2047, 2047] back to a
/// probability in [0, 4095].
#[inline]
pub fn squash(d: i32) -> i32 {
    if d >= 2048 {
        return 4095;
    }

    if d <= -2048 {
        return 0;
    }

    squash_table()[(d + 2047) as usize]
}

fn stretch_table() -> &'static [i32] {
    STRETCH.get_or_init(|| {
        // Invert squash by scanning its outputs
        let mut res = vec![0i32; 4096];
        let mut pi = 0usize;

        for x in -2047..=2047i32 {
            let i = squash(x) as usize;

            while pi <= i {
                res[pi] = x;
                pi += 1;
            }
        }

        res[4095] = 2047;
        res
    })
}

/// d = ln(p/(1-p)): inverse of [`squash`], `p` in [0, 4095], result in
/// [-2047, 2047].
#[inline]
pub fn stretch(p: i32) -> i32 {
    stretch_table()[p as usize]
}

fn log2_4096_table() -> &'static [i32] {
    LOG2_4096.get_or_init(|| {
        let mut res = vec![0i32; 257];

        for (i, v) in res.iter_mut().enumerate().skip(1) {
            *v = (4096.0 * (i as f64).log2()).round() as i32;
        }

        res
    })
}

/// Integer floor of log2(x). `x` must be non-zero.
#[inline]
pub fn log2(x: u32) -> u32 {
    debug_assert!(x != 0);
    31 - x.leading_zeros()
}

/// 1024 * log2(x), accurate to the table resolution. `x` must be non-zero.
pub fn log2_1024(x: u32) -> i32 {
    debug_assert!(x != 0);

    if x < 256 {
        return (log2_4096_table()[x as usize] + 2) >> 2;
    }

    let log = log2(x) as i32;

    if x & (x - 1) == 0 {
        return log << 10;
    }

    // Fold x down to [128, 256) and add the table refinement
    ((log - 7) << 10) + ((log2_4096_table()[(x >> (log - 7)) as usize] + 2) >> 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squash_range_and_monotonic() {
        assert_eq!(squash(-2048), 0);
        assert_eq!(squash(2048), 4095);
        assert_eq!(squash(0), 2048);

        let mut prev = squash(-2047);
        for d in -2046..=2047 {
            let s = squash(d);
            assert!(s >= prev);
            prev = s;
        }
    }

    #[test]
    fn test_stretch_inverts_squash() {
        for d in (-2000..=2000).step_by(37) {
            let s = squash(d);
            let d2 = stretch(s);
            // Inversion is exact up to the flat regions of the table
            assert_eq!(squash(d2), s, "d = {}", d);
        }
    }

    #[test]
    fn test_log2_1024() {
        assert_eq!(log2_1024(1), 0);
        assert_eq!(log2_1024(2), 1024);
        assert_eq!(log2_1024(1 << 20), 20 << 10);

        // log2(3) = 1.585 -> ~1623
        let l3 = log2_1024(3);
        assert!((1622..=1624).contains(&l3));
    }

    #[test]
    fn test_log2_floor() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(255), 7);
        assert_eq!(log2(256), 8);
    }
}
