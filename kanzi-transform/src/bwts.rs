//! Bijective Burrows-Wheeler Transform (Scott variant).
//!
//! The input is factored into Lyndon words whose rotations are sorted
//! together, so no primary index is needed and the transform is a bijection
//! over byte strings. Forward follows the mk-bwts construction (suffix array
//! plus incremental Lyndon-head fixups); the inverse chases cycles of the LF
//! mapping.

use crate::bwt::MAX_BWT_BLOCK_SIZE;
use crate::divsufsort::DivSufSort;
use kanzi_core::{ByteTransform, Slice};

/// Bijective BWT.
#[derive(Debug)]
pub struct Bwts {
    sa_algo: DivSufSort,
    buffer1: Vec<i32>,
    buffer2: Vec<i32>,
}

impl Default for Bwts {
    fn default() -> Self {
        Self::new()
    }
}

impl Bwts {
    /// Create a new transform.
    pub fn new() -> Self {
        Self {
            sa_algo: DivSufSort::new(),
            buffer1: Vec::new(),
            buffer2: Vec::new(),
        }
    }

    fn move_lyndon_word_head(
        sa: &mut [i32],
        isa: &mut [i32],
        data: &[u8],
        count: usize,
        start: usize,
        size: usize,
        mut rank: usize,
    ) -> usize {
        let end = start + size;

        while rank + 1 < count {
            let next_start0 = sa[rank + 1] as usize;

            if next_start0 <= end {
                break;
            }

            let mut next_start = next_start0;
            let mut k = 0usize;

            while k < size && next_start < count && data[start + k] == data[next_start] {
                k += 1;
                next_start += 1;
            }

            if k == size && next_start < count && rank < isa[next_start] as usize {
                break;
            }

            if k < size && next_start < count && data[start + k] < data[next_start] {
                break;
            }

            sa[rank] = next_start0 as i32;
            isa[next_start0] = rank as i32;
            rank += 1;
        }

        sa[rank] = start as i32;
        isa[start] = rank as i32;
        rank
    }
}

impl ByteTransform for Bwts {
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
        self.buffer1.clear();
        self.buffer1.resize(count, 0);
        self.buffer2.clear();
        self.buffer2.resize(count, 0);

        self.sa_algo.compute_suffix_array(s, &mut self.buffer1);
        let sa = &mut self.buffer1;
        let isa = &mut self.buffer2;

        for i in 0..count {
            isa[sa[i] as usize] = i as i32;
        }

        let mut min = isa[0] as usize;
        let mut idx_min = 0usize;

        for i in 1..count {
            if min == 0 {
                break;
            }

            if (isa[i] as usize) >= min {
                continue;
            }

            let mut ref_rank =
                Self::move_lyndon_word_head(sa, isa, s, count, idx_min, i - idx_min, min);

            for j in (idx_min + 1..i).rev() {
                // Iterate through the new Lyndon word from end to start
                let mut test_rank = isa[j] as usize;
                let start_rank = test_rank;

                while test_rank < count - 1 {
                    let next_rank_start = sa[test_rank + 1] as usize;

                    if j > next_rank_start
                        || s[j] != s[next_rank_start]
                        || next_rank_start + 1 >= count
                        || ref_rank < isa[next_rank_start + 1] as usize
                    {
                        break;
                    }

                    sa[test_rank] = next_rank_start as i32;
                    isa[next_rank_start] = test_rank as i32;
                    test_rank += 1;
                }

                sa[test_rank] = j as i32;
                isa[j] = test_rank as i32;
                ref_rank = test_rank;

                if start_rank == test_rank {
                    break;
                }
            }

            min = isa[i] as usize;
            idx_min = i;
        }

        let d = &mut dst.buf[dst.idx..dst.idx + count];
        let mut min = count;

        for i in 0..count {
            if (isa[i] as usize) >= min {
                d[isa[i] as usize] = s[i - 1];
                continue;
            }

            if min < count {
                d[min] = s[i - 1];
            }

            min = isa[i] as usize;
        }

        d[0] = s[count - 1];
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

        let s = &src.buf[src.idx..src.idx + count];
        self.buffer1.clear();
        self.buffer1.resize(count, 0);
        let lf = &mut self.buffer1;
        let mut buckets = [0i32; 256];

        for &b in s {
            buckets[b as usize] += 1;
        }

        let mut sum = 0i32;

        for b in buckets.iter_mut() {
            sum += *b;
            *b = sum - *b;
        }

        for (i, &b) in s.iter().enumerate() {
            lf[i] = buckets[b as usize];
            buckets[b as usize] += 1;
        }

        // Chase cycles right to left
        let d = &mut dst.buf[dst.idx..dst.idx + count];
        let mut j = count as i32 - 1;
        let mut i = 0usize;

        while j >= 0 {
            if lf[i] < 0 {
                i += 1;
                continue;
            }

            let mut p = i;

            loop {
                d[j as usize] = s[p];
                j -= 1;
                let t = lf[p];
                lf[p] = -1;
                p = t as usize;

                if lf[p] < 0 {
                    break;
                }
            }

            i += 1;
        }

        src.idx += count;
        dst.idx += count;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn roundtrip(data: &[u8]) {
        let mut bwts = Bwts::new();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; data.len()];

        assert!(bwts.forward(
            &mut Slice::new(&mut input),
            &mut Slice::new(&mut fwd),
            data.len()
        ));

        let mut back = vec![0u8; data.len()];
        assert!(Bwts::new().inverse(
            &mut Slice::new(&mut fwd),
            &mut Slice::new(&mut back),
            data.len()
        ));

        assert_eq!(back, data, "input: {:?}", data);
    }

    #[test]
    fn test_small_inputs() {
        roundtrip(b"a");
        roundtrip(b"ab");
        roundtrip(b"ba");
        roundtrip(b"aaaa");
        roundtrip(b"banana");
        roundtrip(b"mississippi");
        roundtrip(b"abracadabra");
    }

    #[test]
    fn test_no_primary_index_needed() {
        // Bijectivity: every output decodes without side information
        let data = b"swiss miss bliss";
        roundtrip(data);
    }

    #[test]
    fn test_runs_and_cycles() {
        roundtrip(&[7u8; 500]);
        roundtrip(&b"ab".repeat(300));
        roundtrip(&b"abc".repeat(100));
    }

    #[test]
    fn test_random() {
        let mut rng = StdRng::seed_from_u64(0xB375);

        for len in [10usize, 100, 1000, 20_000] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>() % 4).collect();
            roundtrip(&data);

            let noise: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            roundtrip(&noise);
        }
    }

    #[test]
    fn test_text() {
        roundtrip(&b"to be or not to be that is the question ".repeat(50));
    }
}
