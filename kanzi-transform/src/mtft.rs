//! Move-to-Front transform.
//!
//! Forward direction keeps the 256 symbols in a chain of 16 linked buckets
//! (1 + 15x17 payloads) so a lookup costs at most one bucket scan plus a
//! running sum of bucket lengths. When the front bucket grows past
//! `RESET_THRESHOLD` the chain is rebalanced in one pass. The inverse works
//! on a flat index array.

use kanzi_core::{ByteTransform, Slice};

const RESET_THRESHOLD: i32 = 64;
const LIST_LENGTH: usize = 17;
const ANCHOR: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct Payload {
    prev: usize,
    next: usize,
    value: u8,
}

/// Move-to-Front transform with bucketed symbol lists.
#[derive(Debug)]
pub struct Mtft {
    payloads: [Payload; 257],
    heads: [usize; 16],
    lengths: [i32; 16],
    buckets: [u8; 256],
    initialized: bool,
}

impl Default for Mtft {
    fn default() -> Self {
        Self::new()
    }
}

impl Mtft {
    /// Create a new transform.
    pub fn new() -> Self {
        Self {
            payloads: [Payload::default(); 257],
            heads: [0; 16],
            lengths: [0; 16],
            buckets: [0; 256],
            initialized: false,
        }
    }

    /// Build the chain: 1 symbol in bucket 0, LIST_LENGTH in each other.
    fn init_lists(&mut self) {
        let mut previous = 0usize;
        self.payloads[0].value = 0;
        self.heads[0] = 0;
        self.lengths[0] = 1;
        self.buckets[0] = 0;
        let mut list_idx = 0usize;

        for i in 1..256usize {
            self.payloads[i].value = i as u8;

            if (i - 1) % LIST_LENGTH == 0 {
                list_idx += 1;
                self.heads[list_idx] = i;
                self.lengths[list_idx] = LIST_LENGTH as i32;
            }

            self.buckets[i] = list_idx as u8;
            self.payloads[previous].next = i;
            self.payloads[i].prev = previous;
            previous = i;
        }

        // End anchor so every payload has a successor
        self.payloads[previous].next = ANCHOR;
        self.initialized = true;
    }

    /// Rebuild bucket boundaries over the current chain order.
    fn balance_lists(&mut self, reset_values: bool) {
        self.lengths[0] = 1;
        let mut p = self.payloads[self.heads[0]].next;
        let mut val = 0u8;

        if reset_values {
            let h0 = self.heads[0];
            self.payloads[h0].value = 0;
            self.buckets[0] = 0;
        }

        for list_idx in 1..16usize {
            self.heads[list_idx] = p;
            self.lengths[list_idx] = LIST_LENGTH as i32;

            for _ in 0..LIST_LENGTH {
                if reset_values {
                    val = val.wrapping_add(1);
                    self.payloads[p].value = val;
                }

                self.buckets[self.payloads[p].value as usize] = list_idx as u8;
                p = self.payloads[p].next;
            }
        }
    }
}

impl ByteTransform for Mtft {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count > dst.remaining() {
            return false;
        }

        if !self.initialized {
            self.init_lists();
        } else {
            self.balance_lists(true);
        }

        let mut previous = self.payloads[self.heads[0]].value;

        for i in 0..count {
            let current = src.buf[src.idx + i];

            if current == previous {
                dst.buf[dst.idx + i] = 0;
                continue;
            }

            // Find the bucket, then the position inside it
            let list_idx = self.buckets[current as usize] as usize;
            let mut p = self.heads[list_idx];
            let mut idx: i32 = self.lengths[..list_idx].iter().sum();

            while self.payloads[p].value != current {
                p = self.payloads[p].next;
                idx += 1;
            }

            dst.buf[dst.idx + i] = idx as u8;

            // Unlink (the end anchor guarantees a successor)
            let old_prev = self.payloads[p].prev;
            let old_next = self.payloads[p].next;
            self.payloads[old_prev].next = old_next;
            self.payloads[old_next].prev = old_prev;

            // Relink at the head of the front bucket
            let h0 = self.heads[0];
            self.payloads[p].next = h0;
            self.payloads[h0].prev = p;
            self.heads[0] = p;

            if list_idx != 0 {
                if p == self.heads[list_idx] {
                    self.heads[list_idx] = old_next;
                }

                self.buckets[current as usize] = 0;

                if self.lengths[0] >= RESET_THRESHOLD {
                    self.balance_lists(false);
                } else {
                    self.lengths[list_idx] -= 1;
                    self.lengths[0] += 1;
                }
            }

            previous = current;
        }

        src.idx += count;
        dst.idx += count;
        true
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() || count > dst.remaining() {
            return false;
        }

        let mut indexes = [0u8; 256];

        for (i, v) in indexes.iter_mut().enumerate() {
            *v = i as u8;
        }

        let mut value = 0u8;

        for i in 0..count {
            let idx = src.buf[src.idx + i] as usize;

            if idx == 0 {
                // Head of list, nothing moves
                dst.buf[dst.idx + i] = value;
                continue;
            }

            value = indexes[idx];
            dst.buf[dst.idx + i] = value;

            if idx <= 16 {
                for j in (0..idx).rev() {
                    indexes[j + 1] = indexes[j];
                }
            } else {
                indexes.copy_within(0..idx, 1);
            }

            indexes[0] = value;
        }

        src.idx += count;
        dst.idx += count;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; data.len()];
        let mut back = vec![0u8; data.len()];

        let mut t = Mtft::new();
        assert!(t.forward(
            &mut Slice::new(&mut input),
            &mut Slice::new(&mut fwd),
            data.len()
        ));

        let mut t2 = Mtft::new();
        assert!(t2.inverse(
            &mut Slice::new(&mut fwd),
            &mut Slice::new(&mut back),
            data.len()
        ));

        assert_eq!(back, data);
    }

    #[test]
    fn test_runs_become_zeros() {
        let mut input = *b"aaaa";
        let mut out = [0u8; 4];
        let mut t = Mtft::new();
        t.forward(&mut Slice::new(&mut input), &mut Slice::new(&mut out), 4);
        assert_eq!(&out[1..], &[0, 0, 0]);
    }

    #[test]
    fn test_roundtrip_corpus() {
        let cases: [&[u8]; 5] = [
            b"a",
            b"banana",
            b"mississippi",
            b"the quick brown fox jumps over the lazy dog",
            b"aaaaabbbbbcccccdddddeeeee",
        ];

        for data in cases {
            roundtrip(data);
        }
    }

    #[test]
    fn test_roundtrip_forces_rebalance() {
        // Cycle through many distinct symbols so the front bucket fills up
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        roundtrip(&data);

        let data2: Vec<u8> = (0..=255u8).rev().cycle().take(4096).collect();
        roundtrip(&data2);
    }

    #[test]
    fn test_transform_reuse() {
        // Same instance must produce identical output on identical input
        let data = b"abracadabra".to_vec();
        let mut t = Mtft::new();
        let mut out1 = vec![0u8; data.len()];
        let mut out2 = vec![0u8; data.len()];

        let mut in1 = data.clone();
        t.forward(
            &mut Slice::new(&mut in1),
            &mut Slice::new(&mut out1),
            data.len(),
        );

        let mut in2 = data.clone();
        t.forward(
            &mut Slice::new(&mut in2),
            &mut Slice::new(&mut out2),
            data.len(),
        );

        assert_eq!(out1, out2);
    }
}
