//! Adaptive probability map (secondary symbol estimation).
//!
//! Maps an input probability plus a context to a refined probability by
//! interpolating between 33 bins on the logistic (stretched) scale, then
//! nudges the two surrounding bins toward the observed bit.

use kanzi_core::global;

/// APM with a fixed learning rate; smaller rates adapt faster.
#[derive(Debug)]
pub struct LogisticAdaptiveProbMap<const RATE: i32> {
    /// 33 interpolation bins per context.
    data: Vec<i32>,
    index: usize,
}

impl<const RATE: i32> LogisticAdaptiveProbMap<RATE> {
    /// Create a map with `n` contexts.
    pub fn new(n: usize) -> Self {
        let mut data = vec![0i32; 33 * n];

        for j in 0..33 {
            data[j] = global::squash((j as i32 - 16) << 7) << 4;
        }

        for i in 1..n {
            let (head, tail) = data.split_at_mut(33 * i);
            tail[..33].copy_from_slice(&head[..33]);
        }

        Self { data, index: 0 }
    }

    /// Train on `bit`, then refine `pr` (0..4095) in context `ctx`.
    pub fn get(&mut self, bit: i32, pr: i32, ctx: usize) -> i32 {
        // Learn from the previous lookup
        let g = (bit << 16) + (bit << RATE) - (bit << 1);
        self.data[self.index] += (g - self.data[self.index]) >> RATE;
        self.data[self.index + 1] += (g - self.data[self.index + 1]) >> RATE;

        // New location on the stretched scale
        let st = global::stretch(pr);
        self.index = ((st + 2048) >> 7) as usize + (ctx << 5) + ctx;

        // Interpolate
        let w = st & 127;
        (self.data[self.index] * (128 - w) + self.data[self.index + 1] * w) >> 11
    }
}
