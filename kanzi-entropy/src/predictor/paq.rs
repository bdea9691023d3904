//! PAQ predictor.
//!
//! A stripped PAQ model in the lineage of bbb/dcs-bwt-compressor, tuned for
//! post-BWT data: a bytewise order-0 state table mapped to a probability by
//! an adaptive state map, then three SSE stages keyed by the bit context,
//! the previous byte with the bit context, and the run length.

use super::apm::LogisticAdaptiveProbMap;
use super::state::{STATE_MAP, STATE_TRANSITIONS};
use super::Predictor;
use kanzi_core::global;

/// Maps an 8-bit state to an adaptive probability.
#[derive(Debug)]
struct StateMap {
    ctx: usize,
    data: Vec<i32>,
}

impl StateMap {
    fn new() -> Self {
        let mut data = vec![0i32; 256];

        // Seed from the static stretched estimates
        for (i, d) in data.iter_mut().enumerate() {
            *d = global::squash(STATE_MAP[i]) << 4;
        }

        Self { ctx: 0, data }
    }

    /// Train the previous mapping with `bit`, then map state `cx`.
    fn get(&mut self, bit: i32, cx: usize) -> i32 {
        self.data[self.ctx] += ((bit << 16) - self.data[self.ctx]) >> 7;
        self.ctx = cx;
        self.data[cx] >> 4
    }
}

/// PAQ bit predictor.
pub struct PaqPredictor {
    pr: i32,
    /// Bitwise context: last 0-7 bits with a leading 1.
    c0: usize,
    /// Last 4 whole bytes.
    c4: u32,
    states: [u8; 256],
    sm: StateMap,
    /// Count of consecutive identical bytes.
    run: u32,
    run_ctx: usize,
    apm2: LogisticAdaptiveProbMap<6>,
    apm3: LogisticAdaptiveProbMap<7>,
    apm4: LogisticAdaptiveProbMap<8>,
}

impl std::fmt::Debug for PaqPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaqPredictor").finish()
    }
}

impl Default for PaqPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl PaqPredictor {
    /// Create a predictor with neutral state.
    pub fn new() -> Self {
        Self {
            pr: 2048,
            c0: 1,
            c4: 0,
            states: [0; 256],
            sm: StateMap::new(),
            run: 0,
            run_ctx: 0,
            apm2: LogisticAdaptiveProbMap::new(256),
            apm3: LogisticAdaptiveProbMap::new(65536),
            apm4: LogisticAdaptiveProbMap::new(4),
        }
    }
}

impl Predictor for PaqPredictor {
    fn get(&mut self) -> i32 {
        self.pr
    }

    fn update(&mut self, bit: i32) {
        // Advance the bit history of the current context
        self.states[self.c0] = STATE_TRANSITIONS[bit as usize][self.states[self.c0] as usize];
        self.c0 = (self.c0 << 1) | bit as usize;

        if self.c0 > 255 {
            // Whole byte: roll byte history and run statistics
            let b = (self.c0 & 0xFF) as u32;

            if b == self.c4 & 0xFF {
                self.run += 1;
            } else {
                self.run = 0;
            }

            self.run_ctx = match self.run {
                0 => 0,
                1 => 1,
                2..=3 => 2,
                _ => 3,
            };

            self.c4 = (self.c4 << 8) | b;
            self.c0 = 1;
        }

        // Order 0 state, then the SSE chain
        let p = self.sm.get(bit, self.states[self.c0] as usize);
        let p = self.apm2.get(bit, p, self.c0);
        let p = self
            .apm3
            .get(bit, p, (((self.c4 & 0xFF) as usize) << 8) | self.c0);
        let p = self.apm4.get(bit, p, self.run_ctx);
        self.pr = p;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_in_range() {
        let mut p = PaqPredictor::new();

        for i in 0..50_000u32 {
            let pr = p.get();
            assert!((0..4096).contains(&pr));
            p.update(((i >> 2) ^ i) as i32 & 1);
        }
    }

    #[test]
    fn test_learns_runs() {
        // Post-BWT-like data: long runs of one byte
        let mut p = PaqPredictor::new();

        for _ in 0..1000 {
            for shift in (0..8).rev() {
                let bit = (0xAAu8 >> shift) as i32 & 1;
                p.update(bit);
            }
        }

        // Next bit of the repeating 0xAA pattern is 1
        assert!(p.get() > 2500);
    }

    #[test]
    fn test_deterministic() {
        let mut a = PaqPredictor::new();
        let mut b = PaqPredictor::new();

        for i in 0..20_000u32 {
            let bit = (i.wrapping_mul(0x9E37_79B1) >> 17) as i32 & 1;
            assert_eq!(a.get(), b.get());
            a.update(bit);
            b.update(bit);
        }
    }
}
