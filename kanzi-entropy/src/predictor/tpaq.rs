//! TPAQ predictor.
//!
//! Derived from a heavily modified Tangelo 2.4 (itself from the PAQ8
//! family): seven hashed context streams over the recent byte history feed
//! an 8-input logistic mixer selected by a 12-bit byte context; the eighth
//! input is a match model against a sliding buffer. One or two SSE stages
//! refine the mix, the second only in the `extra` (TPAQX) variant.
//!
//! The mixer owns its weights and receives the inputs by value each call,
//! so predictor and mixer share no references.

use super::apm::LogisticAdaptiveProbMap;
use super::state::{STATE_MAP, STATE_TRANSITIONS};
use super::Predictor;
use kanzi_core::global;

const MAX_LENGTH: i32 = 88;
const HASH: i32 = 200_002_979;
const MASK_80808080: u32 = 0x8080_8080;
const MASK_F0F0F0F0: u32 = 0xF0F0_F0F0;
const BEGIN_LEARN_RATE: i32 = 60 << 7;
const END_LEARN_RATE: i32 = 14 << 7;

/// 8-input neural mixer with a quickly decaying learn rate.
#[derive(Debug, Clone)]
struct TpaqMixer {
    w: [i32; 8],
    p: [i32; 8],
    skew: i32,
    learn_rate: i32,
    pr: i32,
}

impl Default for TpaqMixer {
    fn default() -> Self {
        Self {
            w: [2048; 8],
            p: [0; 8],
            skew: 0,
            learn_rate: BEGIN_LEARN_RATE,
            pr: 2048,
        }
    }
}

impl TpaqMixer {
    fn update(&mut self, bit: i32) {
        let mut err = (bit << 12) - self.pr;

        if err == 0 {
            return;
        }

        err = (err * self.learn_rate) >> 7;
        self.learn_rate += (END_LEARN_RATE - self.learn_rate) >> 31;
        self.skew += err;

        for i in 0..8 {
            self.w[i] += (self.p[i] * err) >> 15;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn get(&mut self, inputs: [i32; 8]) -> i32 {
        self.p = inputs;
        let mut sum = self.skew;

        for i in 0..8 {
            sum += inputs[i] * self.w[i];
        }

        self.pr = global::squash((sum + 65536) >> 17);
        self.pr
    }
}

/// Tangelo-PAQ bit predictor.
pub struct TpaqPredictor {
    pr: i32,
    c0: i32,
    c4: i32,
    c8: i32,
    bpos: u32,
    pos: i32,
    bin_count: i32,
    match_len: i32,
    match_pos: i32,
    hash: i32,
    extra: bool,
    sse0: LogisticAdaptiveProbMap<7>,
    sse1: LogisticAdaptiveProbMap<7>,
    mixers: Vec<TpaqMixer>,
    cur_mixer: usize,
    buffer: Vec<u8>,
    buffer_mask: i32,
    hashes: Vec<i32>,
    hash_mask: i32,
    big_states: Vec<u8>,
    small_states0: Vec<u8>,
    small_states1: Vec<u8>,
    states_mask: i32,
    mixers_mask: i32,
    cp: [usize; 7],
    ctx: [i32; 7],
}

impl std::fmt::Debug for TpaqPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpaqPredictor")
            .field("extra", &self.extra)
            .finish()
    }
}

impl TpaqPredictor {
    /// Create a predictor.
    ///
    /// `block_size` is the registered block size from the container header,
    /// `actual_size` the current block length; both sides derive identical
    /// table sizes from them. `extra` selects the TPAQX variant.
    pub fn new(block_size: usize, actual_size: usize, extra: bool) -> Self {
        // More states for bigger blocks
        let mut states_size: usize = if block_size >= 64 * 1024 * 1024 {
            1 << 29
        } else if block_size >= 16 * 1024 * 1024 {
            1 << 28
        } else if block_size >= 1024 * 1024 {
            1 << 27
        } else {
            1 << 26
        };

        // Too many mixers hurt small blocks, too few hurt big ones
        let mixers_size: usize = if actual_size >= 8 * 1024 * 1024 {
            1 << 15
        } else if actual_size >= 4 * 1024 * 1024 {
            1 << 12
        } else if actual_size >= 1024 * 1024 {
            1 << 10
        } else {
            1 << 9
        };

        // Match-model structures scale with the block size
        let buffer_size = block_size
            .next_power_of_two()
            .clamp(1 << 16, 1 << 26);
        let mut hash_size = block_size
            .next_power_of_two()
            .clamp(1 << 16, 1 << 24);

        if extra {
            states_size <<= 1;
            hash_size <<= 2;
        }

        Self {
            pr: 2048,
            c0: 1,
            c4: 0,
            c8: 0,
            bpos: 0,
            pos: 0,
            bin_count: 0,
            match_len: 0,
            match_pos: 0,
            hash: 0,
            extra,
            sse0: LogisticAdaptiveProbMap::new(256),
            sse1: LogisticAdaptiveProbMap::new(65536),
            mixers: vec![TpaqMixer::default(); mixers_size],
            cur_mixer: 0,
            buffer: vec![0u8; buffer_size],
            buffer_mask: buffer_size as i32 - 1,
            hashes: vec![0i32; hash_size],
            hash_mask: hash_size as i32 - 1,
            big_states: vec![0u8; states_size],
            small_states0: vec![0u8; 1 << 16],
            small_states1: vec![0u8; 1 << 24],
            states_mask: states_size as i32 - 1,
            mixers_mask: mixers_size as i32 - 1,
            cp: [0; 7],
            ctx: [0; 7],
        }
    }

    fn hash2(x: i32, y: i32) -> i32 {
        let h = x.wrapping_mul(HASH) ^ y.wrapping_mul(HASH);
        (h >> 1) ^ (h >> 9) ^ (x >> 2) ^ (y >> 3) ^ HASH
    }

    fn create_context(ctx_id: u32, cx: u32) -> i32 {
        let cx = cx.wrapping_mul(987_654_323).wrapping_add(ctx_id);
        let cx = cx.rotate_left(16);
        cx.wrapping_mul(123_456_791).wrapping_add(ctx_id) as i32
    }

    fn find_match(&mut self) {
        if self.match_len > 0 {
            // Extend the ongoing match
            if self.match_len < MAX_LENGTH {
                self.match_len += 1;
            }

            self.match_pos += 1;
        } else {
            self.match_pos = self.hashes[(self.hash & self.hash_mask) as usize];

            if self.match_pos != 0 && self.pos - self.match_pos <= self.buffer_mask {
                let mut r = self.match_len + 1;

                while r <= MAX_LENGTH
                    && self.buffer[((self.pos - r) & self.buffer_mask) as usize]
                        == self.buffer[((self.match_pos - r) & self.buffer_mask) as usize]
                {
                    r += 1;
                }

                self.match_len = r - 1;
            }
        }
    }

    /// Prediction from the match model in [-2047..2048], scaled for the mixer.
    fn match_context_pred(&mut self) -> i32 {
        if self.match_len <= 0 {
            return 0;
        }

        let cur = i32::from(self.buffer[(self.match_pos & self.buffer_mask) as usize]);

        if self.c0 == ((cur | 256) >> (8 - self.bpos)) {
            // Input magnitude tracks the match length
            let mut p = if self.match_len <= 24 {
                self.match_len
            } else {
                24 + ((self.match_len - 24) >> 3)
            };

            if (cur >> (7 - self.bpos)) & 1 == 0 {
                p = -p;
            }

            p << 6
        } else {
            self.match_len = 0;
            0
        }
    }
}

impl Predictor for TpaqPredictor {
    fn get(&mut self) -> i32 {
        self.pr
    }

    fn update(&mut self, bit: i32) {
        self.mixers[self.cur_mixer].update(bit);
        self.bpos += 1;
        self.c0 = (self.c0 << 1) | bit;

        if self.c0 > 255 {
            // Byte boundary: refresh byte histories and contexts
            self.buffer[(self.pos & self.buffer_mask) as usize] = self.c0 as u8;
            self.pos += 1;
            self.c8 = (self.c8 << 8) | ((self.c4 >> 24) & 0xFF);
            self.c4 = (self.c4 << 8) | (self.c0 & 0xFF);
            self.hash = (self.hash.wrapping_mul(43707) << 4).wrapping_add(self.c4)
                & self.hash_mask;
            self.c0 = 1;
            self.bpos = 0;
            self.bin_count += (self.c4 >> 7) & 1;

            // Select the neural net
            self.cur_mixer = (self.c4 & self.mixers_mask) as usize;

            // Refresh the context streams
            self.ctx[0] = (self.c4 & 0xFF) << 8;
            self.ctx[1] = (self.c4 & 0xFFFF) << 8;
            self.ctx[2] = Self::create_context(2, (self.c4 & 0x00FF_FFFF) as u32);
            self.ctx[3] = Self::create_context(3, self.c4 as u32);

            if self.bin_count < self.pos >> 2 {
                // Mostly text or mixed
                let c4 = self.c4 as u32;
                let c8 = self.c8 as u32;
                let h1 = if c4 & MASK_80808080 == 0 { c4 } else { c4 & MASK_80808080 };
                let h2 = if c8 & MASK_80808080 == 0 { c8 } else { c8 & MASK_80808080 };
                self.ctx[4] = Self::create_context(4, c4 ^ (c8 & 0xFFFF));
                self.ctx[5] = Self::hash2(h1 as i32, h2 as i32);
                self.ctx[6] =
                    Self::hash2((c8 & MASK_F0F0F0F0) as i32, (c4 & MASK_F0F0F0F0) as i32);
            } else {
                // Mostly binary
                let c4 = self.c4 as u32;
                self.ctx[4] = Self::create_context(4, (c4 ^ (c4 & 0xFFFF)) as u32);
                self.ctx[5] = Self::hash2(self.c4 >> 16, self.c8 >> 16);
                self.ctx[6] = ((self.c4 & 0xFF) << 8) | ((self.c8 & 0xFFFF) << 16);
            }

            self.find_match();
            self.hashes[(self.hash & self.hash_mask) as usize] = self.pos;
        }

        // Advance the per-stream bit histories and read their predictions
        let table = &STATE_TRANSITIONS[bit as usize];
        let mut p = [0i32; 8];

        let idx0 = (self.ctx[0] + self.c0) as usize;
        self.small_states0[self.cp[0]] = table[self.small_states0[self.cp[0]] as usize];
        self.cp[0] = idx0;
        p[0] = STATE_MAP[self.small_states0[idx0] as usize];

        let idx1 = (self.ctx[1] + self.c0) as usize;
        self.small_states1[self.cp[1]] = table[self.small_states1[self.cp[1]] as usize];
        self.cp[1] = idx1;
        p[1] = STATE_MAP[self.small_states1[idx1] as usize];

        for k in 2..7 {
            let idx = ((self.ctx[k].wrapping_add(self.c0)) & self.states_mask) as usize;
            self.big_states[self.cp[k]] = table[self.big_states[self.cp[k]] as usize];
            self.cp[k] = idx;
            p[k] = STATE_MAP[self.big_states[idx] as usize];
        }

        p[7] = self.match_context_pred();

        // Mix, then refine with SSE
        let mixed = self.mixers[self.cur_mixer].get(p);

        let refined = if !self.extra || self.bin_count < self.pos >> 2 {
            self.sse1
                .get(bit, mixed, (self.c0 | (self.c4 & 0xFF00)) as usize)
        } else {
            let p0 = self.sse0.get(bit, mixed, self.c0 as usize);
            (3 * self
                .sse1
                .get(bit, p0, (self.c0 | (self.c4 & 0xFF00)) as usize)
                + p0
                + 2)
                >> 2
        };

        // Bump sub-midpoint estimates by one to avoid a stuck zero
        self.pr = refined + (((refined - 2048) as u32) >> 31) as i32;
    }
}
