//! Shared entropy-codec utilities.
//!
//! Alphabet headers, frequency normalization to an exact power-of-two total,
//! and the order-0 entropy estimate used by the pipeline to detect
//! incompressible blocks.

use kanzi_core::bitstream::{InputBitStream, OutputBitStream};
use kanzi_core::error::{KanziError, Result};
use kanzi_core::global;
use std::collections::BinaryHeap;
use std::io::{Read, Write};

const FULL_ALPHABET: u32 = 0;
const PARTIAL_ALPHABET: u32 = 1;
const ALPHABET_256: u32 = 0;
const ALPHABET_NOT_256: u32 = 1;
const DELTA_ENCODED_ALPHABET: u32 = 0;
const BIT_ENCODED_ALPHABET_256: u32 = 1;
const PRESENT_SYMBOLS_MASK: u32 = 0;
const ABSENT_SYMBOLS_MASK: u32 = 1;

/// Order-0 entropy of 973/1024 or more is treated as incompressible.
pub const INCOMPRESSIBLE_THRESHOLD: i32 = 973;

/// Encode the set of present symbols. `alphabet[..count]` is sorted
/// ascending over a 256-symbol space.
///
/// Three layouts, picked to minimize header bits: full alphabet (with a
/// one-bit shortcut for all 256), a 256-bit presence mask for mid-size
/// alphabets, or delta-coded symbol ranks (of the present or the absent
/// set, whichever is smaller).
pub fn encode_alphabet<W: Write>(
    obs: &mut OutputBitStream<W>,
    alphabet: &[usize],
    count: usize,
) -> Result<usize> {
    let length = 256usize;

    if count > length {
        return Err(KanziError::invalid_argument(format!(
            "Invalid alphabet size: {count}"
        )));
    }

    if count == length {
        // Full alphabet
        obs.write_bit(FULL_ALPHABET)?;
        obs.write_bit(ALPHABET_256)?;
        return Ok(count);
    }

    if (32..=224).contains(&count) {
        // Presence bit mask
        obs.write_bit(PARTIAL_ALPHABET)?;
        obs.write_bit(BIT_ENCODED_ALPHABET_256)?;
        let mut masks = [0u64; 4];

        for &s in &alphabet[..count] {
            masks[s >> 6] |= 1u64 << (s & 63);
        }

        for m in masks {
            obs.write_bits(m, 64)?;
        }

        return Ok(count);
    }

    obs.write_bit(PARTIAL_ALPHABET)?;
    obs.write_bit(DELTA_ENCODED_ALPHABET)?;
    let mut diffs = vec![0i32; count.max(1)];

    let count = if length - count < count {
        // Delta-encode the absent symbols instead
        let absent = length - count;
        let log = bit_length(absent.max(1) as u32).max(1);
        obs.write_bits(log as u64 - 1, 4)?;
        obs.write_bits(absent as u64, log)?;

        if absent == 0 {
            return Ok(0);
        }

        obs.write_bit(ABSENT_SYMBOLS_MASK)?;
        // Alphabet size is a power of two
        obs.write_bits(8, 5)?;

        let mut symbol = 0usize;
        let mut previous = 0i32;
        let mut n = 0usize;
        let mut i = 0usize;

        while n < absent {
            if i < count && symbol == alphabet[i] {
                i += 1;
                symbol += 1;
                continue;
            }

            diffs[n] = symbol as i32 - previous;
            symbol += 1;
            previous = symbol as i32;
            n += 1;
        }

        absent
    } else {
        let log = bit_length(count.max(1) as u32).max(1);
        obs.write_bits(log as u64 - 1, 4)?;
        obs.write_bits(count as u64, log)?;

        if count == 0 {
            return Ok(0);
        }

        obs.write_bit(PRESENT_SYMBOLS_MASK)?;
        let mut previous = 0i32;

        for i in 0..count {
            diffs[i] = alphabet[i] as i32 - previous;
            previous = alphabet[i] as i32 + 1;
        }

        count
    };

    let ck_size = if count <= 64 { 8 } else { 16 };

    // Delta chunks, each prefixed with its bit width
    let mut i = 0;

    while i < count {
        let end = (i + ck_size).min(count);
        let max = diffs[i..end].iter().copied().max().unwrap_or(0).max(0);
        let log = bit_length(max.max(1) as u32).max(1);
        obs.write_bits(log as u64 - 1, 4)?;

        for &d in &diffs[i..end] {
            obs.write_bits(d as u64, log)?;
        }

        i = end;
    }

    Ok(count)
}

/// Decode an alphabet header into `alphabet`; returns the symbol count.
pub fn decode_alphabet<R: Read>(
    ibs: &mut InputBitStream<R>,
    alphabet: &mut [usize],
) -> Result<usize> {
    if ibs.read_bit()? == FULL_ALPHABET {
        let alphabet_size = if ibs.read_bit()? == ALPHABET_256 {
            256
        } else {
            let log = 1 + ibs.read_bits(5)? as u32;
            ibs.read_bits(log)? as usize
        };

        if alphabet_size > 256 {
            return Err(KanziError::invalid_stream(format!(
                "incorrect alphabet size: {alphabet_size}"
            )));
        }

        for (i, a) in alphabet.iter_mut().take(alphabet_size).enumerate() {
            *a = i;
        }

        return Ok(alphabet_size);
    }

    if ibs.read_bit()? == BIT_ENCODED_ALPHABET_256 {
        let mut count = 0usize;

        for i in 0..4usize {
            let val = ibs.read_bits(64)?;

            for j in 0..64usize {
                if val & (1u64 << j) != 0 {
                    alphabet[count] = (i << 6) + j;
                    count += 1;
                }
            }
        }

        return Ok(count);
    }

    // Delta-encoded
    let log = 1 + ibs.read_bits(4)? as u32;
    let count = ibs.read_bits(log)? as usize;

    if count == 0 {
        return Ok(0);
    }

    if count > 256 {
        return Err(KanziError::invalid_stream(format!(
            "incorrect alphabet size: {count}"
        )));
    }

    let ck_size = if count <= 64 { 8 } else { 16 };

    if ibs.read_bit()? == ABSENT_SYMBOLS_MASK {
        let alphabet_size = 1usize << ibs.read_bits(5)? as u32;

        if alphabet_size > 256 || count > alphabet_size {
            return Err(KanziError::invalid_stream(format!(
                "incorrect alphabet size: {alphabet_size}"
            )));
        }

        let mut n = 0usize;
        let mut symbol = 0usize;
        let mut i = 0;

        while i < count {
            let log = 1 + ibs.read_bits(4)? as u32;
            let end = (i + ck_size).min(count);

            for _ in i..end {
                let next = symbol + ibs.read_bits(log)? as usize;

                while symbol < next && n < alphabet_size {
                    alphabet[n] = symbol;
                    symbol += 1;
                    n += 1;
                }

                symbol += 1;
            }

            i = end;
        }

        let present = alphabet_size - count;

        while n < present {
            if symbol > 255 {
                return Err(KanziError::invalid_stream(format!(
                    "incorrect alphabet symbol: {symbol}"
                )));
            }

            alphabet[n] = symbol;
            n += 1;
            symbol += 1;
        }

        Ok(present)
    } else {
        let mut symbol = 0usize;
        let mut i = 0;

        while i < count {
            let log = 1 + ibs.read_bits(4)? as u32;
            let end = (i + ck_size).min(count);

            for j in i..end {
                symbol += ibs.read_bits(log)? as usize;

                if symbol > 255 {
                    return Err(KanziError::invalid_stream(format!(
                        "incorrect alphabet symbol: {symbol}"
                    )));
                }

                alphabet[j] = symbol;
                symbol += 1;
            }

            i = end;
        }

        Ok(count)
    }
}

#[inline]
fn bit_length(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// Scale `freqs` so present symbols keep a non-zero share and the total is
/// exactly `scale` (a power of two in `[2^8, 2^16]`). Fills `alphabet` with
/// the present symbols; returns their count.
pub fn normalize_frequencies(
    freqs: &mut [u32],
    alphabet: &mut [usize],
    total_freq: u32,
    scale: u32,
) -> Result<usize> {
    if !(256..=65536).contains(&scale) {
        return Err(KanziError::invalid_argument(format!(
            "Invalid scale parameter: {scale} (must be in [256..65536])"
        )));
    }

    if total_freq == 0 {
        return Ok(0);
    }

    let mut alphabet_size = 0usize;

    // Shortcut: already normalized
    if total_freq == scale {
        for (i, &f) in freqs.iter().enumerate() {
            if f != 0 {
                alphabet[alphabet_size] = i;
                alphabet_size += 1;
            }
        }

        return Ok(alphabet_size);
    }

    let mut errors = [0i32; 256];
    let mut sum_scaled = 0u32;
    let mut freq_max = 0u32;
    let mut idx_max = 0usize;

    for i in 0..256usize {
        errors[i] = 0;
        let f = freqs[i];

        if f == 0 {
            continue;
        }

        if f > freq_max {
            freq_max = f;
            idx_max = i;
        }

        let sf = u64::from(f) * u64::from(scale);

        let scaled = if sf <= u64::from(total_freq) {
            // Quantum of frequency
            1u32
        } else {
            let mut scaled = (sf / u64::from(total_freq)) as u32;
            let err_ceiling = (u64::from(scaled) + 1) * u64::from(total_freq) - sf;
            let err_floor = sf - u64::from(scaled) * u64::from(total_freq);

            if err_ceiling < err_floor {
                scaled += 1;
                errors[i] = err_ceiling as i32;
            } else {
                errors[i] = err_floor as i32;
            }

            scaled
        };

        alphabet[alphabet_size] = i;
        alphabet_size += 1;
        sum_scaled += scaled;
        freqs[i] = scaled;
    }

    if alphabet_size == 0 {
        return Ok(0);
    }

    if alphabet_size == 1 {
        freqs[alphabet[0]] = scale;
        return Ok(1);
    }

    if sum_scaled != scale {
        let delta = sum_scaled as i64 - scale as i64;

        if i64::from(freqs[idx_max]) > delta {
            // Fast path: adjust the dominant symbol
            freqs[idx_max] = (i64::from(freqs[idx_max]) - delta) as u32;
        } else {
            // Distribute +/-1 corrections by decreasing rounding error
            let inc: i32 = if sum_scaled > scale { -1 } else { 1 };
            let mut heap = BinaryHeap::new();

            for &s in alphabet.iter().take(alphabet_size) {
                if errors[s] > 0 && freqs[s] as i32 != -inc {
                    heap.push((errors[s], freqs[s], s));
                }
            }

            let mut sum_scaled = sum_scaled as i64;

            while sum_scaled != i64::from(scale) {
                let Some((err, _, s)) = heap.pop() else {
                    break;
                };

                // Never zero out a present symbol
                if freqs[s] as i32 == -inc {
                    continue;
                }

                freqs[s] = (freqs[s] as i32 + inc) as u32;
                errors[s] = err - scale as i32;
                sum_scaled += i64::from(inc);
                heap.push((errors[s], freqs[s], s));
            }
        }
    }

    Ok(alphabet_size)
}

/// Order-0 entropy of `block` scaled to `[0, 1024]`, with 1024 standing for
/// 8 bits per symbol. The histogram is filled as a side effect.
pub fn first_order_entropy_1024(block: &[u8], histo: &mut [u32; 256]) -> i32 {
    histo.fill(0);

    if block.is_empty() {
        return 0;
    }

    for &b in block {
        histo[b as usize] += 1;
    }

    let mut sum = 0i64;
    let log_length = global::log2_1024(block.len() as u32);

    for &h in histo.iter() {
        if h == 0 {
            continue;
        }

        sum += i64::from(h) * i64::from(log_length - global::log2_1024(h)) >> 3;
    }

    (sum / block.len() as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_alphabet(symbols: &[usize]) {
        let mut sink = Vec::new();
        {
            let mut obs = OutputBitStream::new(&mut sink);
            encode_alphabet(&mut obs, symbols, symbols.len()).unwrap();
            obs.close().unwrap();
        }

        let mut ibs = InputBitStream::new(Cursor::new(sink));
        let mut decoded = [0usize; 256];
        let count = decode_alphabet(&mut ibs, &mut decoded).unwrap();
        assert_eq!(&decoded[..count], symbols);
    }

    #[test]
    fn test_alphabet_full() {
        let all: Vec<usize> = (0..256).collect();
        roundtrip_alphabet(&all);
    }

    #[test]
    fn test_alphabet_bitmask() {
        // 32..224 present symbols take the mask path
        let syms: Vec<usize> = (0..256).filter(|x| x % 2 == 0).collect();
        assert_eq!(syms.len(), 128);
        roundtrip_alphabet(&syms);
    }

    #[test]
    fn test_alphabet_delta_present() {
        roundtrip_alphabet(&[3, 7, 60, 61, 62, 200]);
        roundtrip_alphabet(&[0]);
        roundtrip_alphabet(&[255]);
    }

    #[test]
    fn test_alphabet_delta_absent() {
        // Only a few missing: the complement set is encoded
        let syms: Vec<usize> = (0..256).filter(|&x| x != 17 && x != 230).collect();
        roundtrip_alphabet(&syms);
    }

    #[test]
    fn test_normalize_exact_sum() {
        let mut freqs = [0u32; 256];
        freqs[10] = 1000;
        freqs[20] = 300;
        freqs[30] = 7;
        freqs[40] = 1;
        let total: u32 = freqs.iter().sum();

        let mut alphabet = [0usize; 256];
        let count = normalize_frequencies(&mut freqs, &mut alphabet, total, 1 << 12).unwrap();

        assert_eq!(count, 4);
        assert_eq!(&alphabet[..4], &[10, 20, 30, 40]);
        assert_eq!(freqs.iter().sum::<u32>(), 1 << 12);

        for s in [10usize, 20, 30, 40] {
            assert!(freqs[s] >= 1, "symbol {s} was zeroed");
        }
    }

    #[test]
    fn test_normalize_single_symbol() {
        let mut freqs = [0u32; 256];
        freqs[42] = 123;
        let mut alphabet = [0usize; 256];
        let count = normalize_frequencies(&mut freqs, &mut alphabet, 123, 256).unwrap();
        assert_eq!(count, 1);
        assert_eq!(freqs[42], 256);
    }

    #[test]
    fn test_normalize_skewed() {
        // One dominant symbol and many rare ones
        let mut freqs = [1u32; 256];
        freqs[0] = 100_000;
        let total: u32 = freqs.iter().sum();
        let mut alphabet = [0usize; 256];
        let count = normalize_frequencies(&mut freqs, &mut alphabet, total, 1 << 8).unwrap();

        assert_eq!(count, 256);
        assert_eq!(freqs.iter().sum::<u32>(), 1 << 8);
        assert!(freqs.iter().all(|&f| f >= 1));
    }

    #[test]
    fn test_entropy_estimates() {
        let mut histo = [0u32; 256];

        let uniform = vec![0xAAu8; 4096];
        assert_eq!(first_order_entropy_1024(&uniform, &mut histo), 0);

        let all: Vec<u8> = (0..=255u8).cycle().take(65536).collect();
        let e = first_order_entropy_1024(&all, &mut histo);
        assert!(e > 1000, "uniform data should be near 1024, got {e}");
        assert!(e >= INCOMPRESSIBLE_THRESHOLD);
    }
}
