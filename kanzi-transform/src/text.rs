//! Dictionary codec for text.
//!
//! One pass over the block: maximal ASCII letter runs are words. A word
//! already in the dictionary is replaced by `0x0F` plus its varint index;
//! an unknown word is copied through and appended to the dictionary, which
//! the decoder rebuilds by tokenizing its own output the same way. `0x0E`
//! before an indexed word toggles the case of its first letter, so
//! capitalized sentence starts still hit the shared entry.
//!
//! Wire format:
//! - `0x0F, varint(idx + 1)`: dictionary word at `idx`
//! - `0x0E, 0x0F, varint(idx + 1)`: same, with the first letter case-flipped
//! - `0x0F, varint(0), byte`: literal `0x0E` or `0x0F` from the input
//! - anything else: verbatim input
//!
//! The dictionary is seeded with a small shared word list and grows up to a
//! block-size-dependent cap (never past 2^19 entries).

use kanzi_core::{ByteTransform, Slice};
use std::collections::HashMap;

const ESCAPE_TOKEN1: u8 = 0x0F;
const ESCAPE_TOKEN2: u8 = 0x0E;
const MAX_WORD_LENGTH: usize = 32;
const MIN_WORD_LENGTH: usize = 2;

/// Hard cap on dictionary entries.
pub const MAX_DICT_SIZE: usize = 1 << 19;

/// Seed words shared by both directions.
const SEED_WORDS: &[&str] = &[
    "the", "and", "that", "for", "with", "have", "this", "from", "they", "will", "would",
    "there", "their", "what", "about", "which", "when", "your", "said", "each", "she", "how",
    "other", "than", "then", "them", "these", "some", "her", "him", "his", "has", "had",
    "were", "are", "was", "been", "being", "not", "but", "can", "could", "should", "into",
    "more", "also", "after", "before", "over", "under", "between", "because", "through",
    "where", "while", "does", "did", "done", "just", "like", "time", "only", "year", "well",
    "very", "even", "back", "good", "new", "first", "last", "long", "great", "little", "own",
    "out", "who", "get", "make", "one", "two", "all", "any", "may", "say", "use", "our",
];

#[inline]
fn is_letter(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

#[inline]
fn toggle_case(b: u8) -> u8 {
    b ^ 0x20
}

fn put_index(dst: &mut [u8], idx: usize, mut val: usize) -> usize {
    let mut i = idx;

    while val >= 0x80 {
        dst[i] = (val as u8) | 0x80;
        i += 1;
        val >>= 7;
    }

    dst[i] = val as u8;
    i + 1
}

fn get_index(src: &[u8], idx: usize) -> Option<(usize, usize)> {
    let mut val = 0usize;
    let mut shift = 0u32;
    let mut i = idx;

    loop {
        if i >= src.len() || shift > 21 {
            return None;
        }

        let b = src[i];
        i += 1;
        val |= ((b & 0x7F) as usize) << shift;

        if b & 0x80 == 0 {
            return Some((val, i));
        }

        shift += 7;
    }
}

/// Text dictionary codec.
pub struct TextCodec {
    dict_map: HashMap<Box<[u8]>, u32>,
    dict_list: Vec<Box<[u8]>>,
    dict_limit: usize,
}

impl std::fmt::Debug for TextCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextCodec")
            .field("entries", &self.dict_list.len())
            .field("limit", &self.dict_limit)
            .finish()
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new(1 << 14)
    }
}

impl TextCodec {
    /// Create a codec whose dictionary may grow to `dict_limit` entries.
    pub fn new(dict_limit: usize) -> Self {
        let mut codec = Self {
            dict_map: HashMap::new(),
            dict_list: Vec::new(),
            dict_limit: dict_limit.clamp(SEED_WORDS.len(), MAX_DICT_SIZE),
        };
        codec.reset();
        codec
    }

    fn reset(&mut self) {
        self.dict_map.clear();
        self.dict_list.clear();

        for w in SEED_WORDS {
            let bytes: Box<[u8]> = w.as_bytes().into();
            self.dict_map.insert(bytes.clone(), self.dict_list.len() as u32);
            self.dict_list.push(bytes);
        }
    }

    fn add_word(&mut self, word: &[u8]) {
        if self.dict_list.len() >= self.dict_limit || self.dict_map.contains_key(word) {
            return;
        }

        let bytes: Box<[u8]> = word.into();
        self.dict_map.insert(bytes.clone(), self.dict_list.len() as u32);
        self.dict_list.push(bytes);
    }

    fn lookup(&self, word: &[u8]) -> Option<u32> {
        self.dict_map.get(word).copied()
    }
}

impl ByteTransform for TextCodec {
    fn forward(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() {
            return false;
        }

        self.reset();
        let sbase = src.idx;
        let dbase = dst.idx;
        // No gain means failure, so never produce more than the input
        let dst_end = count.min(dst.remaining());
        let mut si = 0usize;
        let mut di = 0usize;
        let mut toggled_word = [0u8; MAX_WORD_LENGTH];

        while si < count {
            let b = src.buf[sbase + si];

            if is_letter(b) {
                // Extend to the full word
                let start = si;

                while si < count && is_letter(src.buf[sbase + si]) {
                    si += 1;
                }

                let word_buf = &src.buf[sbase + start..sbase + si];
                let len = word_buf.len();

                if (MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&len) {
                    if let Some(idx) = self.lookup(word_buf) {
                        if di + 4 > dst_end {
                            src.idx += si;
                            dst.idx += di;
                            return false;
                        }

                        dst.buf[dbase + di] = ESCAPE_TOKEN1;
                        di = put_index(&mut dst.buf[dbase..], di + 1, idx as usize + 1);
                        continue;
                    }

                    toggled_word[..len].copy_from_slice(word_buf);
                    toggled_word[0] = toggle_case(toggled_word[0]);

                    if let Some(idx) = self.lookup(&toggled_word[..len]) {
                        if di + 5 > dst_end {
                            src.idx += si;
                            dst.idx += di;
                            return false;
                        }

                        dst.buf[dbase + di] = ESCAPE_TOKEN2;
                        dst.buf[dbase + di + 1] = ESCAPE_TOKEN1;
                        di = put_index(&mut dst.buf[dbase..], di + 2, idx as usize + 1);
                        continue;
                    }

                    self.add_word(word_buf);
                }

                // Unknown or oversized word: copy through
                if di + len > dst_end {
                    src.idx += si;
                    dst.idx += di;
                    return false;
                }

                dst.buf[dbase + di..dbase + di + len].copy_from_slice(word_buf);
                di += len;
                continue;
            }

            if b == ESCAPE_TOKEN1 || b == ESCAPE_TOKEN2 {
                // Literal escape byte
                if di + 3 > dst_end {
                    src.idx += si;
                    dst.idx += di;
                    return false;
                }

                dst.buf[dbase + di] = ESCAPE_TOKEN1;
                dst.buf[dbase + di + 1] = 0;
                dst.buf[dbase + di + 2] = b;
                di += 3;
                si += 1;
                continue;
            }

            if di + 1 > dst_end {
                src.idx += si;
                dst.idx += di;
                return false;
            }

            dst.buf[dbase + di] = b;
            di += 1;
            si += 1;
        }

        src.idx += si;
        dst.idx += di;
        true
    }

    fn inverse(&mut self, src: &mut Slice<'_>, dst: &mut Slice<'_>, count: usize) -> bool {
        if count > src.remaining() {
            return false;
        }

        self.reset();
        let sbase = src.idx;
        let dbase = dst.idx;
        let dst_end = dst.remaining();
        let mut si = 0usize;
        let mut di = 0usize;
        // Start of the letter run currently being copied, if trackable
        let mut word_start: Option<usize> = None;
        let mut case_toggle = false;

        macro_rules! end_word {
            () => {
                if let Some(ws) = word_start.take() {
                    let len = di - ws;

                    if (MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&len) {
                        let word = dst.buf[dbase + ws..dbase + di].to_vec();
                        self.add_word(&word);
                    }
                }
            };
        }

        while si < count {
            let b = src.buf[sbase + si];

            if b == ESCAPE_TOKEN2 {
                case_toggle = true;
                si += 1;
                continue;
            }

            if b == ESCAPE_TOKEN1 {
                end_word!();

                let Some((val, next)) = get_index(&src.buf[sbase..sbase + count], si + 1)
                else {
                    return false;
                };

                si = next;

                if val == 0 {
                    // Escaped literal byte
                    if si >= count || di >= dst_end {
                        return false;
                    }

                    dst.buf[dbase + di] = src.buf[sbase + si];
                    di += 1;
                    si += 1;
                    continue;
                }

                let idx = val - 1;

                if idx >= self.dict_list.len() {
                    return false;
                }

                let len = self.dict_list[idx].len();

                if di + len > dst_end {
                    return false;
                }

                dst.buf[dbase + di..dbase + di + len]
                    .copy_from_slice(&self.dict_list[idx]);

                if case_toggle {
                    dst.buf[dbase + di] = toggle_case(dst.buf[dbase + di]);
                    case_toggle = false;
                }

                di += len;
                continue;
            }

            if di >= dst_end {
                return false;
            }

            if is_letter(b) {
                if word_start.is_none() {
                    word_start = Some(di);
                }
            } else {
                end_word!();
            }

            dst.buf[dbase + di] = b;
            di += 1;
            si += 1;
        }

        end_word!();
        src.idx += si;
        dst.idx += di;
        true
    }

    fn max_encoded_len(&self, src_len: usize) -> usize {
        src_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) -> usize {
        let mut codec = TextCodec::default();
        let mut input = data.to_vec();
        let mut fwd = vec![0u8; data.len()];
        let mut d = Slice::new(&mut fwd);

        assert!(
            codec.forward(&mut Slice::new(&mut input), &mut d, data.len()),
            "forward failed"
        );
        let flen = d.idx;

        let mut back = vec![0u8; data.len() + 64];
        let mut b = Slice::new(&mut back);
        assert!(
            TextCodec::default().inverse(&mut Slice::new(&mut fwd[..flen]), &mut b, flen),
            "inverse failed"
        );
        let blen = b.idx;
        assert_eq!(&back[..blen], data);
        flen
    }

    #[test]
    fn test_seed_words_compress() {
        let data = b"the cat and the dog ran with the fox because they could";
        let flen = roundtrip(data);
        assert!(flen < data.len());
    }

    #[test]
    fn test_dynamic_dictionary() {
        // Second occurrence of a new word must be indexed
        let data = b"zyzzyva runs; zyzzyva sleeps; zyzzyva eats; zyzzyva wins";
        let flen = roundtrip(data);
        assert!(flen < data.len());
    }

    #[test]
    fn test_case_toggle() {
        let data = b"The theory holds. the Theory holds still.";
        roundtrip(data);
    }

    #[test]
    fn test_escape_bytes_roundtrip() {
        let data = b"mixed \x0f control \x0e bytes and words and words";
        roundtrip(data);
    }

    #[test]
    fn test_long_words_pass_through() {
        let data = b"pneumonoultramicroscopicsilicovolcanoconiosisword again \
                     pneumonoultramicroscopicsilicovolcanoconiosisword and the the the the";
        roundtrip(data);
    }

    #[test]
    fn test_binary_data_fails() {
        // Escape-heavy input cannot shrink
        let data = vec![0x0Fu8; 100];
        let mut codec = TextCodec::default();
        let mut input = data.clone();
        let mut fwd = vec![0u8; data.len()];

        assert!(!codec.forward(
            &mut Slice::new(&mut input),
            &mut Slice::new(&mut fwd),
            data.len()
        ));
    }

    #[test]
    fn test_index_varint() {
        let mut buf = [0u8; 8];

        for v in [0usize, 1, 127, 128, 16_383, 16_384, MAX_DICT_SIZE] {
            let n = put_index(&mut buf, 0, v);
            assert_eq!(get_index(&buf[..n], 0), Some((v, n)));
        }
    }
}
