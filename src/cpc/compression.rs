// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The compressed mirror of a CPC sketch.
//!
//! Surprising-value pairs are delta-coded: the column delta goes through a
//! 65-symbol length-limited unary code (max 12 bits, so the decoder can
//! always peek a whole code word), the row delta through a Golomb code
//! whose base is chosen from the pair density. The window bytes are packed
//! four to a word; their entropy is close to 8 bits per byte, so heavier
//! coding buys little.

use crate::cpc::pair_table::PairTable;
use crate::cpc::pair_table::PAIR_EMPTY;
use crate::cpc::sketch::CpcSketch;
use crate::cpc::Flavor;
use crate::error::Error;

/// Length-limited unary code for column deltas 0..=64.
///
/// Deltas 0..=5 are plain unary (delta zeros then a one). Larger deltas get
/// a 12-bit code: six zeros then the delta minus 6 as a 6-bit literal. The
/// entry layout is `(code_length << 12) | code_value`, bits emitted LSB
/// first.
const ENCODING_TABLE_65: [u16; 65] = {
    let mut table = [0u16; 65];
    let mut x = 0usize;
    while x < 65 {
        table[x] = if x <= 5 {
            (((x + 1) as u16) << 12) | (1u16 << x)
        } else {
            (12u16 << 12) | (((x - 6) as u16) << 6)
        };
        x += 1;
    }
    table
};

/// Decodes one column-delta symbol from a 12-bit window.
#[inline]
fn decode_column_delta(peek: u32) -> (u32, u8) {
    if peek & 0x3F == 0 {
        (6 + ((peek >> 6) & 0x3F), 12)
    } else {
        let t = (peek & 0x3F).trailing_zeros();
        (t, (t + 1) as u8)
    }
}

/// The compressed form of a sketch, ready for the wire.
pub(super) struct CompressedState {
    pub lg_k: u8,
    pub first_interesting_column: u8,
    pub merge_flag: bool,
    pub num_coupons: u32,
    pub kxp: f64,
    pub hip_est_accum: f64,
    /// Number of pairs coded into `table_data`. In hybrid flavor this is
    /// the full coupon count, not just the table entries.
    pub table_num_entries: u32,
    pub table_data: Vec<u32>,
    pub window_data: Vec<u32>,
}

impl CompressedState {
    pub fn compress(source: &CpcSketch) -> Self {
        let mut state = CompressedState {
            lg_k: source.lg_k,
            first_interesting_column: source.first_interesting_column,
            merge_flag: source.merge_flag,
            num_coupons: source.num_coupons,
            kxp: source.kxp,
            hip_est_accum: source.hip_est_accum,
            table_num_entries: 0,
            table_data: Vec::new(),
            window_data: Vec::new(),
        };

        match source.flavor() {
            Flavor::Empty => {}
            Flavor::Sparse => {
                state.compress_sparse_flavor(source);
                debug_assert!(state.window_data.is_empty(), "window is not expected");
                debug_assert!(!state.table_data.is_empty(), "table is expected");
            }
            Flavor::Hybrid => {
                state.compress_hybrid_flavor(source);
                debug_assert!(state.window_data.is_empty(), "window is not expected");
                debug_assert!(!state.table_data.is_empty(), "table is expected");
            }
            Flavor::Pinned => {
                state.compress_pinned_flavor(source);
                debug_assert!(!state.window_data.is_empty(), "window is expected");
            }
            Flavor::Sliding => {
                state.compress_sliding_flavor(source);
                debug_assert!(!state.window_data.is_empty(), "window is expected");
            }
        }
        state
    }

    fn table(source: &CpcSketch) -> &PairTable {
        source
            .surprising_value_table
            .as_ref()
            .expect("non-empty sketch must have a table")
    }

    fn compress_sparse_flavor(&mut self, source: &CpcSketch) {
        debug_assert!(source.sliding_window.is_empty());
        debug_assert_eq!(Self::table(source).num_pairs(), source.num_coupons);
        let pairs = Self::table(source).sorted_items();
        self.compress_surprising_values(&pairs, source.lg_k);
    }

    fn compress_hybrid_flavor(&mut self, source: &CpcSketch) {
        debug_assert!(!source.sliding_window.is_empty());
        debug_assert_eq!(source.window_offset, 0);

        let mut pairs = Self::table(source).items();
        for (row, &byte) in source.sliding_window.iter().enumerate() {
            let mut bits = byte;
            while bits != 0 {
                let col = bits.trailing_zeros();
                bits ^= 1 << col;
                pairs.push(((row as u32) << 6) | col);
            }
        }
        pairs.sort_unstable();
        debug_assert_eq!(pairs.len() as u32, source.num_coupons);
        self.compress_surprising_values(&pairs, source.lg_k);
    }

    fn compress_pinned_flavor(&mut self, source: &CpcSketch) {
        debug_assert_eq!(source.window_offset, 0);
        self.window_data = pack_window(&source.sliding_window);

        let mut pairs = Self::table(source).sorted_items();
        // all table entries have columns >= 8; biasing them down keeps the
        // column deltas small
        for pair in pairs.iter_mut() {
            debug_assert!((*pair & 63) >= 8);
            *pair -= 8;
        }
        if !pairs.is_empty() {
            self.compress_surprising_values(&pairs, source.lg_k);
        }
    }

    fn compress_sliding_flavor(&mut self, source: &CpcSketch) {
        debug_assert!(source.window_offset > 0);
        self.window_data = pack_window(&source.sliding_window);

        let pairs = Self::table(source).sorted_items();
        if !pairs.is_empty() {
            self.compress_surprising_values(&pairs, source.lg_k);
        }
    }

    fn compress_surprising_values(&mut self, pairs: &[u32], lg_k: u8) {
        let k = 1u32 << lg_k;
        let num_pairs = pairs.len() as u32;
        debug_assert!(num_pairs > 0);
        let num_base_bits = golomb_choose_number_of_base_bits(k + num_pairs, num_pairs as u64);
        self.table_data = low_level_compress_pairs(pairs, num_base_bits, lg_k);
        self.table_num_entries = num_pairs;
    }

    /// Rebuilds an uncompressed sketch. The caller has already validated the
    /// preamble; this validates the payload itself.
    pub fn uncompress(&self, seed: u64) -> Result<CpcSketch, Error> {
        let mut sketch = CpcSketch::with_seed(self.lg_k, seed)?;
        sketch.merge_flag = self.merge_flag;
        sketch.first_interesting_column = self.first_interesting_column;

        if self.num_coupons == 0 {
            return Ok(sketch);
        }

        sketch.num_coupons = self.num_coupons;
        sketch.kxp = self.kxp;
        sketch.hip_est_accum = self.hip_est_accum;

        let k = 1usize << self.lg_k;
        let flavor = super::determine_flavor(self.lg_k, self.num_coupons);
        let offset = super::determine_correct_offset(self.lg_k, self.num_coupons);

        let num_pairs = self.table_num_entries;
        let mut pairs = if num_pairs > 0 {
            let base_bits =
                golomb_choose_number_of_base_bits((1u32 << self.lg_k) + num_pairs, num_pairs as u64);
            low_level_uncompress_pairs(&self.table_data, num_pairs, base_bits, self.lg_k)?
        } else {
            Vec::new()
        };

        let mut table = PairTable::new(2, 6 + self.lg_k);
        let mut window = Vec::new();

        match flavor {
            Flavor::Empty => unreachable!("empty handled above"),
            Flavor::Sparse => {
                for &pair in &pairs {
                    if !table.maybe_insert(pair) {
                        return Err(Error::format("duplicate pair in sparse payload"));
                    }
                }
            }
            Flavor::Hybrid => {
                window = vec![0u8; k];
                for &pair in &pairs {
                    let col = pair & 63;
                    if col < 8 {
                        window[(pair >> 6) as usize] |= 1 << col;
                    } else if !table.maybe_insert(pair) {
                        return Err(Error::format("duplicate pair in hybrid payload"));
                    }
                }
            }
            Flavor::Pinned | Flavor::Sliding => {
                window = unpack_window(&self.window_data, k)?;
                if flavor == Flavor::Pinned {
                    for pair in pairs.iter_mut() {
                        *pair += 8;
                    }
                }
                for &pair in &pairs {
                    if !table.maybe_insert(pair) {
                        return Err(Error::format("duplicate pair in windowed payload"));
                    }
                }
            }
        }

        sketch.window_offset = offset;
        sketch.sliding_window = window;
        sketch.surprising_value_table = Some(table);

        // re-establish the central invariant before the sketch is usable
        if !sketch.validate() {
            return Err(Error::format(
                "bit matrix population does not match the coupon count",
            ));
        }
        Ok(sketch)
    }
}

/// Packs window bytes four to a little-endian word.
fn pack_window(window: &[u8]) -> Vec<u32> {
    let mut words = vec![0u32; window.len().div_ceil(4)];
    for (i, &byte) in window.iter().enumerate() {
        words[i / 4] |= (byte as u32) << (8 * (i % 4));
    }
    words
}

fn unpack_window(words: &[u32], k: usize) -> Result<Vec<u8>, Error> {
    if words.len() != k.div_ceil(4) {
        return Err(Error::format("window payload has the wrong length")
            .with_context("expected_words", k.div_ceil(4))
            .with_context("actual_words", words.len()));
    }
    let mut window = vec![0u8; k];
    for (i, byte) in window.iter_mut().enumerate() {
        *byte = (words[i / 4] >> (8 * (i % 4))) as u8;
    }
    Ok(window)
}

fn low_level_compress_pairs(pairs: &[u32], num_base_bits: u8, lg_k: u8) -> Vec<u32> {
    let k = 1u32 << lg_k;
    let capacity = safe_length_for_compressed_pair_buf(k, pairs.len() as u32, num_base_bits);
    let mut words = vec![0u32; capacity];

    let mut bitbuf: u64 = 0;
    let mut bufbits: u8 = 0;
    let mut next_word_index = 0usize;
    let golomb_lo_mask = (1u64 << num_base_bits) - 1;
    let mut predicted_row_index = 0u32;
    let mut predicted_col_index = 0u32;

    for &row_col in pairs {
        let row_index = row_col >> 6;
        let col_index = row_col & 63;

        if row_index != predicted_row_index {
            predicted_col_index = 0;
        }

        debug_assert!(row_index >= predicted_row_index);
        debug_assert!(col_index >= predicted_col_index);

        let y_delta = (row_index - predicted_row_index) as u64;
        let x_delta = col_index - predicted_col_index;

        predicted_row_index = row_index;
        predicted_col_index = col_index + 1;

        let code_info = ENCODING_TABLE_65[x_delta as usize];
        let code_val = (code_info & 0xfff) as u64;
        let code_len = (code_info >> 12) as u8;
        bitbuf |= code_val << bufbits;
        bufbits += code_len;
        maybe_flush_bitbuf(&mut bitbuf, &mut bufbits, &mut words, &mut next_word_index);

        let golomb_lo = y_delta & golomb_lo_mask;
        let golomb_hi = y_delta >> num_base_bits;
        write_unary(
            &mut words,
            &mut next_word_index,
            &mut bitbuf,
            &mut bufbits,
            golomb_hi,
        );

        bitbuf |= golomb_lo << bufbits;
        bufbits += num_base_bits;
        maybe_flush_bitbuf(&mut bitbuf, &mut bufbits, &mut words, &mut next_word_index);
    }

    // Pad the bitstream so that the decompressor's 12-bit peek can't overrun
    // its input.
    let padding = 10u8.saturating_sub(num_base_bits);
    bufbits += padding;
    maybe_flush_bitbuf(&mut bitbuf, &mut bufbits, &mut words, &mut next_word_index);

    if bufbits > 0 {
        debug_assert!(bufbits < 32);
        words[next_word_index] = (bitbuf & 0xffffffff) as u32;
        next_word_index += 1;
    }

    words.truncate(next_word_index);
    words
}

fn low_level_uncompress_pairs(
    words: &[u32],
    num_pairs: u32,
    num_base_bits: u8,
    lg_k: u8,
) -> Result<Vec<u32>, Error> {
    let mut reader = BitReader::new(words);
    let mut pairs = Vec::with_capacity(num_pairs as usize);
    let mut predicted_row_index = 0u32;
    let mut predicted_col_index = 0u32;
    let row_limit = 1u32 << lg_k;

    for _ in 0..num_pairs {
        let (x_delta, code_len) = decode_column_delta(reader.peek12());
        reader.consume(code_len);

        let golomb_hi = reader.read_unary()?;
        let golomb_lo = reader.read_bits(num_base_bits);
        let y_delta = (golomb_hi << num_base_bits) | golomb_lo;

        if y_delta >= row_limit as u64 {
            return Err(Error::format("pair payload decodes out of range")
                .with_context("row_delta", y_delta));
        }
        if y_delta > 0 {
            predicted_col_index = 0;
        }
        let row_index = predicted_row_index + y_delta as u32;
        let col_index = predicted_col_index + x_delta;
        if row_index >= row_limit || col_index > 63 {
            return Err(Error::format("pair payload decodes out of range")
                .with_context("row", row_index)
                .with_context("col", col_index));
        }
        pairs.push((row_index << 6) | col_index);
        predicted_row_index = row_index;
        predicted_col_index = col_index + 1;
    }

    if reader.overran() {
        return Err(Error::format("pair payload ended prematurely"));
    }
    Ok(pairs)
}

struct BitReader<'a> {
    words: &'a [u32],
    next_word: usize,
    phantom_words: u32,
    bitbuf: u64,
    bufbits: u8,
}

impl<'a> BitReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            next_word: 0,
            phantom_words: 0,
            bitbuf: 0,
            bufbits: 0,
        }
    }

    fn ensure(&mut self, need: u8) {
        debug_assert!(need <= 32);
        while self.bufbits < need {
            let word = match self.words.get(self.next_word) {
                Some(&w) => w,
                None => {
                    // reading past the end yields zeros; one such pull is
                    // legitimate for the final padding, more means truncation
                    self.phantom_words += 1;
                    0
                }
            };
            self.next_word += 1;
            self.bitbuf |= (word as u64) << self.bufbits;
            self.bufbits += 32;
        }
    }

    fn peek12(&mut self) -> u32 {
        self.ensure(12);
        (self.bitbuf & 0xfff) as u32
    }

    fn consume(&mut self, bits: u8) {
        debug_assert!(bits <= self.bufbits);
        self.bitbuf >>= bits;
        self.bufbits -= bits;
    }

    fn read_bits(&mut self, bits: u8) -> u64 {
        if bits == 0 {
            return 0;
        }
        self.ensure(bits);
        let value = self.bitbuf & ((1u64 << bits) - 1);
        self.consume(bits);
        value
    }

    fn read_unary(&mut self) -> Result<u64, Error> {
        let mut count = 0u64;
        loop {
            self.ensure(16);
            let chunk = self.bitbuf & 0xffff;
            if chunk == 0 {
                self.consume(16);
                count += 16;
                if self.phantom_words > 2 {
                    return Err(Error::format("unary run exceeds the payload"));
                }
            } else {
                let zeros = chunk.trailing_zeros() as u8;
                self.consume(zeros + 1);
                return Ok(count + zeros as u64);
            }
        }
    }

    /// True if decoding consumed more than the padding allows.
    fn overran(&self) -> bool {
        self.phantom_words > 1
    }
}

fn write_unary(
    compressed_words: &mut [u32],
    next_word_index: &mut usize,
    bitbuf: &mut u64,
    bufbits: &mut u8,
    value: u64,
) {
    debug_assert!(*bufbits <= 31);

    let mut remaining = value;
    while remaining >= 16 {
        remaining -= 16;
        // Here we output 16 zeros, but we don't need to physically write them
        // into bitbuf because it already contains zeros in that region.
        *bufbits += 16;
        maybe_flush_bitbuf(bitbuf, bufbits, compressed_words, next_word_index);
    }

    let the_unary_code = 1u64 << remaining;
    *bitbuf |= the_unary_code << *bufbits;
    *bufbits += (remaining + 1) as u8;
    maybe_flush_bitbuf(bitbuf, bufbits, compressed_words, next_word_index);
}

fn maybe_flush_bitbuf(
    bitbuf: &mut u64,
    bufbits: &mut u8,
    words: &mut [u32],
    word_index: &mut usize,
) {
    if *bufbits >= 32 {
        words[*word_index] = (*bitbuf & 0xffffffff) as u32;
        *word_index += 1;
        *bitbuf >>= 32;
        *bufbits -= 32;
    }
}

fn safe_length_for_compressed_pair_buf(k: u32, num_pairs: u32, num_base_bits: u8) -> usize {
    // The following tighter bound on ybits is based on page 198 of the
    // textbook "Managing Gigabytes" by Witten, Moffat, and Bell. Notice that
    // if numBaseBits == 0 it coincides with (k + numPairs).
    let k = k as usize;
    let num_pairs = num_pairs as usize;
    let num_base_bits = num_base_bits as usize;

    let ybits = num_pairs * (1 + num_base_bits) + (k >> num_base_bits);
    let xbits = 12 * num_pairs;
    let padding = 10usize.saturating_sub(num_base_bits);
    (xbits + ybits + padding).div_ceil(32) + 1
}

/// Returns an integer that is between zero and ceil(log_2(k)) - 1, inclusive.
fn golomb_choose_number_of_base_bits(k: u32, count: u64) -> u8 {
    debug_assert!(k > 0);
    debug_assert!(count > 0);
    let quotient = ((k as u64) - count) / count; // integer division
    if quotient == 0 {
        0
    } else {
        63 - quotient.leading_zeros() as u8 // floor(log2(quotient))
    }
}
