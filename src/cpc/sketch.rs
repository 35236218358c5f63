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

use crate::common::canonical_double;
use crate::common::INVERSE_POWERS_OF_2;
use crate::common::NumStdDev;
use crate::cpc::confidence::hip_confidence_lb;
use crate::cpc::confidence::hip_confidence_ub;
use crate::cpc::confidence::icon_confidence_lb;
use crate::cpc::confidence::icon_confidence_ub;
use crate::cpc::estimator::icon_estimate;
use crate::cpc::pair_table::PairTable;
use crate::cpc::pair_table::PAIR_EMPTY;
use crate::cpc::Flavor;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::error::Error;
use crate::hash::murmur_hash3_x64_128;
use crate::hash::DEFAULT_UPDATE_SEED;

/// A Compressed Probabilistic Counting sketch.
#[derive(Debug, Clone)]
pub struct CpcSketch {
    // immutable config variables
    pub(super) lg_k: u8,
    pub(super) seed: u64,

    // sketch state
    /// Columns below this value can never produce a novel coupon; part of a
    /// speed optimization and a serialized field.
    pub(super) first_interesting_column: u8,
    /// The number of distinct coupons collected so far.
    pub(super) num_coupons: u32,
    /// Surprising values outside the window. Below the window it stores the
    /// coupons that are *missing* (surprising zeros), above it the coupons
    /// that are present (surprising ones).
    pub(super) surprising_value_table: Option<PairTable>,
    /// Derivable from num_coupons, but made explicit for speed.
    pub(super) window_offset: u8,
    /// Size K bytes in dense mode; each byte covers 8 columns starting at
    /// window_offset.
    pub(super) sliding_window: Vec<u8>,

    // estimator state
    /// Whether the sketch is a result of merging.
    ///
    /// If `false`, the HIP (Historical Inverse Probability) estimator is
    /// used. If `true`, only the ICON estimator is valid.
    pub(super) merge_flag: bool,
    // the following two are only maintained for the HIP estimator
    /// The remaining probability mass (`k * p`) driving the HIP increment.
    pub(super) kxp: f64,
    /// The accumulated cardinality estimate.
    pub(super) hip_est_accum: f64,
}

impl CpcSketch {
    /// Creates a new sketch with the given `lg_k` and the default seed.
    pub fn new(lg_k: u8) -> Result<Self, Error> {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a new sketch with the given `lg_k` and `seed`.
    pub fn with_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
            )));
        }

        Ok(Self {
            lg_k,
            seed,
            first_interesting_column: 0,
            num_coupons: 0,
            surprising_value_table: None,
            window_offset: 0,
            sliding_window: vec![],
            merge_flag: false,
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
        })
    }

    /// Returns the parameter lg_k.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Returns the update seed of this sketch.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns true if the sketch has seen no data.
    pub fn is_empty(&self) -> bool {
        self.num_coupons == 0
    }

    /// Returns the number of distinct coupons collected so far.
    pub fn num_coupons(&self) -> u32 {
        self.num_coupons
    }

    /// Returns true if this sketch is the result of a merge, in which case
    /// the HIP estimator is invalid and ICON is used.
    pub fn is_merged(&self) -> bool {
        self.merge_flag
    }

    /// Returns the best estimate of the cardinality of the sketch.
    pub fn estimate(&self) -> f64 {
        if !self.merge_flag {
            self.hip_est_accum
        } else {
            icon_estimate(self.lg_k, self.num_coupons)
        }
    }

    /// Returns the lower bound of the confidence interval given `kappa`.
    pub fn lower_bound(&self, kappa: NumStdDev) -> f64 {
        if !self.merge_flag {
            hip_confidence_lb(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        } else {
            icon_confidence_lb(self.lg_k, self.num_coupons, kappa)
        }
    }

    /// Returns the upper bound of the confidence interval given `kappa`.
    pub fn upper_bound(&self, kappa: NumStdDev) -> f64 {
        if !self.merge_flag {
            hip_confidence_ub(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        } else {
            icon_confidence_ub(self.lg_k, self.num_coupons, kappa)
        }
    }

    /// Updates the sketch with a byte buffer (also accepts `&str`).
    pub fn update(&mut self, datum: impl AsRef<[u8]>) {
        let (h1, h2) = murmur_hash3_x64_128(datum.as_ref(), self.seed);
        self.hash_update(h1, h2);
    }

    /// Updates the sketch with a u64, hashing its little-endian bytes.
    pub fn update_u64(&mut self, datum: u64) {
        self.update(datum.to_le_bytes());
    }

    /// Updates the sketch with an i64, hashing its little-endian bytes.
    pub fn update_i64(&mut self, datum: i64) {
        self.update(datum.to_le_bytes());
    }

    /// Updates the sketch with a u32, hashing its little-endian bytes.
    pub fn update_u32(&mut self, datum: u32) {
        self.update(datum.to_le_bytes());
    }

    /// Updates the sketch with an i32, hashing its little-endian bytes.
    pub fn update_i32(&mut self, datum: i32) {
        self.update(datum.to_le_bytes());
    }

    /// Updates the sketch with an f64.
    ///
    /// The value is canonicalized first, so -0.0 and +0.0 (and all NaN
    /// payloads) count as the same value.
    pub fn update_f64(&mut self, datum: f64) {
        self.update(canonical_double(datum).to_le_bytes());
    }

    /// Updates the sketch with an f32.
    pub fn update_f32(&mut self, datum: f32) {
        self.update_f64(datum as f64);
    }

    fn hash_update(&mut self, h1: u64, h2: u64) {
        let k = 1u64 << self.lg_k;
        let col = h2.leading_zeros().min(63) as u8;
        let row = (h1 & (k - 1)) as u32;
        let mut row_col = (row << 6) | (col as u32);
        // To avoid the hash table's "empty" value, we change the row of the
        // following pair. This case is extremely unlikely, but we might as
        // well handle it.
        if row_col == u32::MAX {
            row_col ^= 1 << 6;
        }
        self.row_col_update(row_col);
    }

    pub(super) fn row_col_update(&mut self, row_col: u32) {
        let col = (row_col & 63) as u8;
        if col < self.first_interesting_column {
            // important speed optimization
            return;
        }

        if self.num_coupons == 0 && self.surprising_value_table.is_none() {
            // promote EMPTY to SPARSE
            self.surprising_value_table = Some(PairTable::new(2, 6 + self.lg_k));
        }

        if self.sliding_window.is_empty() {
            self.update_sparse(row_col);
        } else {
            self.update_windowed(row_col);
        }
    }

    fn mut_surprising_value_table(&mut self) -> &mut PairTable {
        self.surprising_value_table
            .as_mut()
            .expect("surprising value table must be initialized")
    }

    fn update_hip(&mut self, row_col: u32) {
        let k = 1u64 << self.lg_k;
        let col = (row_col & 63) as usize;
        let one_over_p = (k as f64) / self.kxp;
        self.hip_est_accum += one_over_p;
        self.kxp -= INVERSE_POWERS_OF_2[col + 1]; // notice the "+1"
    }

    fn update_sparse(&mut self, row_col: u32) {
        let k = 1u64 << self.lg_k;
        let c32pre = (self.num_coupons as u64) << 5;
        debug_assert!(c32pre < 3 * k); // C < 3K/32, in other words flavor == SPARSE
        let is_novel = self.mut_surprising_value_table().maybe_insert(row_col);
        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c32post = (self.num_coupons as u64) << 5;
            if c32post >= 3 * k {
                self.promote_sparse_to_windowed();
            }
        }
    }

    fn promote_sparse_to_windowed(&mut self) {
        debug_assert_eq!(self.window_offset, 0);

        let k = 1u64 << self.lg_k;
        let c32 = (self.num_coupons as u64) << 5;
        debug_assert!((c32 == 3 * k) || (self.lg_k == 4 && c32 > 3 * k));

        self.sliding_window.resize(k as usize, 0);

        let old_table = self
            .surprising_value_table
            .replace(PairTable::new(2, 6 + self.lg_k))
            .expect("surprising value table must be initialized");
        for &row_col in old_table.slots() {
            if row_col != PAIR_EMPTY {
                let col = (row_col & 63) as u8;
                if col < 8 {
                    let row = (row_col >> 6) as usize;
                    self.sliding_window[row] |= 1 << col;
                } else {
                    // cannot use must_insert(), because it doesn't provide for growth
                    let is_novel = self.mut_surprising_value_table().maybe_insert(row_col);
                    debug_assert!(is_novel);
                }
            }
        }
    }

    fn update_windowed(&mut self, row_col: u32) {
        debug_assert!(self.window_offset <= 56);
        let k = 1u64 << self.lg_k;
        let c32pre = (self.num_coupons as u64) << 5;
        debug_assert!(c32pre >= 3 * k); // C >= 3K/32, in other words flavor >= HYBRID
        let c8pre = (self.num_coupons as u64) << 3;
        let w8pre = (self.window_offset as u64) << 3;
        debug_assert!(c8pre < (27 + w8pre) * k); // C < (27/8 + offset) * K

        let is_novel;
        let col = (row_col & 63) as u8;
        if col < self.window_offset {
            // track the surprising 0's "before" the window
            is_novel = self.mut_surprising_value_table().maybe_delete(row_col); // inverted logic
        } else if col < self.window_offset + 8 {
            // track the 8 bits inside the window
            let row = (row_col >> 6) as usize;
            let old_bits = self.sliding_window[row];
            let new_bits = old_bits | (1 << (col - self.window_offset));
            is_novel = old_bits != new_bits;
            self.sliding_window[row] = new_bits;
        } else {
            // track the surprising 1's "after" the window
            is_novel = self.mut_surprising_value_table().maybe_insert(row_col); // normal logic
        }

        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c8post = (self.num_coupons as u64) << 3;
            if c8post >= (27 + w8pre) * k {
                self.move_window();
                debug_assert!((1..=56).contains(&self.window_offset));
                let w8post = (self.window_offset as u64) << 3;
                debug_assert!(c8post < (27 + w8post) * k);
            }
        }
    }

    /// Slides the window one column to the right by rebuilding the window
    /// and the table from the materialized bit matrix.
    fn move_window(&mut self) {
        let new_offset = self.window_offset + 1;
        assert!(new_offset <= 56, "window offset overflow");
        let matrix = self.bit_matrix();
        self.refill_from_matrix(&matrix, new_offset);
    }

    /// Materializes the conceptual 2^lg_k x 64 coupon bit matrix.
    ///
    /// Columns below the window default to 1; the table entries are XORed
    /// in, which clears the surprising zeros and sets the surprising ones.
    pub(super) fn bit_matrix(&self) -> Vec<u64> {
        let k = 1usize << self.lg_k;
        let offset = self.window_offset as u32;
        debug_assert!(offset <= 56);

        let default_row = if offset == 0 { 0 } else { (1u64 << offset) - 1 };
        let mut matrix = vec![default_row; k];

        if !self.sliding_window.is_empty() {
            for (row, &byte) in self.sliding_window.iter().enumerate() {
                matrix[row] |= (byte as u64) << offset;
            }
        }

        if let Some(table) = &self.surprising_value_table {
            for &pair in table.slots() {
                if pair != PAIR_EMPTY {
                    let row = (pair >> 6) as usize;
                    let col = pair & 63;
                    matrix[row] ^= 1u64 << col;
                }
            }
        }

        matrix
    }

    /// Rebuilds window, table and first_interesting_column from a bit
    /// matrix at the given window offset.
    pub(super) fn refill_from_matrix(&mut self, matrix: &[u64], offset: u8) {
        let k = 1usize << self.lg_k;
        debug_assert_eq!(matrix.len(), k);
        debug_assert!(offset <= 56);

        let mut table = PairTable::new(2, 6 + self.lg_k);
        let mut window = vec![0u8; k];
        let below_mask = if offset == 0 {
            0
        } else {
            (1u64 << offset) - 1
        };
        let above_shift = offset as u32 + 8;
        let mut first_interesting = offset;

        for (row, &bits) in matrix.iter().enumerate() {
            window[row] = ((bits >> offset) & 0xFF) as u8;

            let mut zeros = !bits & below_mask;
            while zeros != 0 {
                let col = zeros.trailing_zeros();
                zeros &= zeros - 1;
                table.must_insert(((row as u32) << 6) | col);
                first_interesting = first_interesting.min(col as u8);
            }

            if above_shift < 64 {
                let mut ones = (bits >> above_shift) << above_shift;
                while ones != 0 {
                    let col = ones.trailing_zeros();
                    ones &= ones - 1;
                    table.must_insert(((row as u32) << 6) | col);
                }
            }
        }

        self.window_offset = offset;
        self.sliding_window = window;
        self.surprising_value_table = Some(table);
        self.first_interesting_column = first_interesting;
    }

    /// Checks that the materialized bit matrix agrees with `num_coupons`.
    ///
    /// This catches most forms of corruption introduced by a faulty
    /// serialization round trip.
    pub fn validate(&self) -> bool {
        let num_bits_set: u64 = self
            .bit_matrix()
            .iter()
            .map(|&row| row.count_ones() as u64)
            .sum();
        num_bits_set == self.num_coupons as u64
    }

    pub(super) fn flavor(&self) -> Flavor {
        super::determine_flavor(self.lg_k, self.num_coupons)
    }
}

impl CpcSketch {
    /// Returns the estimated maximum serialized size of a sketch.
    ///
    /// The actual size of a serialized CPC sketch has a small random
    /// variance, but the following empirically measured size for the
    /// pair payload, plus K bytes for the packed window, should be large
    /// enough for at least 99.9 percent of sketches.
    ///
    /// For small values of `n` the size can be much smaller.
    pub fn max_serialized_bytes(lg_k: u8) -> Result<usize, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
            )));
        }

        // These empirical values for the 99.9th percentile of payload size
        // in bytes were measured using 100,000 trials. The value for each
        // trial is the maximum of 5*16=80 measurements that were equally
        // spaced over values of the quantity C/K between 3.0 and 8.0. This
        // table does not include the window (K bytes packed) or the
        // worst-case space for the preamble; both are added by the function.
        const EMPIRICAL_SIZE_MAX_LG_K: u8 = 19;
        const EMPIRICAL_MAX_SIZE_BYTES: [usize; 16] = [
            24,     // lg_k = 4
            36,     // lg_k = 5
            56,     // lg_k = 6
            100,    // lg_k = 7
            180,    // lg_k = 8
            344,    // lg_k = 9
            660,    // lg_k = 10
            1292,   // lg_k = 11
            2540,   // lg_k = 12
            5020,   // lg_k = 13
            9968,   // lg_k = 14
            19836,  // lg_k = 15
            39532,  // lg_k = 16
            78880,  // lg_k = 17
            157516, // lg_k = 18
            314656, // lg_k = 19
        ];
        const EMPIRICAL_MAX_SIZE_FACTOR: f64 = 0.6; // 0.6 = 4.8 / 8.0
        const MAX_PREAMBLE_SIZE_BYTES: usize = 40;

        let k = 1usize << lg_k;
        if lg_k <= EMPIRICAL_SIZE_MAX_LG_K {
            let idx = (lg_k - MIN_LG_K) as usize;
            return Ok(EMPIRICAL_MAX_SIZE_BYTES[idx] + k + MAX_PREAMBLE_SIZE_BYTES);
        }
        Ok(((EMPIRICAL_MAX_SIZE_FACTOR * k as f64) as usize) + k + MAX_PREAMBLE_SIZE_BYTES)
    }
}
