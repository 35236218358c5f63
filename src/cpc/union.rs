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

//! Merging CPC sketches.
//!
//! The union keeps its accumulated state in one of two forms: a plain
//! sketch while everything seen so far is sparse, or the full coupon bit
//! matrix once any windowed sketch arrives. `result` folds the matrix back
//! into window-plus-table form. A merged result always reports through the
//! ICON estimator; the HIP accumulators of the inputs are not combinable.

use crate::cpc::pair_table::PAIR_EMPTY;
use crate::cpc::sketch::CpcSketch;
use crate::cpc::Flavor;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::DEFAULT_UPDATE_SEED;

/// An accumulator for the union of CPC sketches of equal lg_k.
pub struct CpcUnion {
    lg_k: u8,
    seed: u64,
    // invariant: exactly one of accumulator and bit_matrix is Some
    accumulator: Option<CpcSketch>,
    bit_matrix: Option<Vec<u64>>,
}

impl CpcUnion {
    /// Creates a union for sketches of the given lg_k under the default seed.
    pub fn new(lg_k: u8) -> Result<Self, Error> {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a union for sketches of the given lg_k and seed.
    pub fn with_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
            )));
        }
        Ok(Self {
            lg_k,
            seed,
            accumulator: Some(CpcSketch::with_seed(lg_k, seed)?),
            bit_matrix: None,
        })
    }

    /// Returns the parameter lg_k.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Folds a sketch into the union.
    ///
    /// Fails without touching the union if the seeds are incompatible or
    /// the lg_k differs.
    pub fn update(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        if compute_seed_hash(sketch.seed) != compute_seed_hash(self.seed) {
            return Err(Error::incompatible_seed(
                compute_seed_hash(self.seed),
                compute_seed_hash(sketch.seed),
            ));
        }
        if sketch.lg_k != self.lg_k {
            return Err(Error::invalid_argument(format!(
                "lg_k mismatch: union has {}, sketch has {}",
                self.lg_k, sketch.lg_k
            )));
        }
        if sketch.is_empty() {
            return Ok(());
        }

        let source_is_sparse = sketch.flavor() == Flavor::Sparse;

        if self.bit_matrix.is_none() && source_is_sparse {
            let accumulator = self
                .accumulator
                .as_mut()
                .expect("union without matrix must hold an accumulator");
            if let Some(table) = &sketch.surprising_value_table {
                for &pair in table.slots() {
                    if pair != PAIR_EMPTY {
                        accumulator.row_col_update(pair);
                    }
                }
            }
            // the accumulator may have outgrown the sparse regime itself
            if !accumulator.sliding_window.is_empty() {
                self.switch_to_bit_matrix();
            }
            return Ok(());
        }

        if self.bit_matrix.is_none() {
            self.switch_to_bit_matrix();
        }
        let matrix = self
            .bit_matrix
            .as_mut()
            .expect("matrix was just established");
        for (dst, src) in matrix.iter_mut().zip(sketch.bit_matrix()) {
            *dst |= src;
        }
        Ok(())
    }

    fn switch_to_bit_matrix(&mut self) {
        let accumulator = self
            .accumulator
            .take()
            .expect("union without matrix must hold an accumulator");
        self.bit_matrix = Some(accumulator.bit_matrix());
    }

    /// Returns the union of everything fed so far as a sketch.
    ///
    /// The result carries the merge flag, so its estimate always comes from
    /// the ICON estimator.
    pub fn result(&self) -> CpcSketch {
        match (&self.accumulator, &self.bit_matrix) {
            (Some(accumulator), None) => {
                let mut sketch = accumulator.clone();
                sketch.merge_flag = true;
                // HIP state is meaningless for a merged sketch
                sketch.kxp = (1u64 << self.lg_k) as f64;
                sketch.hip_est_accum = 0.0;
                sketch
            }
            (None, Some(matrix)) => sketch_from_matrix(self.lg_k, self.seed, matrix),
            _ => unreachable!("union must hold exactly one representation"),
        }
    }
}

fn sketch_from_matrix(lg_k: u8, seed: u64, matrix: &[u64]) -> CpcSketch {
    let num_coupons: u64 = matrix.iter().map(|&row| row.count_ones() as u64).sum();

    let mut sketch =
        CpcSketch::with_seed(lg_k, seed).expect("lg_k was validated at union creation");
    sketch.merge_flag = true;
    if num_coupons == 0 {
        return sketch;
    }
    sketch.num_coupons = num_coupons as u32;

    let flavor = super::determine_flavor(lg_k, sketch.num_coupons);
    if flavor == Flavor::Sparse {
        // a matrix this empty folds back into table-only form
        let mut table = crate::cpc::pair_table::PairTable::new(2, 6 + lg_k);
        for (row, &bits) in matrix.iter().enumerate() {
            let mut remaining = bits;
            while remaining != 0 {
                let col = remaining.trailing_zeros();
                remaining &= remaining - 1;
                table.must_insert(((row as u32) << 6) | col);
            }
        }
        sketch.surprising_value_table = Some(table);
        return sketch;
    }

    let offset = super::determine_correct_offset(lg_k, sketch.num_coupons);
    sketch.refill_from_matrix(matrix, offset);
    sketch
}

impl CpcSketch {
    /// Merges a peer sketch into this one.
    ///
    /// Both sketches must share lg_k and seed. On success this sketch
    /// becomes a merge result and reports through the ICON estimator; on
    /// error it is left untouched.
    pub fn merge(&mut self, other: &CpcSketch) -> Result<(), Error> {
        let mut union = CpcUnion::with_seed(self.lg_k, self.seed)?;
        union.update(self)?;
        union.update(other)?;
        *self = union.result();
        Ok(())
    }
}
