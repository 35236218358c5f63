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

//! Compressed Probabilistic Counting (CPC) sketch for cardinality estimation.
//!
//! CPC is a coupon-collector sketch: each update derives a (row, column)
//! coupon from the hash of the value and records it in a conceptual
//! 2^lg_k x 64 bit matrix. The matrix is materialized as a dense sliding
//! window of 8 columns per row plus a sparse table of surprising values
//! outside the window. Compared to HLL of the same size, CPC gives better
//! accuracy per serialized byte at the cost of slower updates.
//!
//! Estimation uses HIP (Historical Inverse Probability) for sketches that
//! were fed a single stream, and the ICON estimator after any merge.
//!
//! # Usage
//!
//! ```rust
//! # use approx_sketches::cpc::CpcSketch;
//! let mut sketch = CpcSketch::new(11).unwrap();
//! for i in 0..10_000u64 {
//!     sketch.update_u64(i);
//! }
//! let estimate = sketch.estimate();
//! assert!((estimate - 10_000.0).abs() < 500.0);
//! ```

mod compression;
mod confidence;
mod estimator;
mod pair_table;
mod serialization;
mod sketch;
mod union;

pub use sketch::CpcSketch;
pub use union::CpcUnion;

/// Default log2 of K.
pub const DEFAULT_LG_K: u8 = 11;
/// Min log2 of K.
pub const MIN_LG_K: u8 = 4;
/// Max log2 of K.
pub const MAX_LG_K: u8 = 26;

/// The five density regimes of a CPC sketch, in increasing order of
/// num_coupons relative to K.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Flavor {
    /// No coupons collected.
    Empty,
    /// C < 3K/32: surprising-value table only.
    Sparse,
    /// 3K/32 <= C < K/2: window at offset 0 plus table.
    Hybrid,
    /// K/2 <= C < 27K/8: window at offset 0, table holds columns >= 8.
    Pinned,
    /// C >= 27K/8: window offset > 0, table holds both kinds of surprises.
    Sliding,
}

pub(crate) fn determine_flavor(lg_k: u8, num_coupons: u32) -> Flavor {
    let k = 1u64 << lg_k;
    let c = num_coupons as u64;
    if c == 0 {
        Flavor::Empty
    } else if c << 5 < 3 * k {
        Flavor::Sparse
    } else if c << 1 < k {
        Flavor::Hybrid
    } else if c << 3 < 27 * k {
        Flavor::Pinned
    } else {
        Flavor::Sliding
    }
}

/// Derives the window offset implied by the coupon count.
///
/// The window slides so that C stays below (27/8 + offset) * K, which makes
/// the offset a pure function of lg_k and num_coupons and allows the
/// deserializer to reconstruct it without storing it.
pub(crate) fn determine_correct_offset(lg_k: u8, num_coupons: u32) -> u8 {
    let k = 1i64 << lg_k;
    let c = num_coupons as i64;
    let tmp = (c << 3) - 19 * k; // 8C - 19K
    if tmp < 0 {
        return 0;
    }
    (tmp >> (lg_k + 3)) as u8 // tmp / 8K
}

/// Releases process-wide CPC tables.
///
/// The coupon coding tables used by the compressor are built at most once
/// and live for the rest of the process, so this is a no-op. It exists so
/// embedders with strict shutdown hygiene have a single place to call, and
/// it is guaranteed to do nothing when the tables were never initialized.
pub fn cleanup() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_boundaries() {
        let lg_k = 10; // K = 1024
        assert_eq!(determine_flavor(lg_k, 0), Flavor::Empty);
        assert_eq!(determine_flavor(lg_k, 95), Flavor::Sparse);
        assert_eq!(determine_flavor(lg_k, 96), Flavor::Hybrid);
        assert_eq!(determine_flavor(lg_k, 511), Flavor::Hybrid);
        assert_eq!(determine_flavor(lg_k, 512), Flavor::Pinned);
        assert_eq!(determine_flavor(lg_k, 3455), Flavor::Pinned);
        assert_eq!(determine_flavor(lg_k, 3456), Flavor::Sliding);
    }

    #[test]
    fn test_offset_matches_flavor() {
        let lg_k = 10;
        assert_eq!(determine_correct_offset(lg_k, 0), 0);
        assert_eq!(determine_correct_offset(lg_k, 3455), 0);
        // at the sliding boundary the offset becomes positive
        assert_eq!(determine_correct_offset(lg_k, 3456), 1);
    }
}
