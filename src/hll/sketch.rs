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
use crate::common::NumStdDev;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::murmur_hash3_x64_128;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hll::array4::Hll4Array;
use crate::hll::array6::Hll6Array;
use crate::hll::array8::Hll8Array;
use crate::hll::estimator::coupon_estimate;
use crate::hll::estimator::coupon_lower_bound;
use crate::hll::estimator::coupon_upper_bound;
use crate::hll::estimator::HipEstimator;
use crate::hll::hash_set::CouponHashSet;
use crate::hll::list::CouponList;
use crate::hll::make_coupon;
use crate::hll::set_promotion_threshold;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;

/// The representation a sketch is currently living in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurMode {
    /// Short unsorted coupon vector.
    List = 0,
    /// Open-addressed coupon hash set.
    Set = 1,
    /// Register array.
    Hll = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Representation {
    List(CouponList),
    Set(CouponHashSet),
    Hll4(Hll4Array),
    Hll6(Hll6Array),
    Hll8(Hll8Array),
}

/// A HyperLogLog sketch.
#[derive(Debug, Clone)]
pub struct HllSketch {
    pub(super) lg_config_k: u8,
    pub(super) tgt_type: HllType,
    pub(super) seed: u64,
    pub(super) representation: Representation,
}

impl HllSketch {
    /// Creates a sketch with the given lg_k and register width, under the
    /// default seed.
    pub fn new(lg_config_k: u8, tgt_type: HllType) -> Result<Self, Error> {
        Self::with_seed(lg_config_k, tgt_type, DEFAULT_UPDATE_SEED)
    }

    /// Creates a sketch with the given lg_k, register width and seed.
    pub fn with_seed(lg_config_k: u8, tgt_type: HllType, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_config_k}"
            )));
        }
        Ok(Self {
            lg_config_k,
            tgt_type,
            seed,
            representation: Representation::List(CouponList::new()),
        })
    }

    /// Returns the configured lg_k.
    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    /// Returns the configured register width.
    pub fn tgt_type(&self) -> HllType {
        self.tgt_type
    }

    /// Returns the update seed of this sketch.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the representation the sketch currently lives in.
    pub fn cur_mode(&self) -> CurMode {
        match &self.representation {
            Representation::List(_) => CurMode::List,
            Representation::Set(_) => CurMode::Set,
            _ => CurMode::Hll,
        }
    }

    /// Returns true if the sketch has seen no data.
    pub fn is_empty(&self) -> bool {
        match &self.representation {
            Representation::List(list) => list.is_empty(),
            _ => false,
        }
    }

    /// Returns true if estimates no longer come from the HIP accumulator,
    /// after a merge or an out-of-order deserialization.
    pub fn is_out_of_order(&self) -> bool {
        match &self.representation {
            Representation::List(_) | Representation::Set(_) => false,
            Representation::Hll4(arr) => arr.estimator().is_out_of_order(),
            Representation::Hll6(arr) => arr.estimator().is_out_of_order(),
            Representation::Hll8(arr) => arr.estimator().is_out_of_order(),
        }
    }

    /// Returns the best estimate of the cardinality.
    pub fn estimate(&self) -> f64 {
        match &self.representation {
            Representation::List(list) => coupon_estimate(list.len()),
            Representation::Set(set) => coupon_estimate(set.count()),
            Representation::Hll4(arr) => arr.estimate(),
            Representation::Hll6(arr) => arr.estimate(),
            Representation::Hll8(arr) => arr.estimate(),
        }
    }

    /// Returns the lower bound of the confidence interval.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.representation {
            Representation::List(list) => coupon_lower_bound(list.len(), num_std_dev),
            Representation::Set(set) => coupon_lower_bound(set.count(), num_std_dev),
            Representation::Hll4(arr) => arr.lower_bound(num_std_dev),
            Representation::Hll6(arr) => arr.lower_bound(num_std_dev),
            Representation::Hll8(arr) => arr.lower_bound(num_std_dev),
        }
    }

    /// Returns the upper bound of the confidence interval.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.representation {
            Representation::List(list) => coupon_upper_bound(list.len(), num_std_dev),
            Representation::Set(set) => coupon_upper_bound(set.count(), num_std_dev),
            Representation::Hll4(arr) => arr.upper_bound(num_std_dev),
            Representation::Hll6(arr) => arr.upper_bound(num_std_dev),
            Representation::Hll8(arr) => arr.upper_bound(num_std_dev),
        }
    }

    /// Updates the sketch with a byte buffer (also accepts `&str`).
    pub fn update(&mut self, datum: impl AsRef<[u8]>) {
        let (h1, h2) = murmur_hash3_x64_128(datum.as_ref(), self.seed);
        self.coupon_update(make_coupon(h1, h2));
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

    /// Updates the sketch with an f64, canonicalizing zero and NaN first.
    pub fn update_f64(&mut self, datum: f64) {
        self.update(canonical_double(datum).to_le_bytes());
    }

    /// Updates the sketch with an f32.
    pub fn update_f32(&mut self, datum: f32) {
        self.update_f64(datum as f64);
    }

    pub(super) fn coupon_update(&mut self, coupon: u32) {
        match &mut self.representation {
            Representation::List(list) => {
                if list.contains(coupon) {
                    return;
                }
                if !list.is_full() {
                    list.push(coupon);
                    return;
                }
                // promote LIST -> SET and retry there
                let mut set = CouponHashSet::new();
                for &existing in list.coupons() {
                    set.update(existing);
                }
                set.update(coupon);
                self.representation = Representation::Set(set);
                self.maybe_promote_set();
            }
            Representation::Set(set) => {
                if set.update(coupon) {
                    self.maybe_promote_set();
                }
            }
            Representation::Hll4(arr) => arr.update(coupon),
            Representation::Hll6(arr) => arr.update(coupon),
            Representation::Hll8(arr) => arr.update(coupon),
        }
    }

    fn maybe_promote_set(&mut self) {
        let Representation::Set(set) = &self.representation else {
            return;
        };
        if set.count() < set_promotion_threshold(self.lg_config_k) {
            return;
        }
        let coupons: Vec<u32> = set.iter().collect();
        let mut fresh = Self::new_array(self.lg_config_k, self.tgt_type);
        for coupon in coupons {
            match &mut fresh {
                Representation::Hll4(arr) => arr.update(coupon),
                Representation::Hll6(arr) => arr.update(coupon),
                Representation::Hll8(arr) => arr.update(coupon),
                _ => unreachable!("new_array returns a register representation"),
            }
        }
        self.representation = fresh;
    }

    fn new_array(lg_config_k: u8, tgt_type: HllType) -> Representation {
        match tgt_type {
            HllType::Hll4 => Representation::Hll4(Hll4Array::new(lg_config_k)),
            HllType::Hll6 => Representation::Hll6(Hll6Array::new(lg_config_k)),
            HllType::Hll8 => Representation::Hll8(Hll8Array::new(lg_config_k)),
        }
    }

    /// Reads the value of every register slot. Only valid in HLL mode.
    fn slot_values(&self) -> Vec<u8> {
        let k = 1u32 << self.lg_config_k;
        let mut values = Vec::with_capacity(k as usize);
        for slot in 0..k {
            values.push(match &self.representation {
                Representation::Hll4(arr) => arr.get(slot),
                Representation::Hll6(arr) => arr.get(slot),
                Representation::Hll8(arr) => arr.get(slot),
                _ => unreachable!("slot_values requires HLL mode"),
            });
        }
        values
    }

    fn estimator(&self) -> Option<&HipEstimator> {
        match &self.representation {
            Representation::Hll4(arr) => Some(arr.estimator()),
            Representation::Hll6(arr) => Some(arr.estimator()),
            Representation::Hll8(arr) => Some(arr.estimator()),
            _ => None,
        }
    }

    pub(super) fn set_out_of_order(&mut self, flag: bool) {
        match &mut self.representation {
            Representation::Hll4(arr) => arr.estimator_mut().set_out_of_order(flag),
            Representation::Hll6(arr) => arr.estimator_mut().set_out_of_order(flag),
            Representation::Hll8(arr) => arr.estimator_mut().set_out_of_order(flag),
            _ => {} // coupon estimates are order-independent
        }
    }

    /// Returns a copy of this sketch re-encoded at the given register
    /// width. Register values and estimator state carry over exactly, so
    /// the estimates agree up to the width-4 aux handling.
    pub fn copy_as(&self, tgt_type: HllType) -> HllSketch {
        let mut copy = self.clone();
        copy.tgt_type = tgt_type;
        if self.cur_mode() != CurMode::Hll {
            return copy;
        }

        let values = self.slot_values();
        let estimator = self
            .estimator()
            .expect("HLL mode carries an estimator")
            .clone();
        copy.representation = match tgt_type {
            HllType::Hll4 => {
                Representation::Hll4(Hll4Array::from_values(self.lg_config_k, &values, estimator))
            }
            HllType::Hll6 => {
                Representation::Hll6(Hll6Array::from_values(self.lg_config_k, &values, estimator))
            }
            HllType::Hll8 => {
                Representation::Hll8(Hll8Array::from_values(self.lg_config_k, &values, estimator))
            }
        };
        copy
    }

    /// Merges a peer sketch into this one.
    ///
    /// Peers of different lg_k fold down to the smaller of the two. On
    /// success the result is marked out-of-order, so estimates come from
    /// the composite estimator; on error this sketch is left untouched.
    pub fn merge(&mut self, other: &HllSketch) -> Result<(), Error> {
        if compute_seed_hash(other.seed) != compute_seed_hash(self.seed) {
            return Err(Error::incompatible_seed(
                compute_seed_hash(self.seed),
                compute_seed_hash(other.seed),
            ));
        }
        if other.is_empty() {
            return Ok(());
        }

        if other.lg_config_k < self.lg_config_k {
            self.downsample(other.lg_config_k);
        }
        self.absorb(other);
        self.set_out_of_order(true);
        Ok(())
    }

    /// Folds the content of `other` into this sketch. `other.lg_config_k`
    /// must be at least this sketch's lg_k.
    fn absorb(&mut self, other: &HllSketch) {
        debug_assert!(other.lg_config_k >= self.lg_config_k);
        match &other.representation {
            Representation::List(list) => {
                for &coupon in list.coupons() {
                    self.coupon_update(coupon);
                }
            }
            Representation::Set(set) => {
                for coupon in set.iter() {
                    self.coupon_update(coupon);
                }
            }
            _ => {
                // register content forces this sketch into HLL mode too
                self.force_hll_mode();
                let values = other.slot_values();
                for (slot, &value) in values.iter().enumerate() {
                    if value > 0 {
                        self.coupon_update(crate::hll::pack_coupon(slot as u32, value));
                    }
                }
            }
        }
    }

    fn force_hll_mode(&mut self) {
        if self.cur_mode() == CurMode::Hll {
            return;
        }
        let coupons: Vec<u32> = match &self.representation {
            Representation::List(list) => list.coupons().to_vec(),
            Representation::Set(set) => set.iter().collect(),
            _ => unreachable!(),
        };
        let mut fresh = Self::new_array(self.lg_config_k, self.tgt_type);
        for coupon in coupons {
            match &mut fresh {
                Representation::Hll4(arr) => arr.update(coupon),
                Representation::Hll6(arr) => arr.update(coupon),
                Representation::Hll8(arr) => arr.update(coupon),
                _ => unreachable!(),
            }
        }
        self.representation = fresh;
    }

    /// Rebuilds this sketch at a smaller lg_k by replaying its content.
    fn downsample(&mut self, new_lg_k: u8) {
        debug_assert!(new_lg_k < self.lg_config_k);
        let mut fresh = HllSketch::with_seed(new_lg_k, self.tgt_type, self.seed)
            .expect("new_lg_k is within the already-validated range");
        fresh.absorb(self);
        if self.is_out_of_order() {
            fresh.set_out_of_order(true);
        }
        *self = fresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(lg_k: u8, tgt: HllType, n: u64) -> HllSketch {
        let mut sketch = HllSketch::new(lg_k, tgt).unwrap();
        for i in 0..n {
            sketch.update_u64(i);
        }
        sketch
    }

    #[test]
    fn test_lg_k_bounds() {
        assert!(HllSketch::new(3, HllType::Hll8).is_err());
        assert!(HllSketch::new(22, HllType::Hll8).is_err());
        assert!(HllSketch::new(4, HllType::Hll4).is_ok());
        assert!(HllSketch::new(21, HllType::Hll6).is_ok());
    }

    #[test]
    fn test_mode_walk() {
        let mut sketch = HllSketch::new(8, HllType::Hll4).unwrap();
        assert_eq!(sketch.cur_mode(), CurMode::List);
        for i in 0..1u64 {
            sketch.update_u64(i);
        }
        assert_eq!(sketch.cur_mode(), CurMode::List);
        for i in 0..10u64 {
            sketch.update_u64(i);
        }
        assert_eq!(sketch.cur_mode(), CurMode::Set);
        for i in 0..1000u64 {
            sketch.update_u64(i);
        }
        assert_eq!(sketch.cur_mode(), CurMode::Hll);
        // promotions are irreversible
        for i in 0..10u64 {
            sketch.update_u64(i);
        }
        assert_eq!(sketch.cur_mode(), CurMode::Hll);
    }

    #[test]
    fn test_duplicates_do_not_inflate() {
        let mut sketch = HllSketch::new(12, HllType::Hll8).unwrap();
        for _ in 0..10 {
            for i in 0..100u64 {
                sketch.update_u64(i);
            }
        }
        let estimate = sketch.estimate();
        assert!((estimate - 100.0).abs() < 5.0, "estimate={estimate}");
    }

    #[test]
    fn test_copy_as_preserves_registers() {
        let source = filled(10, HllType::Hll8, 50_000);
        for tgt in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
            let copy = source.copy_as(tgt);
            for slot in 0..(1u32 << 10) {
                let expected = match &source.representation {
                    Representation::Hll8(arr) => arr.get(slot),
                    _ => unreachable!(),
                };
                let actual = match &copy.representation {
                    Representation::Hll4(arr) => arr.get(slot),
                    Representation::Hll6(arr) => arr.get(slot),
                    Representation::Hll8(arr) => arr.get(slot),
                    _ => unreachable!(),
                };
                assert_eq!(actual, expected, "tgt={tgt:?} slot={slot}");
            }
            assert!((copy.estimate() - source.estimate()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_merge_disjoint_streams() {
        let mut a = filled(11, HllType::Hll8, 20_000);
        let mut b = HllSketch::new(11, HllType::Hll8).unwrap();
        for i in 20_000..40_000u64 {
            b.update_u64(i);
        }
        a.merge(&b).unwrap();
        assert!(a.is_out_of_order());
        let estimate = a.estimate();
        let expected = 40_000.0;
        assert!(
            (estimate - expected).abs() / expected < 0.05,
            "estimate={estimate}"
        );
    }

    #[test]
    fn test_merge_folds_to_smaller_lg_k() {
        let mut big = filled(14, HllType::Hll8, 30_000);
        let small = filled(10, HllType::Hll8, 30_000);
        big.merge(&small).unwrap();
        assert_eq!(big.lg_config_k(), 10);
        let estimate = big.estimate();
        assert!(
            (estimate - 30_000.0).abs() / 30_000.0 < 0.15,
            "estimate={estimate}"
        );
    }

    #[test]
    fn test_merge_seed_mismatch() {
        let mut a = HllSketch::new(10, HllType::Hll8).unwrap();
        let mut b = HllSketch::with_seed(10, HllType::Hll8, 777).unwrap();
        b.update_u64(1);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_coupon_merge_of_small_sketches() {
        let mut a = filled(10, HllType::Hll4, 5);
        let b = filled(10, HllType::Hll4, 5);
        a.merge(&b).unwrap();
        // identical content: still five distinct values
        assert!((a.estimate() - 5.0).abs() < 0.01);
    }
}
