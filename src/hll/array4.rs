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

//! 4-bit register array with the auxiliary overflow map.
//!
//! Each nibble stores the offset of its slot value from `cur_min`: low
//! nibble for even slots, high nibble for odd slots. An offset of 15 is
//! the AUX token; the true value then lives in the aux map. Once no slot
//! remains at `cur_min` the whole array shifts down by one, which is what
//! keeps four bits sufficient in practice.

use crate::common::NumStdDev;
use crate::hll::aux_map::AuxMap;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;

const AUX_TOKEN: u8 = 15;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Hll4Array {
    lg_config_k: u8,
    /// Packed nibbles, two slots per byte.
    nibbles: Vec<u8>,
    cur_min: u8,
    num_at_cur_min: u32,
    aux: Option<AuxMap>,
    estimator: HipEstimator,
}

impl Hll4Array {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u32 << lg_config_k;
        Self {
            lg_config_k,
            nibbles: vec![0u8; Self::byte_arr_len(lg_config_k)],
            cur_min: 0,
            num_at_cur_min: k,
            aux: None,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    pub fn from_parts(
        lg_config_k: u8,
        nibbles: Vec<u8>,
        cur_min: u8,
        num_at_cur_min: u32,
        aux: Option<AuxMap>,
        estimator: HipEstimator,
    ) -> Self {
        debug_assert_eq!(nibbles.len(), Self::byte_arr_len(lg_config_k));
        Self {
            lg_config_k,
            nibbles,
            cur_min,
            num_at_cur_min,
            aux,
            estimator,
        }
    }

    pub fn from_values(lg_config_k: u8, values: &[u8], estimator: HipEstimator) -> Self {
        debug_assert_eq!(values.len(), 1 << lg_config_k);
        let cur_min = *values.iter().min().expect("register array is never empty");
        let num_at_cur_min = values.iter().filter(|&&v| v == cur_min).count() as u32;

        let mut arr = Self::new(lg_config_k);
        arr.estimator = estimator;
        arr.cur_min = cur_min;
        arr.num_at_cur_min = num_at_cur_min;
        for (slot, &value) in values.iter().enumerate() {
            let shifted = value - cur_min;
            if shifted >= AUX_TOKEN {
                arr.put_raw(slot as u32, AUX_TOKEN);
                arr.aux
                    .get_or_insert_with(AuxMap::new)
                    .insert(slot as u32, value);
            } else {
                arr.put_raw(slot as u32, shifted);
            }
        }
        arr
    }

    /// Raw 4-bit offset, not adjusted for cur_min.
    #[inline]
    fn get_raw(&self, slot: u32) -> u8 {
        let byte = self.nibbles[(slot >> 1) as usize];
        if slot & 1 == 0 {
            byte & 0x0F
        } else {
            byte >> 4
        }
    }

    #[inline]
    fn put_raw(&mut self, slot: u32, value: u8) {
        debug_assert!(value <= AUX_TOKEN);
        let byte_idx = (slot >> 1) as usize;
        let old_byte = self.nibbles[byte_idx];
        self.nibbles[byte_idx] = if slot & 1 == 0 {
            (old_byte & 0xF0) | value
        } else {
            (old_byte & 0x0F) | (value << 4)
        };
    }

    /// Actual value of a slot, resolving the aux map when needed.
    pub fn get(&self, slot: u32) -> u8 {
        let raw = self.get_raw(slot);
        if raw < AUX_TOKEN {
            raw + self.cur_min
        } else {
            self.aux
                .as_ref()
                .and_then(|aux| aux.get(slot))
                .expect("AUX token without a matching aux entry")
        }
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);
        debug_assert!(new_value > 0);

        if new_value <= self.cur_min {
            return; // quick rejection
        }

        let raw_stored = self.get_raw(slot);
        let old_value = if raw_stored < AUX_TOKEN {
            raw_stored + self.cur_min
        } else {
            self.aux
                .as_ref()
                .and_then(|aux| aux.get(slot))
                .expect("AUX token without a matching aux entry")
        };
        if new_value <= old_value {
            return;
        }

        self.estimator
            .update(self.lg_config_k, old_value, new_value);

        let shifted_new = new_value - self.cur_min;
        if raw_stored == AUX_TOKEN {
            // the slot is already an exception and stays one
            self.aux
                .as_mut()
                .expect("AUX token without aux map")
                .replace(slot, new_value);
        } else if shifted_new >= AUX_TOKEN {
            // the slot becomes an exception
            self.put_raw(slot, AUX_TOKEN);
            self.aux
                .get_or_insert_with(AuxMap::new)
                .insert(slot, new_value);
        } else {
            self.put_raw(slot, shifted_new);
        }

        if old_value == self.cur_min {
            self.num_at_cur_min -= 1;
            while self.num_at_cur_min == 0 {
                self.shift_to_bigger_cur_min();
            }
        }
    }

    /// Raises cur_min by one: every stored offset drops by one, and aux
    /// entries whose offset falls back under the token return to the
    /// nibble array.
    fn shift_to_bigger_cur_min(&mut self) {
        let new_cur_min = self.cur_min + 1;
        let k = 1u32 << self.lg_config_k;
        let mut num_at_new_min = 0u32;

        for slot in 0..k {
            let raw = self.get_raw(slot);
            debug_assert_ne!(raw, 0, "no slot may sit at cur_min when shifting");
            if raw < AUX_TOKEN {
                let decremented = raw - 1;
                self.put_raw(slot, decremented);
                if decremented == 0 {
                    num_at_new_min += 1;
                }
            }
        }

        if let Some(old_aux) = self.aux.take() {
            let mut new_aux = None;
            let entries: Vec<(u32, u8)> = old_aux.iter().collect();
            for (slot, value) in entries {
                let shifted = value - new_cur_min;
                if shifted < AUX_TOKEN {
                    self.put_raw(slot, shifted);
                    if shifted == 0 {
                        num_at_new_min += 1;
                    }
                } else {
                    new_aux
                        .get_or_insert_with(AuxMap::new)
                        .insert(slot, value);
                }
            }
            self.aux = new_aux;
        }

        self.cur_min = new_cur_min;
        self.num_at_cur_min = num_at_new_min;
    }

    pub fn cur_min(&self) -> u8 {
        self.cur_min
    }

    pub fn num_at_cur_min(&self) -> u32 {
        self.num_at_cur_min
    }

    pub fn aux(&self) -> Option<&AuxMap> {
        self.aux.as_ref()
    }

    pub fn estimate(&self) -> f64 {
        self.estimator
            .estimate(self.lg_config_k, self.cur_min, self.num_at_cur_min)
    }

    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator.lower_bound(
            self.lg_config_k,
            self.cur_min,
            self.num_at_cur_min,
            num_std_dev,
        )
    }

    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator.upper_bound(
            self.lg_config_k,
            self.cur_min,
            self.num_at_cur_min,
            num_std_dev,
        )
    }

    pub fn byte_arr(&self) -> &[u8] {
        &self.nibbles
    }

    pub fn estimator(&self) -> &HipEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HipEstimator {
        &mut self.estimator
    }

    pub fn byte_arr_len(lg_config_k: u8) -> usize {
        1 << (lg_config_k - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::pack_coupon;

    #[test]
    fn test_nibble_packing() {
        let mut arr = Hll4Array::new(4);
        arr.put_raw(0, 5);
        arr.put_raw(1, 7);
        assert_eq!(arr.get_raw(0), 5);
        assert_eq!(arr.get_raw(1), 7);
        assert_eq!(arr.nibbles[0], 0x75);
    }

    #[test]
    fn test_update_maximum_semantics() {
        let mut arr = Hll4Array::new(4);
        arr.update(pack_coupon(0, 5));
        assert_eq!(arr.get(0), 5);
        arr.update(pack_coupon(0, 3));
        assert_eq!(arr.get(0), 5);
        arr.update(pack_coupon(0, 8));
        assert_eq!(arr.get(0), 8);
    }

    #[test]
    fn test_aux_overflow() {
        let mut arr = Hll4Array::new(4);
        arr.update(pack_coupon(7, 40));
        assert_eq!(arr.get(7), 40);
        assert_eq!(arr.get_raw(7), AUX_TOKEN);
        assert_eq!(arr.aux().unwrap().get(7), Some(40));
        // raise it further while it is already an exception
        arr.update(pack_coupon(7, 50));
        assert_eq!(arr.get(7), 50);
        assert_eq!(arr.aux().unwrap().count(), 1);
    }

    #[test]
    fn test_cur_min_shift() {
        let mut arr = Hll4Array::new(4);
        // push every slot to at least 2; cur_min must follow
        for slot in 0..16u32 {
            arr.update(pack_coupon(slot, 2 + (slot % 3) as u8));
        }
        assert!(arr.cur_min() >= 1, "cur_min={}", arr.cur_min());
        for slot in 0..16u32 {
            assert_eq!(arr.get(slot), 2 + (slot % 3) as u8);
        }
    }

    #[test]
    fn test_values_above_token_plus_cur_min_have_aux_entries() {
        let mut arr = Hll4Array::new(5);
        for slot in 0..32u32 {
            arr.update(pack_coupon(slot, 1 + (slot % 20) as u8));
        }
        arr.update(pack_coupon(0, 35));
        arr.update(pack_coupon(9, 22));
        for slot in 0..32u32 {
            let value = arr.get(slot);
            if value >= AUX_TOKEN + arr.cur_min() {
                assert_eq!(arr.aux().unwrap().get(slot), Some(value), "slot={slot}");
            }
        }
    }

    #[test]
    fn test_from_values_round_trip() {
        let mut values = [0u8; 16];
        for (i, v) in values.iter_mut().enumerate() {
            *v = 2 + (i as u8 % 19);
        }
        let arr = Hll4Array::from_values(4, &values, HipEstimator::new(4));
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(arr.get(i as u32), v, "slot={i}");
        }
        assert_eq!(arr.cur_min(), 2);
    }
}
