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

//! 6-bit register array: four slots packed into every three bytes.

use crate::common::NumStdDev;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;

const VALUE_MASK: u16 = 0x3F;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Hll6Array {
    lg_config_k: u8,
    bytes: Vec<u8>,
    /// Number of slots still at zero; cur_min never rises in this width.
    num_at_cur_min: u32,
    estimator: HipEstimator,
}

impl Hll6Array {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1usize << lg_config_k;
        Self {
            lg_config_k,
            bytes: vec![0u8; Self::byte_arr_len(lg_config_k)],
            num_at_cur_min: k as u32,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    pub fn from_parts(
        lg_config_k: u8,
        bytes: Vec<u8>,
        num_at_cur_min: u32,
        estimator: HipEstimator,
    ) -> Self {
        debug_assert_eq!(bytes.len(), Self::byte_arr_len(lg_config_k));
        Self {
            lg_config_k,
            bytes,
            num_at_cur_min,
            estimator,
        }
    }

    pub fn from_values(lg_config_k: u8, values: &[u8], estimator: HipEstimator) -> Self {
        debug_assert_eq!(values.len(), 1 << lg_config_k);
        let mut arr = Self::new(lg_config_k);
        arr.estimator = estimator;
        let mut zeros = 0u32;
        for (slot, &value) in values.iter().enumerate() {
            debug_assert!(value <= VALUE_MASK as u8);
            arr.put_slot(slot as u32, value);
            if value == 0 {
                zeros += 1;
            }
        }
        arr.num_at_cur_min = zeros;
        arr
    }

    /// Reads the 6-bit field straddling at most two bytes.
    pub fn get(&self, slot: u32) -> u8 {
        let bit_offset = slot as usize * 6;
        let byte_idx = bit_offset / 8;
        let shift = bit_offset % 8;
        let word =
            (self.bytes[byte_idx] as u16) | ((self.bytes[byte_idx + 1] as u16) << 8);
        ((word >> shift) & VALUE_MASK) as u8
    }

    fn put_slot(&mut self, slot: u32, value: u8) {
        let bit_offset = slot as usize * 6;
        let byte_idx = bit_offset / 8;
        let shift = bit_offset % 8;
        let mut word =
            (self.bytes[byte_idx] as u16) | ((self.bytes[byte_idx + 1] as u16) << 8);
        word &= !(VALUE_MASK << shift);
        word |= (value as u16) << shift;
        self.bytes[byte_idx] = word as u8;
        self.bytes[byte_idx + 1] = (word >> 8) as u8;
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);
        debug_assert!(new_value > 0);

        let cur_value = self.get(slot);
        if new_value > cur_value {
            self.put_slot(slot, new_value);
            self.estimator.update(self.lg_config_k, cur_value, new_value);
            if cur_value == 0 {
                self.num_at_cur_min -= 1;
            }
        }
    }

    pub fn num_at_cur_min(&self) -> u32 {
        self.num_at_cur_min
    }

    pub fn estimate(&self) -> f64 {
        self.estimator
            .estimate(self.lg_config_k, 0, self.num_at_cur_min)
    }

    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator
            .lower_bound(self.lg_config_k, 0, self.num_at_cur_min, num_std_dev)
    }

    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator
            .upper_bound(self.lg_config_k, 0, self.num_at_cur_min, num_std_dev)
    }

    pub fn byte_arr(&self) -> &[u8] {
        &self.bytes
    }

    pub fn estimator(&self) -> &HipEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HipEstimator {
        &mut self.estimator
    }

    /// Three bytes per four slots, plus one spare byte so the last 6-bit
    /// field can always be read as a two-byte window.
    pub fn byte_arr_len(lg_config_k: u8) -> usize {
        let num_slots = 1usize << lg_config_k;
        ((num_slots * 3) >> 2) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::pack_coupon;

    #[test]
    fn test_packing_all_slots() {
        let mut arr = Hll6Array::new(6);
        // write a distinct pattern to every slot, then read it all back
        for slot in 0..64u32 {
            arr.put_slot(slot, ((slot * 7) % 64) as u8);
        }
        for slot in 0..64u32 {
            assert_eq!(arr.get(slot), ((slot * 7) % 64) as u8, "slot={slot}");
        }
    }

    #[test]
    fn test_neighbours_do_not_clobber() {
        let mut arr = Hll6Array::new(4);
        arr.put_slot(0, 63);
        arr.put_slot(1, 0);
        arr.put_slot(2, 63);
        assert_eq!(arr.get(0), 63);
        assert_eq!(arr.get(1), 0);
        assert_eq!(arr.get(2), 63);
    }

    #[test]
    fn test_update_maximum_semantics() {
        let mut arr = Hll6Array::new(5);
        arr.update(pack_coupon(10, 30));
        arr.update(pack_coupon(10, 20));
        assert_eq!(arr.get(10), 30);
        arr.update(pack_coupon(10, 45));
        assert_eq!(arr.get(10), 45);
    }
}
