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

//! 8-bit register array: one byte per slot, direct read/write.

use crate::common::NumStdDev;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Hll8Array {
    lg_config_k: u8,
    regs: Vec<u8>,
    /// Number of slots still at zero; cur_min never rises in this width.
    num_at_cur_min: u32,
    estimator: HipEstimator,
}

impl Hll8Array {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1usize << lg_config_k;
        Self {
            lg_config_k,
            regs: vec![0u8; k],
            num_at_cur_min: k as u32,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    /// Rebuilds from deserialized state.
    pub fn from_parts(
        lg_config_k: u8,
        regs: Vec<u8>,
        num_at_cur_min: u32,
        estimator: HipEstimator,
    ) -> Self {
        debug_assert_eq!(regs.len(), 1 << lg_config_k);
        Self {
            lg_config_k,
            regs,
            num_at_cur_min,
            estimator,
        }
    }

    /// Builds from plain slot values, carrying over estimator state; used
    /// by register-width conversions.
    pub fn from_values(lg_config_k: u8, values: &[u8], estimator: HipEstimator) -> Self {
        debug_assert_eq!(values.len(), 1 << lg_config_k);
        let num_at_cur_min = values.iter().filter(|&&v| v == 0).count() as u32;
        Self {
            lg_config_k,
            regs: values.to_vec(),
            num_at_cur_min,
            estimator,
        }
    }

    pub fn get(&self, slot: u32) -> u8 {
        self.regs[slot as usize]
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);
        debug_assert!(new_value > 0);

        let cur_value = self.regs[slot as usize];
        if new_value > cur_value {
            self.regs[slot as usize] = new_value;
            self.estimator.update(self.lg_config_k, cur_value, new_value);
            if cur_value == 0 {
                self.num_at_cur_min -= 1; // one fewer zero slot
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
        &self.regs
    }

    pub fn estimator(&self) -> &HipEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut HipEstimator {
        &mut self.estimator
    }

    pub fn byte_arr_len(lg_config_k: u8) -> usize {
        1 << lg_config_k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::pack_coupon;

    #[test]
    fn test_slot_wise_maximum() {
        let mut arr = Hll8Array::new(8);
        arr.update(pack_coupon(3, 7));
        assert_eq!(arr.get(3), 7);
        arr.update(pack_coupon(3, 5));
        assert_eq!(arr.get(3), 7);
        arr.update(pack_coupon(3, 9));
        assert_eq!(arr.get(3), 9);
    }

    #[test]
    fn test_zero_slot_accounting() {
        let mut arr = Hll8Array::new(4);
        assert_eq!(arr.num_at_cur_min(), 16);
        arr.update(pack_coupon(0, 2));
        arr.update(pack_coupon(1, 2));
        arr.update(pack_coupon(0, 5)); // same slot, not a new zero departure
        assert_eq!(arr.num_at_cur_min(), 14);
    }

    #[test]
    fn test_slot_folding_by_mask() {
        let mut arr = Hll8Array::new(4);
        // slot 16 folds onto slot 0 in a 16-register array
        arr.update(pack_coupon(16, 6));
        assert_eq!(arr.get(0), 6);
    }
}
