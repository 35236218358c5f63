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

//! Overflow side-table for the 4-bit register array.
//!
//! Slots whose value offset no longer fits a nibble keep the AUX token in
//! the main array and their true value here, stored as packed
//! (slot, value) coupons in a small open-addressed table.

use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::pack_coupon;

const LG_INIT_AUX_SIZE: u8 = 2;
const PAIR_EMPTY: u32 = 0; // aux values are >= 15, so a real pair is never 0

#[derive(Debug, Clone, PartialEq)]
pub(super) struct AuxMap {
    lg_size: u8,
    count: u32,
    pairs: Vec<u32>,
}

impl AuxMap {
    pub fn new() -> Self {
        Self::with_lg_size(LG_INIT_AUX_SIZE)
    }

    fn with_lg_size(lg_size: u8) -> Self {
        Self {
            lg_size,
            count: 0,
            pairs: vec![PAIR_EMPTY; 1 << lg_size],
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn lg_size(&self) -> u8 {
        self.lg_size
    }

    fn find(&self, slot: u32) -> Result<usize, usize> {
        let mask = self.pairs.len() - 1;
        let mut probe = (slot as usize) & mask;
        let stride = (((slot >> self.lg_size) as usize) | 1) & mask;
        loop {
            let pair = self.pairs[probe];
            if pair == PAIR_EMPTY {
                return Err(probe);
            }
            if get_slot(pair) == slot {
                return Ok(probe);
            }
            probe = (probe + stride) & mask;
        }
    }

    pub fn get(&self, slot: u32) -> Option<u8> {
        match self.find(slot) {
            Ok(idx) => Some(get_value(self.pairs[idx])),
            Err(_) => None,
        }
    }

    /// Inserts a slot that must not be present yet.
    pub fn insert(&mut self, slot: u32, value: u8) {
        match self.find(slot) {
            Ok(_) => panic!("aux map already holds slot {slot}"),
            Err(idx) => {
                self.pairs[idx] = pack_coupon(slot, value);
                self.count += 1;
                if (self.count as usize) * 4 > self.pairs.len() * 3 {
                    self.grow();
                }
            }
        }
    }

    /// Replaces the value of a slot that must already be present.
    pub fn replace(&mut self, slot: u32, value: u8) {
        match self.find(slot) {
            Ok(idx) => self.pairs[idx] = pack_coupon(slot, value),
            Err(_) => panic!("aux map does not hold slot {slot}"),
        }
    }

    /// Iterates over (slot, value) entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.pairs
            .iter()
            .filter(|&&pair| pair != PAIR_EMPTY)
            .map(|&pair| (get_slot(pair), get_value(pair)))
    }

    fn grow(&mut self) {
        let old = std::mem::replace(self, Self::with_lg_size(self.lg_size + 1));
        for (slot, value) in old.iter() {
            self.insert(slot, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_replace() {
        let mut aux = AuxMap::new();
        aux.insert(100, 17);
        aux.insert(200, 20);
        assert_eq!(aux.get(100), Some(17));
        assert_eq!(aux.get(200), Some(20));
        assert_eq!(aux.get(300), None);
        aux.replace(100, 19);
        assert_eq!(aux.get(100), Some(19));
        assert_eq!(aux.count(), 2);
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut aux = AuxMap::new();
        for slot in 0..200u32 {
            aux.insert(slot, 15 + (slot % 40) as u8);
        }
        assert_eq!(aux.count(), 200);
        for slot in 0..200u32 {
            assert_eq!(aux.get(slot), Some(15 + (slot % 40) as u8));
        }
    }
}
