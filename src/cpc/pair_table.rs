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

/// Empty slot sentinel. Update perturbs the one colliding coupon value, so
/// the sentinel never appears as a real entry.
pub(super) const PAIR_EMPTY: u32 = u32::MAX;

const UPSIZE_NUMER: u64 = 3;
const UPSIZE_DENOM: u64 = 4;
const DOWNSIZE_NUMER: u64 = 1;
const DOWNSIZE_DENOM: u64 = 4;

/// A highly specialized hash table of (row, col) coupons packed as
/// `(row << 6) | col`, used for the sparse part of a CPC sketch.
///
/// Open addressing with linear probing. Grows at 3/4 load and shrinks when
/// deletions bring the load below 1/4, so the table stays proportional to
/// the number of surprising values it holds.
#[derive(Debug, Clone)]
pub(super) struct PairTable {
    lg_size: u8,
    valid_bits: u8,
    num_pairs: u32,
    slots: Vec<u32>,
}

impl PairTable {
    pub fn new(lg_size: u8, valid_bits: u8) -> Self {
        assert!(lg_size >= 2, "lg_size must be >= 2, got {lg_size}");
        Self {
            lg_size,
            valid_bits,
            num_pairs: 0,
            slots: vec![PAIR_EMPTY; 1 << lg_size],
        }
    }

    pub fn num_pairs(&self) -> u32 {
        self.num_pairs
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    #[inline]
    fn start_slot(&self, item: u32) -> usize {
        let hash = item.wrapping_mul(0x9e37_79b1);
        (hash >> (32 - self.lg_size)) as usize
    }

    fn find(&self, item: u32) -> Result<usize, usize> {
        let mask = self.slots.len() - 1;
        let mut probe = self.start_slot(item);
        loop {
            let occupant = self.slots[probe];
            if occupant == PAIR_EMPTY {
                return Err(probe);
            }
            if occupant == item {
                return Ok(probe);
            }
            probe = (probe + 1) & mask;
        }
    }

    /// Inserts the item if absent. Returns true if the item was novel.
    pub fn maybe_insert(&mut self, item: u32) -> bool {
        debug_assert_ne!(item, PAIR_EMPTY);
        match self.find(item) {
            Ok(_) => false,
            Err(slot) => {
                self.slots[slot] = item;
                self.num_pairs += 1;
                let capacity = self.slots.len() as u64;
                if (self.num_pairs as u64) * UPSIZE_DENOM > capacity * UPSIZE_NUMER {
                    self.rebuild(self.lg_size + 1);
                }
                true
            }
        }
    }

    /// Inserts an item that is known to be absent.
    pub fn must_insert(&mut self, item: u32) {
        let was_novel = self.maybe_insert(item);
        assert!(was_novel, "item {item:#x} was already present");
    }

    /// Deletes the item if present. Returns true if the item was there.
    ///
    /// Deletion re-inserts the remainder of the probe cluster so that linear
    /// probing stays sound without tombstones.
    pub fn maybe_delete(&mut self, item: u32) -> bool {
        let Ok(slot) = self.find(item) else {
            return false;
        };

        let mask = self.slots.len() - 1;
        self.slots[slot] = PAIR_EMPTY;
        self.num_pairs -= 1;

        let mut probe = (slot + 1) & mask;
        while self.slots[probe] != PAIR_EMPTY {
            let displaced = self.slots[probe];
            self.slots[probe] = PAIR_EMPTY;
            self.num_pairs -= 1;
            self.maybe_insert(displaced);
            probe = (probe + 1) & mask;
        }

        let capacity = self.slots.len() as u64;
        if self.lg_size > 2 && (self.num_pairs as u64) * DOWNSIZE_DENOM < capacity * DOWNSIZE_NUMER
        {
            self.rebuild(self.lg_size - 1);
        }
        true
    }

    /// Returns all pairs in unspecified order.
    pub fn items(&self) -> Vec<u32> {
        let mut pairs = Vec::with_capacity(self.num_pairs as usize);
        for &slot in &self.slots {
            if slot != PAIR_EMPTY {
                pairs.push(slot);
            }
        }
        pairs
    }

    /// Returns all pairs sorted ascending, the order the compressor wants.
    pub fn sorted_items(&self) -> Vec<u32> {
        let mut pairs = self.items();
        pairs.sort_unstable();
        pairs
    }

    fn rebuild(&mut self, new_lg_size: u8) {
        assert!(
            (1u64 << new_lg_size) > self.num_pairs as u64,
            "new size must exceed the number of pairs"
        );
        let old = std::mem::replace(self, PairTable::new(new_lg_size, self.valid_bits));
        for slot in old.slots {
            if slot != PAIR_EMPTY {
                match self.find(slot) {
                    Ok(_) => unreachable!("duplicate pair during rebuild"),
                    Err(idx) => {
                        self.slots[idx] = slot;
                        self.num_pairs += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_dedup() {
        let mut table = PairTable::new(2, 16);
        assert!(table.maybe_insert(17));
        assert!(!table.maybe_insert(17));
        assert!(table.maybe_insert(42));
        assert_eq!(table.num_pairs(), 2);
    }

    #[test]
    fn test_growth_preserves_items() {
        let mut table = PairTable::new(2, 16);
        for i in 0..100u32 {
            assert!(table.maybe_insert(i * 7 + 1));
        }
        assert_eq!(table.num_pairs(), 100);
        let mut items = table.sorted_items();
        items.dedup();
        assert_eq!(items.len(), 100);
        for i in 0..100u32 {
            assert!(!table.maybe_insert(i * 7 + 1));
        }
    }

    #[test]
    fn test_delete_rewires_cluster() {
        let mut table = PairTable::new(4, 16);
        // force a long probe cluster, then delete from the middle
        let items: Vec<u32> = (0..12).map(|i| i * 16 + 3).collect();
        for &item in &items {
            table.must_insert(item);
        }
        assert!(table.maybe_delete(items[5]));
        assert!(!table.maybe_delete(items[5]));
        for (i, &item) in items.iter().enumerate() {
            if i != 5 {
                assert!(!table.maybe_insert(item), "item {item} lost on delete");
            }
        }
    }

    #[test]
    fn test_shrink_after_heavy_deletion() {
        let mut table = PairTable::new(2, 16);
        for i in 1..=64u32 {
            table.must_insert(i);
        }
        for i in 1..=60u32 {
            assert!(table.maybe_delete(i));
        }
        assert_eq!(table.num_pairs(), 4);
        assert_eq!(table.sorted_items(), vec![61, 62, 63, 64]);
    }
}
