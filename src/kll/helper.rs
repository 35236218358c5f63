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

use std::cell::RefCell;

use crate::common::random::RandomSource;
use crate::common::random::XorShift64;

const POWERS_OF_THREE: [u64; 31] = [
    1,
    3,
    9,
    27,
    81,
    243,
    729,
    2187,
    6561,
    19683,
    59049,
    177147,
    531441,
    1594323,
    4782969,
    14348907,
    43046721,
    129140163,
    387420489,
    1162261467,
    3486784401,
    10460353203,
    31381059609,
    94143178827,
    282429536481,
    847288609443,
    2541865828329,
    7625597484987,
    22876792454961,
    68630377364883,
    205891132094649,
];

pub fn compute_total_capacity(k: u16, m: u8, num_levels: usize) -> u32 {
    let mut total: u32 = 0;
    for level in 0..num_levels {
        total += level_capacity(k, num_levels, level, m);
    }
    total
}

/// Capacity of the level at the given height: k * (2/3)^depth rounded,
/// floored at the minimum width m.
pub fn level_capacity(k: u16, num_levels: usize, height: usize, min_wid: u8) -> u32 {
    assert!(height < num_levels, "height must be < num_levels");
    let depth = num_levels - height - 1;
    let cap = int_cap_aux(k, depth as u8);
    std::cmp::max(min_wid as u32, cap as u32)
}

fn int_cap_aux(k: u16, depth: u8) -> u16 {
    if depth > 60 {
        panic!("depth must be <= 60");
    }
    if depth <= 30 {
        return int_cap_aux_aux(k, depth);
    }
    let half = depth / 2;
    let rest = depth - half;
    let tmp = int_cap_aux_aux(k, half);
    int_cap_aux_aux(tmp, rest)
}

fn int_cap_aux_aux(k: u16, depth: u8) -> u16 {
    if depth > 30 {
        panic!("depth must be <= 30");
    }
    let twok = (k as u64) << 1;
    let tmp = (twok << depth) / POWERS_OF_THREE[depth as usize];
    let result = (tmp + 1) >> 1;
    assert!(result <= k as u64, "capacity result exceeds k");
    result as u16
}

pub fn sum_the_sample_weights(level_sizes: &[usize]) -> u64 {
    let mut total = 0u64;
    let mut weight = 1u64;
    for &size in level_sizes {
        total += weight * size as u64;
        weight <<= 1;
    }
    total
}

/// The deterministic pseudo-random bit that picks the odd or even half
/// during compaction.
pub fn random_bit() -> u32 {
    thread_local! {
        static RNG: RefCell<XorShift64> = RefCell::new(XorShift64::default());
    }
    RNG.with(|rng| rng.borrow_mut().next_bool() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_capacity_schedule() {
        // the top level always has capacity k, lower ones shrink by 2/3
        assert_eq!(level_capacity(200, 1, 0, 8), 200);
        assert_eq!(level_capacity(200, 2, 1, 8), 200);
        assert_eq!(level_capacity(200, 2, 0, 8), 133);
        // deep levels bottom out at the minimum width
        assert_eq!(level_capacity(200, 20, 0, 8), 8);
    }

    #[test]
    fn test_total_capacity_is_sum() {
        let total = compute_total_capacity(200, 8, 3);
        let by_hand: u32 = (0..3).map(|h| level_capacity(200, 3, h, 8)).sum();
        assert_eq!(total, by_hand);
    }

    #[test]
    fn test_sum_the_sample_weights() {
        assert_eq!(sum_the_sample_weights(&[3, 2, 1]), 3 + 4 + 4);
        assert_eq!(sum_the_sample_weights(&[]), 0);
    }
}
