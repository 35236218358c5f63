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

//! HyperLogLog sketch for cardinality estimation.
//!
//! The sketch moves through three representations as it grows:
//!
//! - **LIST**: a short unsorted vector of coupons.
//! - **SET**: an open-addressed hash set of coupons.
//! - **HLL**: a register array of 2^lg_k slots at one of three widths.
//!
//! Promotions are monotonic and irreversible; a sketch never returns to a
//! coupon representation once it is in HLL mode.
//!
//! # Register widths
//!
//! - [`HllType::Hll8`]: one byte per slot.
//! - [`HllType::Hll6`]: four slots packed into three bytes.
//! - [`HllType::Hll4`]: one nibble per slot, storing the offset from
//!   `cur_min`; offsets of 15 and above overflow into an auxiliary hash
//!   map keyed by slot.
//!
//! # Coupons
//!
//! A coupon is a 32-bit value packing a 26-bit slot key with a 6-bit
//! register value (1 + the leading-zero count of the high half of the
//! hash). The slot for a given lg_k is the low lg_k bits of the key, so
//! coupons are meaningful at every lg_k and sketches can be folded down.

mod array4;
mod array6;
mod array8;
mod aux_map;
mod composite_interpolation;
mod cubic_interpolation;
mod estimator;
mod harmonic_numbers;
mod hash_set;
mod list;
mod serialization;
mod sketch;
mod union;

pub use sketch::CurMode;
pub use sketch::HllSketch;
pub use union::HllUnion;

/// Min log2 of the register count.
pub const MIN_LG_K: u8 = 4;
/// Max log2 of the register count.
pub const MAX_LG_K: u8 = 21;

/// Target HLL register width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HllType {
    /// 4 bits per slot plus the auxiliary overflow map.
    Hll4 = 0,
    /// 6 bits per slot.
    Hll6 = 1,
    /// 8 bits per slot.
    Hll8 = 2,
}

const KEY_BITS_26: u32 = 26;
const KEY_MASK_26: u32 = (1 << KEY_BITS_26) - 1;

/// A full list promotes to SET.
const LIST_CAP: usize = 8;
const LG_INIT_SET_SIZE: u8 = 5;

/// Extract the slot key (low 26 bits) from a coupon.
#[inline]
fn get_slot(coupon: u32) -> u32 {
    coupon & KEY_MASK_26
}

/// Extract the register value (upper 6 bits) from a coupon.
#[inline]
fn get_value(coupon: u32) -> u8 {
    (coupon >> KEY_BITS_26) as u8
}

/// Pack a slot key and register value into a coupon.
#[inline]
fn pack_coupon(slot: u32, value: u8) -> u32 {
    ((value as u32) << KEY_BITS_26) | (slot & KEY_MASK_26)
}

/// Derive a coupon from the two hash halves.
#[inline]
fn make_coupon(h1: u64, h2: u64) -> u32 {
    let slot = (h1 as u32) & KEY_MASK_26;
    let value = (h2.leading_zeros().min(62) + 1) as u8;
    pack_coupon(slot, value)
}

/// The SET representation promotes to HLL once it holds three quarters of
/// a table of this size.
fn lg_max_set_size(lg_config_k: u8) -> u8 {
    LG_INIT_SET_SIZE.max(lg_config_k.saturating_sub(3))
}

fn set_promotion_threshold(lg_config_k: u8) -> usize {
    (3usize << lg_max_set_size(lg_config_k)) >> 2
}
