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

//! Union of HLL sketches.
//!
//! The union keeps an internal width-8 gadget at `lg_max_k`. Incoming
//! sketches of any representation and width merge into it; sketches of a
//! smaller lg_k fold the gadget down first. The result is extracted at any
//! requested register width.

use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hll::HllSketch;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;

/// An accumulator for the union of HLL sketches.
pub struct HllUnion {
    gadget: HllSketch,
}

impl HllUnion {
    /// Creates a union able to hold sketches up to `lg_max_k`, under the
    /// default seed.
    pub fn new(lg_max_k: u8) -> Result<Self, Error> {
        Self::with_seed(lg_max_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a union able to hold sketches up to `lg_max_k`.
    pub fn with_seed(lg_max_k: u8, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_max_k) {
            return Err(Error::invalid_argument(format!(
                "lg_max_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_max_k}"
            )));
        }
        Ok(Self {
            gadget: HllSketch::with_seed(lg_max_k, HllType::Hll8, seed)?,
        })
    }

    /// Returns the current effective lg_k of the union.
    pub fn lg_config_k(&self) -> u8 {
        self.gadget.lg_config_k()
    }

    /// Returns true if nothing has been fed into the union.
    pub fn is_empty(&self) -> bool {
        self.gadget.is_empty()
    }

    /// Folds a sketch into the union.
    pub fn update(&mut self, sketch: &HllSketch) -> Result<(), Error> {
        self.gadget.merge(sketch)
    }

    /// Feeds a single raw value into the union, like updating a sketch.
    pub fn update_value(&mut self, datum: impl AsRef<[u8]>) {
        self.gadget.update(datum);
    }

    /// Returns the accumulated union re-encoded at the requested width.
    pub fn result(&self, tgt_type: HllType) -> HllSketch {
        self.gadget.copy_as(tgt_type)
    }

    /// Returns the current estimate of the union.
    pub fn estimate(&self) -> f64 {
        self.gadget.estimate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(lg_k: u8, tgt: HllType, range: std::ops::Range<u64>) -> HllSketch {
        let mut sketch = HllSketch::new(lg_k, tgt).unwrap();
        for i in range {
            sketch.update_u64(i);
        }
        sketch
    }

    #[test]
    fn test_union_of_mixed_widths() {
        let mut union = HllUnion::new(11).unwrap();
        union.update(&filled(11, HllType::Hll4, 0..10_000)).unwrap();
        union.update(&filled(11, HllType::Hll6, 5_000..15_000)).unwrap();
        union.update(&filled(11, HllType::Hll8, 10_000..20_000)).unwrap();
        let result = union.result(HllType::Hll8);
        let estimate = result.estimate();
        assert!(
            (estimate - 20_000.0).abs() / 20_000.0 < 0.05,
            "estimate={estimate}"
        );
    }

    #[test]
    fn test_union_folds_down_to_smallest_peer() {
        let mut union = HllUnion::new(14).unwrap();
        union.update(&filled(14, HllType::Hll8, 0..1_000)).unwrap();
        union.update(&filled(10, HllType::Hll8, 500..1_500)).unwrap();
        assert_eq!(union.lg_config_k(), 10);
        let estimate = union.estimate();
        assert!(
            (estimate - 1_500.0).abs() / 1_500.0 < 0.15,
            "estimate={estimate}"
        );
    }

    #[test]
    fn test_union_of_empty_inputs_is_empty() {
        let mut union = HllUnion::new(10).unwrap();
        union
            .update(&HllSketch::new(10, HllType::Hll4).unwrap())
            .unwrap();
        assert!(union.is_empty());
        assert_eq!(union.result(HllType::Hll4).estimate(), 0.0);
    }
}
