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

use approx_sketches::common::NumStdDev;
use approx_sketches::cpc::CpcSketch;
use approx_sketches::error::ErrorKind;
use googletest::assert_that;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;

const RELATIVE_ERROR_FOR_LG_K_11: f64 = 0.02;

#[test]
fn test_empty() {
    let sketch = CpcSketch::new(11).unwrap();
    assert!(sketch.is_empty());
    assert!(!sketch.is_merged());
    assert_eq!(sketch.num_coupons(), 0);
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
    assert!(sketch.validate());
}

#[test]
fn test_invalid_lg_k() {
    let err = CpcSketch::new(27).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_one_value() {
    let mut sketch = CpcSketch::new(11).unwrap();
    sketch.update_u64(1);
    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 1.0);
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
}

#[test]
fn test_hundred_thousand_values() {
    const N: u64 = 100_000;
    const N_F64: f64 = N as f64;

    let mut sketch = CpcSketch::new(11).unwrap();
    for i in 0..N {
        sketch.update_u64(i);
    }
    assert!(!sketch.is_empty());
    assert_that!(
        sketch.estimate(),
        near(N_F64, RELATIVE_ERROR_FOR_LG_K_11 * N_F64)
    );
    assert!(sketch.validate());

    // the same holds after a serialization round trip
    let restored = CpcSketch::deserialize(&sketch.serialize()).unwrap();
    assert_that!(
        restored.estimate(),
        near(N_F64, RELATIVE_ERROR_FOR_LG_K_11 * N_F64)
    );
    assert!(restored.validate());
    assert_eq!(restored.num_coupons(), sketch.num_coupons());
}

#[test]
fn test_bounds_bracket_estimate_at_every_kappa() {
    let mut sketch = CpcSketch::new(10).unwrap();
    for i in 0..25_000u64 {
        sketch.update_u64(i);
    }
    for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert_that!(sketch.estimate(), ge(sketch.lower_bound(kappa)));
        assert_that!(sketch.estimate(), le(sketch.upper_bound(kappa)));
    }
    // wider kappa never narrows the interval
    assert_that!(
        sketch.lower_bound(NumStdDev::Three),
        le(sketch.lower_bound(NumStdDev::One))
    );
    assert_that!(
        sketch.upper_bound(NumStdDev::Three),
        ge(sketch.upper_bound(NumStdDev::One))
    );
}

#[test]
fn test_num_coupons_is_monotone_and_bounded_by_n() {
    let mut sketch = CpcSketch::new(9).unwrap();
    let mut previous = 0;
    for i in 0..10_000u64 {
        sketch.update_u64(i);
        let coupons = sketch.num_coupons();
        assert!(coupons >= previous);
        assert!(coupons as u64 <= i + 1);
        previous = coupons;
    }
}

#[test]
fn test_update_overloads_hash_consistently() {
    let mut by_bytes = CpcSketch::new(10).unwrap();
    let mut by_int = CpcSketch::new(10).unwrap();
    for i in 0..1000u64 {
        by_bytes.update(i.to_le_bytes());
        by_int.update_u64(i);
    }
    assert_eq!(by_bytes.num_coupons(), by_int.num_coupons());
    assert_eq!(by_bytes.estimate(), by_int.estimate());
}

#[test]
fn test_float_canonicalization() {
    let mut sketch = CpcSketch::new(10).unwrap();
    sketch.update_f64(0.0);
    sketch.update_f64(-0.0);
    assert_eq!(sketch.estimate(), 1.0);
    sketch.update_f32(2.5);
    sketch.update_f64(2.5);
    assert_eq!(sketch.estimate(), 2.0);
}

#[test]
fn test_merge_of_disjoint_streams() {
    const HALF: u64 = 50_000;
    let mut left = CpcSketch::new(11).unwrap();
    let mut right = CpcSketch::new(11).unwrap();
    for i in 0..HALF {
        left.update_u64(i);
        right.update_u64(HALF + i);
    }

    left.merge(&right).unwrap();
    assert!(left.is_merged());
    assert!(left.validate());

    let total = (2 * HALF) as f64;
    assert_that!(
        left.estimate(),
        near(total, 2.0 * RELATIVE_ERROR_FOR_LG_K_11 * total)
    );

    // a merged sketch estimates from the coupon count alone, so the
    // estimate survives a round trip (which drops the HIP fields) exactly
    let restored = CpcSketch::deserialize(&left.serialize()).unwrap();
    assert!(restored.is_merged());
    assert_eq!(restored.estimate(), left.estimate());
}

#[test]
fn test_merge_is_commutative_in_estimate() {
    let mut parts = Vec::new();
    for chunk in 0..4u64 {
        let mut sketch = CpcSketch::new(10).unwrap();
        for i in (chunk * 8_000)..((chunk + 2) * 8_000) {
            sketch.update_u64(i);
        }
        parts.push(sketch);
    }

    let mut forward = parts[0].clone();
    for part in &parts[1..] {
        forward.merge(part).unwrap();
    }
    let mut backward = parts[3].clone();
    for part in parts[..3].iter().rev() {
        backward.merge(part).unwrap();
    }

    assert_eq!(forward.num_coupons(), backward.num_coupons());
    assert_eq!(forward.estimate(), backward.estimate());
}

#[test]
fn test_merge_rejects_incompatible_seed() {
    let mut sketch = CpcSketch::new(11).unwrap();
    let mut other = CpcSketch::with_seed(11, 4242).unwrap();
    sketch.update_u64(1);
    other.update_u64(2);
    let err = sketch.merge(&other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleSeed);
    // the receiver is untouched
    assert_eq!(sketch.estimate(), 1.0);
    assert!(!sketch.is_merged());
}

#[test]
fn test_merge_rejects_lg_k_mismatch() {
    let mut sketch = CpcSketch::new(11).unwrap();
    let other = CpcSketch::new(12).unwrap();
    sketch.update_u64(1);
    assert!(sketch.merge(&other).is_err());
    assert_eq!(sketch.estimate(), 1.0);
}
