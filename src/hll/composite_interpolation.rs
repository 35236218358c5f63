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

//! The bias-correction curve of the composite estimator.
//!
//! In the low and middle cardinality range the raw HLL estimate is a
//! biased function of the true count. Under the Poisson register model the
//! expected raw estimate at true cardinality y is computable in closed
//! form, so the correction table x_arr[i] = E[raw | y = i * y_stride] is
//! generated here instead of being shipped as literals. Reading the curve
//! backwards through cubic interpolation de-biases an observed raw value.
//!
//! Tables are built once per process on first use and are read-only
//! afterwards, so concurrent readers need no locking.

use std::sync::OnceLock;

use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;

/// Number of interpolation points per lg_k.
pub(super) const X_ARR_LEN: usize = 64;

/// y distance between adjacent interpolation points.
pub(super) fn y_stride(lg_config_k: u8) -> f64 {
    (1u64 << lg_config_k) as f64 / 16.0
}

/// The x values (expected raw estimates) for the given lg_k.
pub(super) fn x_arr(lg_config_k: u8) -> &'static [f64; X_ARR_LEN] {
    static TABLES: OnceLock<Vec<[f64; X_ARR_LEN]>> = OnceLock::new();
    let tables = TABLES.get_or_init(|| {
        (MIN_LG_K..=MAX_LG_K).map(build_x_arr).collect()
    });
    &tables[(lg_config_k - MIN_LG_K) as usize]
}

fn build_x_arr(lg_config_k: u8) -> [f64; X_ARR_LEN] {
    let stride = y_stride(lg_config_k);
    let mut x_arr = [0.0; X_ARR_LEN];
    for (i, x) in x_arr.iter_mut().enumerate() {
        *x = expected_raw_estimate(lg_config_k, stride * i as f64);
    }
    x_arr
}

/// Expected raw HLL estimate for a stream of true cardinality `n`.
///
/// Each register sees Poisson(n/k) items; an item exceeds register value v
/// with probability 2^-v, so P[register <= v] = exp(-lambda * 2^-v). The
/// expected register contribution E[2^-register] follows directly, and the
/// raw estimate is correction * k / E[2^-register].
fn expected_raw_estimate(lg_config_k: u8, n: f64) -> f64 {
    let k = (1u64 << lg_config_k) as f64;
    let lambda = n / k;

    let mut expected_contribution = 0.0;
    let mut cdf_below = 0.0; // P[register <= v - 1], zero at v = 0
    for v in 0..64 {
        let cdf = (-lambda * f64::exp2(-(v as f64))).exp();
        expected_contribution += f64::exp2(-(v as f64)) * (cdf - cdf_below);
        cdf_below = cdf;
    }

    correction_factor(lg_config_k) * k / expected_contribution
}

pub(super) fn correction_factor(lg_config_k: u8) -> f64 {
    let k = (1u64 << lg_config_k) as f64;
    match lg_config_k {
        4 => 0.673,
        5 => 0.697,
        6 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / k),
    }
}
