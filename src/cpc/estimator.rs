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

//! The ICON estimator: cardinality from a coupon count alone.
//!
//! Under the Poisson model, a stream of n distinct values fills the coupon
//! matrix of a CPC sketch to an expected count of
//!
//! ```text
//! E[C](n) = K * sum_{j=0}^{63} (1 - exp(-(n/K) * 2^-(j+1)))
//! ```
//!
//! The ICON estimate inverts this curve at the observed count. The curve is
//! strictly increasing, so the inversion is a plain bisection; it needs no
//! fitted coefficients and is exact for the model above. Unlike HIP it
//! remains valid after merging, because it depends only on the final count.

/// Expected coupon count for a true cardinality of `n`.
fn expected_coupons(lg_k: u8, n: f64) -> f64 {
    let k = (1u64 << lg_k) as f64;
    let lambda = n / k;
    let mut sum = 0.0;
    for col in 0..64 {
        let rate = lambda * f64::exp2(-((col + 1) as f64));
        sum += -f64::exp_m1(-rate); // 1 - exp(-rate), accurate for tiny rates
    }
    k * sum
}

/// Returns the ICON estimate of the cardinality given the coupon count.
pub(super) fn icon_estimate(lg_k: u8, num_coupons: u32) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    if num_coupons == 1 {
        return 1.0;
    }

    let c = num_coupons as f64;

    // A coupon needs a distinct item, so the cardinality is at least C.
    let mut lo = c;
    let mut hi = c;
    while expected_coupons(lg_k, hi) < c {
        hi *= 2.0;
        if hi > 1e18 {
            return hi; // matrix is essentially full
        }
    }

    for _ in 0..80 {
        let mid = 0.5 * (lo + hi);
        if expected_coupons(lg_k, mid) < c {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= f64::EPSILON * hi {
            break;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_coupons_is_increasing() {
        let mut prev = 0.0;
        for n in [1.0, 10.0, 100.0, 1000.0, 10_000.0, 100_000.0] {
            let c = expected_coupons(11, n);
            assert!(c > prev);
            prev = c;
        }
    }

    #[test]
    fn test_low_counts_are_nearly_exact() {
        // far below K the sketch is a dedup table and the estimate tracks C
        for c in [2u32, 10, 50, 100] {
            let est = icon_estimate(11, c);
            let c = c as f64;
            assert!(est >= c, "estimate {est} below count {c}");
            assert!(est < c * 1.05, "estimate {est} too far above count {c}");
        }
    }

    #[test]
    fn test_inversion_round_trip() {
        for lg_k in [4u8, 11, 16] {
            let k = (1u64 << lg_k) as f64;
            // rounding the expected count to an integer perturbs the
            // inversion by about ln(2)/K in relative terms
            let tolerance = std::f64::consts::LN_2 / k + 0.001;
            for n in [100.0, 5_000.0, 250_000.0] {
                let c = expected_coupons(lg_k, n);
                let est = icon_estimate(lg_k, c.round() as u32);
                let rel = (est - n).abs() / n;
                assert!(
                    rel < tolerance,
                    "lg_k={lg_k} n={n} est={est} rel={rel} tolerance={tolerance}"
                );
            }
        }
    }
}
