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

//! Harmonic numbers and the coupon-collector bitmap estimator.

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;
const NUM_EXACT: u64 = 25;

/// The n-th harmonic number H(n) = 1 + 1/2 + ... + 1/n.
///
/// Exact summation for small n, asymptotic expansion beyond.
fn harmonic_number(n: u64) -> f64 {
    if n <= NUM_EXACT {
        let mut sum = 0.0;
        for i in 1..=n {
            sum += 1.0 / i as f64;
        }
        sum
    } else {
        let x = n as f64;
        let inv_sq = 1.0 / (x * x);
        x.ln() + EULER_MASCHERONI + 1.0 / (2.0 * x) - inv_sq / 12.0 + inv_sq * inv_sq / 120.0
    }
}

/// Coupon-collector estimate of how many draws hit `num_bits_set` distinct
/// cells out of a bit vector of `bit_vector_length` cells.
///
/// This is the "linear counting" half of the composite estimator, exact in
/// expectation when the true count is small relative to the vector length.
pub(super) fn bitmap_estimate(bit_vector_length: u64, num_bits_set: u64) -> f64 {
    debug_assert!(num_bits_set <= bit_vector_length);
    (bit_vector_length as f64)
        * (harmonic_number(bit_vector_length) - harmonic_number(bit_vector_length - num_bits_set))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmonic_small_values() {
        assert_eq!(harmonic_number(0), 0.0);
        assert_eq!(harmonic_number(1), 1.0);
        assert!((harmonic_number(2) - 1.5).abs() < 1e-15);
        assert!((harmonic_number(4) - (1.0 + 0.5 + 1.0 / 3.0 + 0.25)).abs() < 1e-15);
    }

    #[test]
    fn test_expansion_is_continuous_at_the_switch() {
        // sum the exact series just past the cutoff and compare
        let mut exact = 0.0;
        for i in 1..=(NUM_EXACT + 1) {
            exact += 1.0 / i as f64;
        }
        let approx = harmonic_number(NUM_EXACT + 1);
        assert!((exact - approx).abs() < 1e-12, "exact={exact} approx={approx}");
    }

    #[test]
    fn test_bitmap_estimate_behaviour() {
        // no bits set, no draws
        assert_eq!(bitmap_estimate(1024, 0), 0.0);
        // a few bits set: the estimate is close to the count itself
        let est = bitmap_estimate(1024, 10);
        assert!(est >= 10.0 && est < 10.1, "est={est}");
        // the estimate always dominates the hit count
        for hits in [100u64, 500, 900, 1023] {
            let est = bitmap_estimate(1024, hits);
            assert!(est >= hits as f64, "hits={hits} est={est}");
        }
    }
}
