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

//! Cardinality estimation for the register representations.
//!
//! While updates arrive in a single stream the HIP (Historical Inverse
//! Probability) accumulator gives the estimate directly. After a merge or
//! a deserialization marked out-of-order, the composite estimator takes
//! over: cubic interpolation over the bias curve of the raw HLL estimate,
//! blended with linear counting at the low end.

use crate::common::inv_pow2;
use crate::common::NumStdDev;
use crate::hll::composite_interpolation;
use crate::hll::cubic_interpolation;
use crate::hll::harmonic_numbers;

/// HIP estimator state carried by every register array.
///
/// The KxQ registers are split for numerical precision: kxq0 collects
/// contributions 2^-v for v < 32, kxq1 the tiny ones for v >= 32.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct HipEstimator {
    hip_accum: f64,
    kxq0: f64,
    kxq1: f64,
    /// When true, HIP is invalid and estimates come from the composite path.
    out_of_order: bool,
}

impl HipEstimator {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u64 << lg_config_k;
        Self {
            hip_accum: 0.0,
            kxq0: k as f64, // all registers start at 0, each contributing 2^0
            kxq1: 0.0,
            out_of_order: false,
        }
    }

    /// Rebuilds the estimator from serialized state.
    pub fn from_parts(hip_accum: f64, kxq0: f64, kxq1: f64, out_of_order: bool) -> Self {
        Self {
            hip_accum,
            kxq0,
            kxq1,
            out_of_order,
        }
    }

    /// Accounts for a register changing from `old_value` to `new_value`.
    ///
    /// The HIP accumulator must be bumped before the KxQ registers change;
    /// the increment uses the probability state of the moment just before
    /// the register was hit.
    pub fn update(&mut self, lg_config_k: u8, old_value: u8, new_value: u8) {
        debug_assert!(new_value > old_value);
        let k = (1u64 << lg_config_k) as f64;

        if !self.out_of_order {
            self.hip_accum += k / (self.kxq0 + self.kxq1);
        }

        if old_value < 32 {
            self.kxq0 -= inv_pow2(old_value);
        } else {
            self.kxq1 -= inv_pow2(old_value);
        }
        if new_value < 32 {
            self.kxq0 += inv_pow2(new_value);
        } else {
            self.kxq1 += inv_pow2(new_value);
        }
    }

    pub fn estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        if self.out_of_order {
            self.composite_estimate(lg_config_k, cur_min, num_at_cur_min)
        } else {
            self.hip_accum
        }
    }

    pub fn lower_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let k = 1u64 << lg_config_k;
        let num_non_zeros = if cur_min == 0 {
            (k - num_at_cur_min as u64) as f64
        } else {
            k as f64
        };
        let estimate = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        let rel_err = relative_error(lg_config_k, false, self.out_of_order, num_std_dev);
        (estimate / (1.0 + rel_err)).max(num_non_zeros)
    }

    pub fn upper_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let estimate = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        let rel_err = relative_error(lg_config_k, true, self.out_of_order, num_std_dev);
        // the upper-bound error is negative, so this inflates the estimate
        estimate / (1.0 + rel_err)
    }

    /// The raw HyperLogLog formula with the small-k correction factor.
    fn raw_estimate(&self, lg_config_k: u8) -> f64 {
        let k = (1u64 << lg_config_k) as f64;
        (composite_interpolation::correction_factor(lg_config_k) * k * k)
            / (self.kxq0 + self.kxq1)
    }

    /// Blends the de-biased raw estimate with linear counting.
    fn composite_estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        let raw_est = self.raw_estimate(lg_config_k);

        let x_arr = composite_interpolation::x_arr(lg_config_k);
        let y_stride = composite_interpolation::y_stride(lg_config_k);
        let last = x_arr.len() - 1;

        if raw_est < x_arr[0] {
            return 0.0;
        }

        let adj_est = if raw_est > x_arr[last] {
            // beyond the table the raw estimate is essentially unbiased;
            // scale linearly from the last point
            let final_y = y_stride * last as f64;
            raw_est * (final_y / x_arr[last])
        } else {
            cubic_interpolation::using_x_arr_and_y_stride(x_arr, y_stride, raw_est)
        };

        // Empirical evidence suggests the threshold 3k keeps the linear
        // counting estimator out of its unstable range for 2^4 <= k <= 2^21.
        let k = 1u64 << lg_config_k;
        if adj_est > (3 * k) as f64 {
            return adj_est;
        }

        let lin_est = self.bitmap_estimate(lg_config_k, cur_min, num_at_cur_min);

        // Comparing the average of the two estimators against the threshold
        // creates less bias than comparing either one alone.
        let avg_est = (adj_est + lin_est) / 2.0;
        let crossover = match lg_config_k {
            4 => 0.718,
            5 => 0.672,
            _ => 0.64,
        };
        if avg_est > crossover * k as f64 {
            adj_est
        } else {
            lin_est
        }
    }

    fn bitmap_estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        let k = 1u64 << lg_config_k;
        let num_unhit = if cur_min == 0 { num_at_cur_min as u64 } else { 0 };

        if num_unhit == 0 {
            return k as f64 * (k as f64 / 0.5).ln();
        }
        harmonic_numbers::bitmap_estimate(k, k - num_unhit)
    }

    pub fn hip_accum(&self) -> f64 {
        self.hip_accum
    }

    pub fn kxq0(&self) -> f64 {
        self.kxq0
    }

    pub fn kxq1(&self) -> f64 {
        self.kxq1
    }

    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    pub fn set_out_of_order(&mut self, flag: bool) {
        self.out_of_order = flag;
    }
}

const HLL_HIP_RSE_FACTOR: f64 = 0.832_554_611_157_697_7; // sqrt(ln 2)
const HLL_NON_HIP_RSE_FACTOR: f64 = 1.038_955_474_848_082_2; // sqrt(3 ln 2 - 1)

/// Relative error of the register estimators.
///
/// Empirically measured quantile tables cover lg_k <= 12; the analytic
/// factors apply beyond. Lower-bound errors are positive, upper-bound
/// errors negative.
fn relative_error(lg_config_k: u8, upper_bound: bool, ooo: bool, num_std_dev: NumStdDev) -> f64 {
    if lg_config_k > 12 {
        let rse_factor = if ooo {
            HLL_NON_HIP_RSE_FACTOR
        } else {
            HLL_HIP_RSE_FACTOR
        };
        let k = (1u64 << lg_config_k) as f64;
        let sign = if upper_bound { -1.0 } else { 1.0 };
        return sign * (num_std_dev.as_u8() as f64) * rse_factor / k.sqrt();
    }

    let idx = ((lg_config_k as usize) - 4) * 3 + ((num_std_dev.as_u8() as usize) - 1);
    match (ooo, upper_bound) {
        (false, false) => HIP_LB[idx],
        (false, true) => HIP_UB[idx],
        (true, false) => NON_HIP_LB[idx],
        (true, true) => NON_HIP_UB[idx],
    }
}

/// HIP (in-order) lower-bound errors for lg_k 4-12, std dev 1-3.
/// Q(.84134), Q(.97725), Q(.99865) quantiles.
const HIP_LB: [f64; 27] = [
    0.207316195,
    0.502865572,
    0.882303765, //4
    0.146981579,
    0.335426881,
    0.557052, //5
    0.104026721,
    0.227683872,
    0.365888317, //6
    0.073614601,
    0.156781585,
    0.245740374, //7
    0.05205248,
    0.108783763,
    0.168030442, //8
    0.036770852,
    0.075727545,
    0.11593785, //9
    0.025990219,
    0.053145536,
    0.080772263, //10
    0.018373987,
    0.037266176,
    0.056271814, //11
    0.012936253,
    0.02613829,
    0.039387631, //12
];

/// HIP (in-order) upper-bound errors for lg_k 4-12, std dev 1-3.
/// Q(.15866), Q(.02275), Q(.00135) quantiles.
const HIP_UB: [f64; 27] = [
    -0.207805347,
    -0.355574279,
    -0.475535095, //4
    -0.146988328,
    -0.262390832,
    -0.360864026, //5
    -0.103877775,
    -0.191503663,
    -0.269311582, //6
    -0.073452978,
    -0.138513438,
    -0.198487447, //7
    -0.051982806,
    -0.099703123,
    -0.144128618, //8
    -0.036768609,
    -0.07138158,
    -0.104430324, //9
    -0.025991325,
    -0.050854296,
    -0.0748143, //10
    -0.01834533,
    -0.036121138,
    -0.05327616, //11
    -0.012920332,
    -0.025572893,
    -0.037896952, //12
];

/// Non-HIP (out-of-order) lower-bound errors for lg_k 4-12, std dev 1-3.
const NON_HIP_LB: [f64; 27] = [
    0.254409839,
    0.682266712,
    1.304022158, //4
    0.181817353,
    0.443389054,
    0.778776219, //5
    0.129432281,
    0.295782195,
    0.49252279, //6
    0.091640655,
    0.201175925,
    0.323664385, //7
    0.064858051,
    0.138523393,
    0.218805328, //8
    0.045851855,
    0.095925072,
    0.148635751, //9
    0.032454144,
    0.067009668,
    0.102660669, //10
    0.022921382,
    0.046868565,
    0.071307398, //11
    0.016155679,
    0.032825719,
    0.049677541, //12
];

/// Non-HIP (out-of-order) upper-bound errors for lg_k 4-12, std dev 1-3.
const NON_HIP_UB: [f64; 27] = [
    -0.256980172,
    -0.411905944,
    -0.52651057, //4
    -0.182332109,
    -0.310275547,
    -0.412660505, //5
    -0.129314228,
    -0.230142294,
    -0.315636197, //6
    -0.091584836,
    -0.16834013,
    -0.236346847, //7
    -0.06487411,
    -0.122045231,
    -0.174112107, //8
    -0.04591465,
    -0.08784505,
    -0.126917615, //9
    -0.032433119,
    -0.062897613,
    -0.091862929, //10
    -0.022960633,
    -0.044875401,
    -0.065736049, //11
    -0.016186662,
    -0.031827816,
    -0.046973459, //12
];

// ---------------------------------------------------------------------------
// Coupon-mode estimation (LIST and SET representations)

const COUPON_RSE_FACTOR: f64 = 0.409; // at the transition point, not the asymptote
const COUPON_RSE: f64 = COUPON_RSE_FACTOR / (1 << 13) as f64;

/// Effective size of the coupon space. Two distinct items collide only if
/// they share the 26-bit key and the geometric value, which happens with
/// probability 2^-26 / 3.
const COUPON_SPACE: f64 = (3u64 << 26) as f64;

/// Estimate from a raw coupon count: inversion of the birthday curve over
/// the coupon space. For the counts a coupon representation can hold the
/// correction over the count itself is tiny.
pub(super) fn coupon_estimate(num_coupons: usize) -> f64 {
    let c = num_coupons as f64;
    -COUPON_SPACE * (-c / COUPON_SPACE).ln_1p()
}

pub(super) fn coupon_lower_bound(num_coupons: usize, num_std_dev: NumStdDev) -> f64 {
    let est = coupon_estimate(num_coupons);
    let bound = est / (1.0 + num_std_dev.as_u8() as f64 * COUPON_RSE);
    bound.max(num_coupons as f64)
}

pub(super) fn coupon_upper_bound(num_coupons: usize, num_std_dev: NumStdDev) -> f64 {
    let est = coupon_estimate(num_coupons);
    let bound = est / (1.0 - num_std_dev.as_u8() as f64 * COUPON_RSE);
    bound.max(num_coupons as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_initialization() {
        let est = HipEstimator::new(10);
        assert_eq!(est.hip_accum(), 0.0);
        assert_eq!(est.kxq0(), 1024.0);
        assert_eq!(est.kxq1(), 0.0);
        assert!(!est.is_out_of_order());
    }

    #[test]
    fn test_kxq_split_across_32() {
        let mut est = HipEstimator::new(8);
        est.update(8, 0, 10);
        assert!(est.kxq0() < 256.0);
        assert_eq!(est.kxq1(), 0.0);

        est.update(8, 10, 50);
        assert!(est.kxq1() > 0.0);
        assert!(est.kxq1() < 0.001);
    }

    #[test]
    fn test_out_of_order_freezes_hip() {
        let mut est = HipEstimator::new(10);
        est.update(10, 0, 5);
        let hip = est.hip_accum();
        assert!(hip > 0.0);

        est.set_out_of_order(true);
        let kxq0_before = est.kxq0();
        est.update(10, 5, 10);
        assert_eq!(est.hip_accum(), hip);
        assert_ne!(est.kxq0(), kxq0_before);
    }

    #[test]
    fn test_bounds_bracket_estimate() {
        let mut est = HipEstimator::new(10);
        let mut num_at_min = 1u32 << 10;
        for slot in 0..500u32 {
            est.update(10, 0, 3 + (slot % 5) as u8);
            num_at_min -= 1;
        }
        for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            let e = est.estimate(10, 0, num_at_min);
            let lb = est.lower_bound(10, 0, num_at_min, kappa);
            let ub = est.upper_bound(10, 0, num_at_min, kappa);
            assert!(lb <= e && e <= ub, "lb={lb} e={e} ub={ub}");
        }
    }

    #[test]
    fn test_relative_error_signs() {
        for lg_k in [4u8, 12, 13, 21] {
            for ooo in [false, true] {
                let lb = relative_error(lg_k, false, ooo, NumStdDev::Two);
                let ub = relative_error(lg_k, true, ooo, NumStdDev::Two);
                assert!(lb > 0.0, "lg_k={lg_k} ooo={ooo}");
                assert!(ub < 0.0, "lg_k={lg_k} ooo={ooo}");
            }
        }
    }

    #[test]
    fn test_coupon_estimate_tracks_count() {
        assert_eq!(coupon_estimate(0), 0.0);
        let est = coupon_estimate(1000);
        assert!(est >= 1000.0);
        assert!(est < 1000.01);
        for kappa in [NumStdDev::One, NumStdDev::Three] {
            assert!(coupon_lower_bound(1000, kappa) <= est);
            assert!(coupon_upper_bound(1000, kappa) >= est);
        }
    }
}
