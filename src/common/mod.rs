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

//! Utilities shared by all sketch families.

pub mod random;

use crate::error::Error;

/// Number of standard deviations for confidence bounds.
///
/// Higher values give wider intervals with greater coverage: roughly 68%,
/// 95% and 99.7% for one, two and three standard deviations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NumStdDev {
    /// One standard deviation.
    One = 1,
    /// Two standard deviations.
    Two = 2,
    /// Three standard deviations.
    Three = 3,
}

impl NumStdDev {
    /// Returns the numeric value in 1..=3.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for NumStdDev {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(NumStdDev::One),
            2 => Ok(NumStdDev::Two),
            3 => Ok(NumStdDev::Three),
            other => Err(Error::invalid_argument(format!(
                "kappa must be 1, 2 or 3, got {other}"
            ))),
        }
    }
}

/// Table of 2^(-i) for i in 0..=64.
pub(crate) const INVERSE_POWERS_OF_2: [f64; 65] = {
    let mut table = [0.0f64; 65];
    let mut i = 0;
    while i < 65 {
        table[i] = if i < 64 {
            1.0 / (1u64 << i) as f64
        } else {
            1.0 / (1u64 << 63) as f64 / 2.0
        };
        i += 1;
    }
    table
};

/// Returns 2^(-value) for any register value.
#[inline]
pub(crate) fn inv_pow2(value: u8) -> f64 {
    if (value as usize) < INVERSE_POWERS_OF_2.len() {
        INVERSE_POWERS_OF_2[value as usize]
    } else {
        f64::exp2(-(value as f64))
    }
}

/// Canonicalizes a double so that all values that compare equal hash equally.
///
/// Maps -0.0 to +0.0 and every NaN to the single canonical NaN bit pattern.
pub(crate) fn canonical_double(value: f64) -> i64 {
    let canonical = if value == 0.0 {
        0.0
    } else if value.is_nan() {
        f64::NAN
    } else {
        value
    };
    canonical.to_bits() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_std_dev_try_from() {
        assert_eq!(NumStdDev::try_from(2).unwrap(), NumStdDev::Two);
        assert!(NumStdDev::try_from(0).is_err());
        assert!(NumStdDev::try_from(4).is_err());
    }

    #[test]
    fn test_inverse_powers_of_2() {
        assert_eq!(INVERSE_POWERS_OF_2[0], 1.0);
        assert_eq!(INVERSE_POWERS_OF_2[1], 0.5);
        assert_eq!(INVERSE_POWERS_OF_2[10], 1.0 / 1024.0);
        assert_eq!(INVERSE_POWERS_OF_2[64], f64::exp2(-64.0));
        assert_eq!(inv_pow2(70), f64::exp2(-70.0));
    }

    #[test]
    fn test_canonical_double() {
        assert_eq!(canonical_double(0.0), canonical_double(-0.0));
        assert_eq!(canonical_double(f64::NAN), canonical_double(-f64::NAN));
        assert_ne!(canonical_double(1.0), canonical_double(2.0));
    }
}
