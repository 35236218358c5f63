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

//! Four-point cubic interpolation over a table whose y values are regularly
//! spaced. Used to read the composite-estimator correction curve.

/// Interpolates y at `x`, where the curve passes through
/// `(x_arr[i], i * y_stride)` for every i.
///
/// `x` must lie within `[x_arr[0], x_arr[last]]` and `x_arr` must be
/// strictly increasing with at least four points.
pub(super) fn using_x_arr_and_y_stride(x_arr: &[f64], y_stride: f64, x: f64) -> f64 {
    let len = x_arr.len();
    debug_assert!(len >= 4);
    debug_assert!(x_arr[0] <= x && x <= x_arr[len - 1]);

    if x == x_arr[len - 1] {
        return y_stride * (len - 1) as f64;
    }

    // index of the interval containing x
    let interval = match x_arr.binary_search_by(|probe| probe.partial_cmp(&x).unwrap()) {
        Ok(exact) => return y_stride * exact as f64,
        Err(insertion) => insertion - 1,
    };

    // four consecutive points bracketing the interval, clamped at the ends
    let offset = interval.saturating_sub(1).min(len - 4);
    interpolate_cubic(x_arr, offset, y_stride, x)
}

fn interpolate_cubic(x_arr: &[f64], offset: usize, y_stride: f64, x: f64) -> f64 {
    let xs = &x_arr[offset..offset + 4];
    let mut result = 0.0;
    for (i, &xi) in xs.iter().enumerate() {
        let yi = y_stride * (offset + i) as f64;
        let mut term = yi;
        for (j, &xj) in xs.iter().enumerate() {
            if i != j {
                term *= (x - xj) / (xi - xj);
            }
        }
        result += term;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_points() {
        let x_arr = [0.0, 1.0, 4.0, 9.0, 16.0, 25.0];
        for (i, &x) in x_arr.iter().enumerate() {
            let y = using_x_arr_and_y_stride(&x_arr, 2.0, x);
            assert!((y - 2.0 * i as f64).abs() < 1e-12, "i={i} y={y}");
        }
    }

    #[test]
    fn test_reproduces_linear_curves_exactly() {
        // four-point Lagrange reproduces any polynomial of degree <= 3;
        // a linear x grid makes the curve linear and easy to check anywhere
        let x_arr: Vec<f64> = (0..10).map(|i| 5.0 + 2.0 * i as f64).collect();
        let y_stride = 3.0;
        for x in [5.0, 5.1, 8.7, 14.25, 22.999] {
            let y = using_x_arr_and_y_stride(&x_arr, y_stride, x);
            let expected = 3.0 * (x - 5.0) / 2.0;
            assert!((y - expected).abs() < 1e-10, "x={x} y={y}");
        }
    }

    #[test]
    fn test_monotone_between_points() {
        let x_arr: Vec<f64> = (0..16).map(|i| (i as f64).exp()).collect();
        let mut prev = 0.0;
        let mut x = x_arr[0];
        while x < x_arr[15] {
            let y = using_x_arr_and_y_stride(&x_arr, 10.0, x);
            assert!(y >= prev - 1e-9, "x={x} y={y} prev={prev}");
            prev = y;
            x *= 1.07;
        }
    }
}
