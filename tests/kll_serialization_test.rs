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

use approx_sketches::error::ErrorKind;
use approx_sketches::kll::KllItem;
use approx_sketches::kll::KllSketch;

fn assert_round_trip<T: KllItem + std::fmt::Debug + PartialEq>(sketch: &KllSketch<T>) {
    let bytes = sketch.serialize();
    let restored = KllSketch::<T>::deserialize(&bytes).unwrap();
    assert_eq!(&restored, sketch);
    // the format is canonical: a second trip is bit-identical
    assert_eq!(restored.serialize(), bytes);
}

#[test]
fn test_round_trip_empty() {
    let sketch = KllSketch::<f64>::new(200).unwrap();
    assert_eq!(sketch.serialize().len(), 8);
    assert_round_trip(&sketch);
}

#[test]
fn test_round_trip_single_item() {
    let mut sketch = KllSketch::<f64>::new(200).unwrap();
    sketch.update(42.0);
    assert_eq!(sketch.serialize().len(), 16);
    assert_round_trip(&sketch);
}

#[test]
fn test_round_trip_exact_and_estimation_mode() {
    for n in [2u64, 100, 199, 200, 5_000, 250_000] {
        let mut sketch = KllSketch::<f32>::new(200).unwrap();
        for i in 0..n {
            sketch.update(i as f32);
        }
        assert_round_trip(&sketch);
    }
}

#[test]
fn test_round_trip_preserves_queries() {
    let mut sketch = KllSketch::<i64>::new(160).unwrap();
    for i in 0..100_000 {
        sketch.update(i);
    }
    let restored = KllSketch::<i64>::deserialize(&sketch.serialize()).unwrap();

    assert_eq!(restored.n(), sketch.n());
    assert_eq!(restored.min_item(), sketch.min_item());
    assert_eq!(restored.max_item(), sketch.max_item());
    assert_eq!(restored.num_retained(), sketch.num_retained());
    for f in [0.0, 0.01, 0.25, 0.5, 0.75, 0.99, 1.0] {
        assert_eq!(
            restored.quantile(f, true).unwrap(),
            sketch.quantile(f, true).unwrap(),
            "fraction {f}"
        );
    }
    for probe in [0i64, 1, 50_000, 99_999] {
        assert_eq!(restored.rank(&probe, false), sketch.rank(&probe, false));
    }
}

#[test]
fn test_round_trip_merged_sketch() {
    let mut sketch = KllSketch::<f64>::new(200).unwrap();
    let mut other = KllSketch::<f64>::new(100).unwrap();
    for i in 0..50_000 {
        sketch.update(i as f64);
        other.update((50_000 + i) as f64);
    }
    sketch.merge(&other);
    let restored = KllSketch::<f64>::deserialize(&sketch.serialize()).unwrap();
    assert_eq!(restored.min_k(), 100);
    assert_eq!(&restored, &sketch);
}

#[test]
fn test_serialize_into_writer() {
    let mut sketch = KllSketch::<f64>::new(200).unwrap();
    for i in 0..1_000 {
        sketch.update(i as f64);
    }
    let mut buffer = Vec::new();
    let written = sketch.serialize_into(&mut buffer).unwrap();
    assert_eq!(written, buffer.len());
    assert_eq!(buffer, sketch.serialize());
}

#[test]
fn test_family_mismatch_is_rejected() {
    let mut sketch = KllSketch::<f64>::new(200).unwrap();
    sketch.update(1.0);
    let mut bytes = sketch.serialize();
    bytes[2] = 7; // HLL family id
    let err = KllSketch::<f64>::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FamilyMismatch);
}

#[test]
fn test_unsupported_version_is_rejected() {
    let mut sketch = KllSketch::<f64>::new(200).unwrap();
    sketch.update(1.0);
    let mut bytes = sketch.serialize();
    bytes[1] = 99;
    let err = KllSketch::<f64>::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Version);
}

#[test]
fn test_truncated_image_is_rejected() {
    let mut sketch = KllSketch::<f64>::new(200).unwrap();
    for i in 0..10_000 {
        sketch.update(i as f64);
    }
    let bytes = sketch.serialize();
    for cut in [3usize, 12, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            KllSketch::<f64>::deserialize(&bytes[..cut]).is_err(),
            "cut at {cut} was accepted"
        );
    }
}
