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

fn filled(lg_k: u8, n: u64) -> CpcSketch {
    let mut sketch = CpcSketch::new(lg_k).unwrap();
    for i in 0..n {
        sketch.update_u64(i);
    }
    sketch
}

fn assert_round_trip(sketch: &CpcSketch) {
    let bytes = sketch.serialize();
    let restored = CpcSketch::deserialize(&bytes).unwrap();

    assert_eq!(restored.lg_k(), sketch.lg_k());
    assert_eq!(restored.num_coupons(), sketch.num_coupons());
    assert_eq!(restored.is_empty(), sketch.is_empty());
    assert_eq!(restored.is_merged(), sketch.is_merged());
    assert_eq!(restored.estimate(), sketch.estimate());
    for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert_eq!(restored.lower_bound(kappa), sketch.lower_bound(kappa));
        assert_eq!(restored.upper_bound(kappa), sketch.upper_bound(kappa));
    }
    assert!(restored.validate(), "bit matrix corrupted by round trip");
    // serialization is canonical: a second trip is bit-identical
    assert_eq!(restored.serialize(), bytes);
}

// walk a single sketch through every density regime, checking the wire
// format at each step
#[test]
fn test_round_trip_across_all_flavors() {
    let lg_k = 8; // K = 256: sparse < 24, hybrid < 128, pinned < 864
    for n in [0u64, 1, 10, 23, 60, 200, 900, 3_000, 50_000] {
        assert_round_trip(&filled(lg_k, n));
    }
}

#[test]
fn test_round_trip_at_extreme_lg_k() {
    assert_round_trip(&filled(4, 10_000));
    assert_round_trip(&filled(18, 1_000));
}

#[test]
fn test_round_trip_of_merged_sketch() {
    let mut sketch = filled(10, 30_000);
    let other = filled(10, 5_000);
    sketch.merge(&other).unwrap();
    assert_round_trip(&sketch);
}

#[test]
fn test_round_trip_with_custom_seed() {
    let seed = 0xD1CE;
    let mut sketch = CpcSketch::with_seed(11, seed).unwrap();
    for i in 0..10_000u64 {
        sketch.update_u64(i);
    }
    let bytes = sketch.serialize();

    let restored = CpcSketch::deserialize_with_seed(&bytes, seed).unwrap();
    assert_eq!(restored.estimate(), sketch.estimate());

    // the default seed does not open this image
    let err = CpcSketch::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleSeed);
}

#[test]
fn test_header_prefix_is_reserved() {
    let sketch = filled(9, 2_000);
    let plain = sketch.serialize();
    let framed = sketch.serialize_with_header(16);
    assert_eq!(framed.len(), plain.len() + 16);
    assert!(framed[..16].iter().all(|&b| b == 0));
    assert_eq!(&framed[16..], &plain[..]);
}

#[test]
fn test_reader_consumes_exactly_one_image() {
    let a = filled(9, 40_000);
    let b = filled(9, 3);
    let mut stream = a.serialize();
    stream.extend(b.serialize());

    let mut cursor = std::io::Cursor::new(stream);
    let seed = approx_sketches::hash::DEFAULT_UPDATE_SEED;
    let ra = CpcSketch::deserialize_from(&mut cursor, seed).unwrap();
    let rb = CpcSketch::deserialize_from(&mut cursor, seed).unwrap();
    assert_eq!(ra.estimate(), a.estimate());
    assert_eq!(rb.estimate(), b.estimate());
}

#[test]
fn test_writer_reports_written_length() {
    let sketch = filled(10, 500);
    let mut buffer = Vec::new();
    let written = sketch.serialize_into(&mut buffer).unwrap();
    assert_eq!(written, buffer.len());
    assert_eq!(buffer, sketch.serialize());
}

#[test]
fn test_family_mismatch_is_rejected() {
    let mut bytes = filled(10, 100).serialize();
    bytes[2] = 7; // HLL family id
    let err = CpcSketch::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FamilyMismatch);
}

#[test]
fn test_unsupported_version_is_rejected() {
    let mut bytes = filled(10, 100).serialize();
    bytes[1] = 2;
    let err = CpcSketch::deserialize(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Version);
}

#[test]
fn test_truncated_image_is_rejected() {
    let bytes = filled(10, 10_000).serialize();
    for cut in [4usize, 9, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            CpcSketch::deserialize(&bytes[..cut]).is_err(),
            "cut at {cut} was accepted"
        );
    }
}

#[test]
fn test_garbage_preamble_is_rejected() {
    let err = CpcSketch::deserialize(&[0xFF; 64]).unwrap_err();
    assert_ne!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_compressed_size_stays_under_the_documented_bound() {
    for lg_k in [4u8, 8, 11] {
        let bound = CpcSketch::max_serialized_bytes(lg_k).unwrap();
        // the bound covers the worst case over the C/K range up to 8.0
        let n = 6u64 << lg_k;
        let actual = filled(lg_k, n).serialize().len();
        assert!(
            actual <= bound,
            "lg_k={lg_k}: serialized {actual} bytes exceeds bound {bound}"
        );
    }
}
