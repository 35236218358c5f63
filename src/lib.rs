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

//! Probabilistic sketches for one-pass summarization of massive multisets.
//!
//! Three sketch families are provided:
//!
//! - [`cpc::CpcSketch`] — Compressed Probabilistic Counting for cardinality.
//!   Best accuracy per serialized byte; compresses to a bit-packed wire form.
//! - [`hll::HllSketch`] — HyperLogLog with 4-, 6- or 8-bit registers and an
//!   auxiliary overflow table for the 4-bit isomorph.
//! - [`kll::KllSketch`] — streaming quantiles over a generic ordered item type.
//!
//! All sketches share the same shape: an update-only aggregator whose state
//! moves through increasingly compact representations, a bounded-error
//! estimate with confidence intervals, a little-endian versioned binary
//! format, and an associative merge.
//!
//! Sketches are single-threaded: each instance assumes exclusive access
//! during `update`, `merge` and serialization. Distinct instances may be
//! used from different threads without coordination.

pub mod cpc;
pub mod error;
pub mod hll;
pub mod kll;

pub mod common;
pub mod hash;

pub(crate) mod codec;
