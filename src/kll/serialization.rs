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

//! Binary serialization format constants for KLL sketches.
//!
//! Empty and single-item sketches use a short 8-byte form; everything else
//! carries the full preamble, the per-level end offsets, the exact min and
//! max items, and the retained items in level order.

/// Serialization version for empty or full sketches.
pub const SERIAL_VERSION_1: u8 = 1;
/// Serialization version for single-item sketches.
pub const SERIAL_VERSION_2: u8 = 2;

/// Preamble ints for empty and single-item sketches.
pub const PREAMBLE_INTS_SHORT: u8 = 2;
/// Preamble ints for sketches with more than one item.
pub const PREAMBLE_INTS_FULL: u8 = 5;

/// Flag indicating the sketch is empty.
pub const FLAG_EMPTY: u8 = 1 << 0;
/// Flag indicating level zero is sorted.
pub const FLAG_LEVEL_ZERO_SORTED: u8 = 1 << 1;
/// Flag indicating the sketch holds a single item.
pub const FLAG_SINGLE_ITEM: u8 = 1 << 2;

/// Serialized size for an empty sketch in bytes.
pub const EMPTY_SIZE_BYTES: usize = 8;
/// Data offset for single-item sketches.
pub const DATA_START_SINGLE_ITEM: usize = 8;
/// Data offset for sketches with more than one item.
pub const DATA_START: usize = 20;
