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

//! CPC wire format.
//!
//! An 8-byte preamble is followed by a variable tail whose layout is fully
//! determined by the flags byte. The HIP pair lands at one of two positions
//! in the field sequence; both keep it 8-byte aligned, and which one applies
//! is dictated by the presence of the table and window sections.

use std::io::Read;
use std::io::Write;

use crate::codec::Family;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::cpc::compression::CompressedState;
use crate::cpc::sketch::CpcSketch;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::hash::DEFAULT_UPDATE_SEED;

pub(super) const SERIAL_VERSION: u8 = 1;

// flags byte bit positions
pub(super) const FLAG_IS_BIG_ENDIAN: u8 = 0; // reserved, always written 0
pub(super) const FLAG_IS_COMPRESSED: u8 = 1;
pub(super) const FLAG_HAS_HIP: u8 = 2;
pub(super) const FLAG_HAS_TABLE: u8 = 3;
pub(super) const FLAG_HAS_WINDOW: u8 = 4;

pub(super) fn make_preamble_ints(
    num_coupons: u32,
    has_hip: bool,
    has_table: bool,
    has_window: bool,
) -> u8 {
    let mut preamble_ints = 2;
    if num_coupons > 0 {
        preamble_ints += 1; // number of coupons
        if has_hip {
            preamble_ints += 4; // kxp and hip_est_accum
        }
        if has_table {
            preamble_ints += 1; // table data length
            // number of values (if there is no window it is the same as
            // number of coupons)
            if has_window {
                preamble_ints += 1;
            }
        }
        if has_window {
            preamble_ints += 1; // window length
        }
    }
    preamble_ints
}

impl CpcSketch {
    /// Serializes the sketch into its compressed binary form.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_with_header(0)
    }

    /// Serializes the sketch, reserving `header_size` zero bytes at the
    /// front for the caller's own framing.
    pub fn serialize_with_header(&self, header_size: usize) -> Vec<u8> {
        let compressed = CompressedState::compress(self);

        let has_hip = !compressed.merge_flag;
        let has_table = !compressed.table_data.is_empty();
        let has_window = !compressed.window_data.is_empty();
        let preamble_ints =
            make_preamble_ints(compressed.num_coupons, has_hip, has_table, has_window);

        let total = header_size
            + (preamble_ints as usize
                + compressed.table_data.len()
                + compressed.window_data.len())
                * 4;
        let mut bytes = SketchBytes::with_capacity(total);
        for _ in 0..header_size {
            bytes.write_u8(0);
        }

        bytes.write_u8(preamble_ints);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::CPC.id);
        bytes.write_u8(compressed.lg_k);
        bytes.write_u8(compressed.first_interesting_column);
        let flags = (1 << FLAG_IS_COMPRESSED)
            | ((has_hip as u8) << FLAG_HAS_HIP)
            | ((has_table as u8) << FLAG_HAS_TABLE)
            | ((has_window as u8) << FLAG_HAS_WINDOW);
        bytes.write_u8(flags);
        bytes.write_u16_le(compute_seed_hash(self.seed));

        if compressed.num_coupons > 0 {
            bytes.write_u32_le(compressed.num_coupons);
            if has_table && has_window {
                bytes.write_u32_le(compressed.table_num_entries);
                // first HIP decision point: the pair is already aligned here
                if has_hip {
                    bytes.write_f64_le(compressed.kxp);
                    bytes.write_f64_le(compressed.hip_est_accum);
                }
            }
            if has_table {
                bytes.write_u32_le(compressed.table_data.len() as u32);
            }
            if has_window {
                bytes.write_u32_le(compressed.window_data.len() as u32);
            }
            // second HIP decision point
            if has_hip && !(has_table && has_window) {
                bytes.write_f64_le(compressed.kxp);
                bytes.write_f64_le(compressed.hip_est_accum);
            }
            for &word in &compressed.window_data {
                bytes.write_u32_le(word);
            }
            for &word in &compressed.table_data {
                bytes.write_u32_le(word);
            }
        }

        debug_assert_eq!(bytes.len(), total);
        bytes.into_bytes()
    }

    /// Serializes into a writer, returning the number of bytes written.
    pub fn serialize_into<W: Write>(&self, writer: &mut W) -> Result<usize, Error> {
        let bytes = self.serialize();
        writer
            .write_all(&bytes)
            .map_err(|e| Error::new(crate::error::ErrorKind::Io, "write failed").set_source(e))?;
        Ok(bytes.len())
    }

    /// Deserializes a sketch serialized under the default seed.
    pub fn deserialize(bytes: &[u8]) -> Result<CpcSketch, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserializes a sketch, verifying it was built under `seed`.
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<CpcSketch, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let preamble_ints = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("preamble_ints"))?;
        let serial_version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        let family_id = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("family_id"))?;
        let lg_k = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("lg_k"))?;
        let first_interesting_column = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("first_interesting_column"))?;
        let flags = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("flags"))?;
        let seed_hash = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("seed_hash"))?;

        Family::CPC.validate_id(family_id)?;
        if serial_version != SERIAL_VERSION {
            return Err(Error::version(SERIAL_VERSION, serial_version));
        }
        if flags & (1 << FLAG_IS_BIG_ENDIAN) != 0 {
            return Err(Error::format("big-endian images are not supported"));
        }
        if flags & (1 << FLAG_IS_COMPRESSED) == 0 {
            return Err(Error::format("only compressed images are supported"));
        }
        let expected_seed_hash = compute_seed_hash(seed);
        if seed_hash != expected_seed_hash {
            return Err(Error::incompatible_seed(expected_seed_hash, seed_hash));
        }

        let has_hip = flags & (1 << FLAG_HAS_HIP) != 0;
        let has_table = flags & (1 << FLAG_HAS_TABLE) != 0;
        let has_window = flags & (1 << FLAG_HAS_WINDOW) != 0;

        let mut compressed = CompressedState {
            lg_k,
            first_interesting_column,
            merge_flag: !has_hip,
            num_coupons: 0,
            kxp: (1u64 << lg_k.min(26)) as f64,
            hip_est_accum: 0.0,
            table_num_entries: 0,
            table_data: Vec::new(),
            window_data: Vec::new(),
        };

        let mut csv_length = 0u32;
        let mut cw_length = 0u32;
        if has_table || has_window {
            compressed.num_coupons = cursor
                .read_u32_le()
                .map_err(|_| Error::insufficient_data("num_coupons"))?;
            if has_table && has_window {
                compressed.table_num_entries = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("num_surprising_values"))?;
                if has_hip {
                    compressed.kxp = cursor
                        .read_f64_le()
                        .map_err(|_| Error::insufficient_data("kxp"))?;
                    compressed.hip_est_accum = cursor
                        .read_f64_le()
                        .map_err(|_| Error::insufficient_data("hip_est_accum"))?;
                }
            }
            if has_table {
                csv_length = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("csv_length"))?;
            }
            if has_window {
                cw_length = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("cw_length"))?;
            }
            if has_hip && !(has_table && has_window) {
                compressed.kxp = cursor
                    .read_f64_le()
                    .map_err(|_| Error::insufficient_data("kxp"))?;
                compressed.hip_est_accum = cursor
                    .read_f64_le()
                    .map_err(|_| Error::insufficient_data("hip_est_accum"))?;
            }
            for _ in 0..cw_length {
                compressed.window_data.push(
                    cursor
                        .read_u32_le()
                        .map_err(|_| Error::insufficient_data("window_data"))?,
                );
            }
            for _ in 0..csv_length {
                compressed.table_data.push(
                    cursor
                        .read_u32_le()
                        .map_err(|_| Error::insufficient_data("table_data"))?,
                );
            }
            if !has_window {
                compressed.table_num_entries = compressed.num_coupons;
            }
        }

        let expected_preamble_ints = make_preamble_ints(
            compressed.num_coupons,
            has_hip,
            has_table,
            has_window,
        );
        if preamble_ints != expected_preamble_ints {
            return Err(Error::format("preamble ints do not match the flags")
                .with_context("expected", expected_preamble_ints)
                .with_context("actual", preamble_ints));
        }

        compressed.uncompress(seed)
    }

    /// Deserializes a sketch from a reader, consuming exactly one image.
    pub fn deserialize_from<R: Read>(reader: &mut R, seed: u64) -> Result<CpcSketch, Error> {
        let mut preamble = [0u8; 8];
        reader
            .read_exact(&mut preamble)
            .map_err(|e| Error::insufficient_data("preamble").set_source(e))?;

        let preamble_ints = preamble[0] as usize;
        if !(2..=10).contains(&preamble_ints) {
            return Err(Error::format("preamble ints out of range")
                .with_context("preamble_ints", preamble_ints));
        }
        let lg_k = preamble[3];
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
            )));
        }

        let mut image = preamble.to_vec();
        image.resize(preamble_ints * 4, 0);
        reader
            .read_exact(&mut image[8..])
            .map_err(|e| Error::insufficient_data("header").set_source(e))?;

        // the payload lengths live in the header at flag-dependent offsets;
        // recover them by walking the field sequence
        let read_u32_at = |image: &[u8], offset: usize| -> Result<u32, Error> {
            image
                .get(offset..offset + 4)
                .map(|bytes| u32::from_le_bytes(bytes.try_into().unwrap()))
                .ok_or_else(|| {
                    Error::format("header too short for its flags")
                        .with_context("offset", offset)
                })
        };

        let flags = image[5];
        let has_hip = flags & (1 << FLAG_HAS_HIP) != 0;
        let has_table = flags & (1 << FLAG_HAS_TABLE) != 0;
        let has_window = flags & (1 << FLAG_HAS_WINDOW) != 0;
        let mut payload_words = 0usize;
        if has_table || has_window {
            let mut offset = 12; // skip preamble and num_coupons
            if has_table && has_window {
                offset += 4; // num_surprising_values
                if has_hip {
                    offset += 16;
                }
            }
            if has_table {
                payload_words += read_u32_at(&image, offset)? as usize;
                offset += 4;
            }
            if has_window {
                payload_words += read_u32_at(&image, offset)? as usize;
            }
        }

        // an honest image never comes close to 5K words of payload
        if payload_words > 5 * (1usize << lg_k) + 64 {
            return Err(Error::format("payload length exceeds any valid sketch")
                .with_context("payload_words", payload_words));
        }

        let header_len = image.len();
        image.resize(header_len + payload_words * 4, 0);
        reader
            .read_exact(&mut image[header_len..])
            .map_err(|e| Error::insufficient_data("payload").set_source(e))?;

        Self::deserialize_with_seed(&image, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_ints_all_shapes() {
        assert_eq!(make_preamble_ints(0, true, false, false), 2);
        // sparse with HIP: 2 + coupons + 4 + csv_length
        assert_eq!(make_preamble_ints(10, true, true, false), 8);
        // merged sliding: 2 + coupons + num_sv + csv + cw
        assert_eq!(make_preamble_ints(10_000, false, true, true), 6);
        // full house
        assert_eq!(make_preamble_ints(10_000, true, true, true), 10);
    }
}
