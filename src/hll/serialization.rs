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

//! HLL wire format.
//!
//! The common 8-byte preamble is followed by a mode-dependent tail. Coupon
//! modes serialize their coupons compactly; HLL mode writes the estimator
//! doubles, the counters, the register bytes and, for width 4, the
//! auxiliary map as packed pairs. The mode byte carries the representation
//! in its low two bits and the register width in the next two.

use std::io::Read;
use std::io::Write;

use crate::codec::Family;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hll::array4::Hll4Array;
use crate::hll::array6::Hll6Array;
use crate::hll::array8::Hll8Array;
use crate::hll::aux_map::AuxMap;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::hash_set::CouponHashSet;
use crate::hll::list::CouponList;
use crate::hll::pack_coupon;
use crate::hll::sketch::CurMode;
use crate::hll::sketch::HllSketch;
use crate::hll::sketch::Representation;
use crate::hll::HllType;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;

const SER_VER: u8 = 1;

const EMPTY_FLAG_MASK: u8 = 1 << 2;
const COMPACT_FLAG_MASK: u8 = 1 << 3;
const OUT_OF_ORDER_FLAG_MASK: u8 = 1 << 4;

const LIST_PREINTS: u8 = 2;
const SET_PREINTS: u8 = 3;
const HLL_PREINTS: u8 = 10;

const LG_INIT_LIST_SIZE: u8 = 3;

fn make_mode_byte(cur_mode: CurMode, tgt_type: HllType) -> u8 {
    (cur_mode as u8) | ((tgt_type as u8) << 2)
}

fn extract_cur_mode(mode_byte: u8) -> Result<CurMode, Error> {
    match mode_byte & 0x3 {
        0 => Ok(CurMode::List),
        1 => Ok(CurMode::Set),
        2 => Ok(CurMode::Hll),
        other => Err(Error::format("unknown sketch mode").with_context("mode", other)),
    }
}

fn extract_tgt_type(mode_byte: u8) -> Result<HllType, Error> {
    match (mode_byte >> 2) & 0x3 {
        0 => Ok(HllType::Hll4),
        1 => Ok(HllType::Hll6),
        2 => Ok(HllType::Hll8),
        other => Err(Error::format("unknown register width").with_context("width", other)),
    }
}

impl HllSketch {
    /// Serializes the sketch in its compact binary form.
    pub fn serialize(&self) -> Vec<u8> {
        match &self.representation {
            Representation::List(list) => self.serialize_list(list),
            Representation::Set(set) => self.serialize_set(set),
            Representation::Hll4(arr) => self.serialize_hll(
                arr.byte_arr(),
                arr.cur_min(),
                arr.num_at_cur_min(),
                arr.estimator(),
                arr.aux(),
            ),
            Representation::Hll6(arr) => {
                self.serialize_hll(arr.byte_arr(), 0, arr.num_at_cur_min(), arr.estimator(), None)
            }
            Representation::Hll8(arr) => {
                self.serialize_hll(arr.byte_arr(), 0, arr.num_at_cur_min(), arr.estimator(), None)
            }
        }
    }

    /// Serializes into a writer, returning the number of bytes written.
    pub fn serialize_into<W: Write>(&self, writer: &mut W) -> Result<usize, Error> {
        let bytes = self.serialize();
        writer
            .write_all(&bytes)
            .map_err(|e| Error::new(ErrorKind::Io, "write failed").set_source(e))?;
        Ok(bytes.len())
    }

    fn preamble(&self, preints: u8, lg_arr: u8, flags: u8, byte6: u8) -> SketchBytes {
        let mut bytes = SketchBytes::with_capacity(64);
        bytes.write_u8(preints);
        bytes.write_u8(SER_VER);
        bytes.write_u8(Family::HLL.id);
        bytes.write_u8(self.lg_config_k);
        bytes.write_u8(lg_arr);
        bytes.write_u8(flags);
        bytes.write_u8(byte6);
        bytes.write_u8(make_mode_byte(self.cur_mode(), self.tgt_type));
        bytes
    }

    fn serialize_list(&self, list: &CouponList) -> Vec<u8> {
        let mut flags = COMPACT_FLAG_MASK;
        if list.is_empty() {
            flags |= EMPTY_FLAG_MASK;
        }
        let mut bytes = self.preamble(LIST_PREINTS, LG_INIT_LIST_SIZE, flags, list.len() as u8);
        for &coupon in list.coupons() {
            bytes.write_u32_le(coupon);
        }
        bytes.into_bytes()
    }

    fn serialize_set(&self, set: &CouponHashSet) -> Vec<u8> {
        let mut bytes = self.preamble(SET_PREINTS, set.lg_size(), COMPACT_FLAG_MASK, 0);
        bytes.write_u32_le(set.count() as u32);
        for coupon in set.iter() {
            bytes.write_u32_le(coupon);
        }
        bytes.into_bytes()
    }

    fn serialize_hll(
        &self,
        byte_arr: &[u8],
        cur_min: u8,
        num_at_cur_min: u32,
        estimator: &HipEstimator,
        aux: Option<&AuxMap>,
    ) -> Vec<u8> {
        let mut flags = COMPACT_FLAG_MASK;
        if estimator.is_out_of_order() {
            flags |= OUT_OF_ORDER_FLAG_MASK;
        }
        let lg_arr = aux.map_or(0, |aux| aux.lg_size());
        let mut bytes = self.preamble(HLL_PREINTS, lg_arr, flags, cur_min);
        bytes.write_f64_le(estimator.hip_accum());
        bytes.write_f64_le(estimator.kxq0());
        bytes.write_f64_le(estimator.kxq1());
        bytes.write_i32_le(num_at_cur_min as i32);
        bytes.write_i32_le(aux.map_or(0, |aux| aux.count() as i32));
        bytes.write(byte_arr);
        if let Some(aux) = aux {
            for (slot, value) in aux.iter() {
                bytes.write_u32_le(pack_coupon(slot, value));
            }
        }
        bytes.into_bytes()
    }

    /// Deserializes a sketch serialized under the default seed.
    pub fn deserialize(bytes: &[u8]) -> Result<HllSketch, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserializes a sketch that will continue under `seed`.
    ///
    /// The HLL image does not embed a seed hash; the caller is responsible
    /// for pairing images with the seed they were built under. Merges
    /// still verify seeds against each other.
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<HllSketch, Error> {
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
        let lg_config_k = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("lg_k"))?;
        // the stored aux lg size is advisory; the aux table is rebuilt
        let _lg_arr = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("lg_arr"))?;
        let flags = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("flags"))?;
        let byte6 = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("cur_min"))?;
        let mode_byte = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("mode_byte"))?;

        Family::HLL.validate_id(family_id)?;
        if serial_version != SER_VER {
            return Err(Error::version(SER_VER, serial_version));
        }
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_config_k}"
            )));
        }
        let cur_mode = extract_cur_mode(mode_byte)?;
        let tgt_type = extract_tgt_type(mode_byte)?;
        let empty = flags & EMPTY_FLAG_MASK != 0;
        let out_of_order = flags & OUT_OF_ORDER_FLAG_MASK != 0;

        let expected_preints = match cur_mode {
            CurMode::List => LIST_PREINTS,
            CurMode::Set => SET_PREINTS,
            CurMode::Hll => HLL_PREINTS,
        };
        if preamble_ints != expected_preints {
            return Err(Error::format("preamble ints do not match the mode")
                .with_context("expected", expected_preints)
                .with_context("actual", preamble_ints));
        }

        let mut sketch = HllSketch::with_seed(lg_config_k, tgt_type, seed)?;
        match cur_mode {
            CurMode::List => {
                let count = byte6 as usize;
                if empty && count != 0 {
                    return Err(Error::format("empty flag with a nonzero coupon count"));
                }
                if count > crate::hll::LIST_CAP {
                    return Err(Error::format("list coupon count exceeds the list capacity")
                        .with_context("count", count));
                }
                let mut coupons = Vec::with_capacity(count);
                for _ in 0..count {
                    let coupon = cursor
                        .read_u32_le()
                        .map_err(|_| Error::insufficient_data("list coupons"))?;
                    if coupon == 0 {
                        return Err(Error::format("zero coupon in list payload"));
                    }
                    coupons.push(coupon);
                }
                sketch.representation = Representation::List(CouponList::from_coupons(coupons));
            }
            CurMode::Set => {
                let count = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("set count"))?;
                let mut set = CouponHashSet::new();
                for _ in 0..count {
                    let coupon = cursor
                        .read_u32_le()
                        .map_err(|_| Error::insufficient_data("set coupons"))?;
                    if coupon == 0 {
                        return Err(Error::format("zero coupon in set payload"));
                    }
                    set.update(coupon);
                }
                if set.count() as u32 != count {
                    return Err(Error::format("duplicate coupons in set payload"));
                }
                sketch.representation = Representation::Set(set);
            }
            CurMode::Hll => {
                let hip_accum = cursor
                    .read_f64_le()
                    .map_err(|_| Error::insufficient_data("hip_accum"))?;
                let kxq0 = cursor
                    .read_f64_le()
                    .map_err(|_| Error::insufficient_data("kxq0"))?;
                let kxq1 = cursor
                    .read_f64_le()
                    .map_err(|_| Error::insufficient_data("kxq1"))?;
                let num_at_cur_min = cursor
                    .read_i32_le()
                    .map_err(|_| Error::insufficient_data("num_at_cur_min"))?;
                let aux_count = cursor
                    .read_i32_le()
                    .map_err(|_| Error::insufficient_data("aux_count"))?;
                if num_at_cur_min < 0 || aux_count < 0 {
                    return Err(Error::format("negative count in HLL image"));
                }
                if aux_count as u64 > 1u64 << lg_config_k {
                    return Err(Error::format("aux count exceeds the slot count")
                        .with_context("aux_count", aux_count));
                }

                let estimator = HipEstimator::from_parts(hip_accum, kxq0, kxq1, out_of_order);
                let byte_len = match tgt_type {
                    HllType::Hll4 => Hll4Array::byte_arr_len(lg_config_k),
                    HllType::Hll6 => Hll6Array::byte_arr_len(lg_config_k),
                    HllType::Hll8 => Hll8Array::byte_arr_len(lg_config_k),
                };
                let mut byte_arr = vec![0u8; byte_len];
                cursor
                    .read_exact(&mut byte_arr)
                    .map_err(|_| Error::insufficient_data("register bytes"))?;

                sketch.representation = match tgt_type {
                    HllType::Hll4 => {
                        let mut aux = None;
                        if aux_count > 0 {
                            let mut map = AuxMap::new();
                            for _ in 0..aux_count {
                                let pair = cursor
                                    .read_u32_le()
                                    .map_err(|_| Error::insufficient_data("aux pairs"))?;
                                let slot = get_slot(pair);
                                if map.get(slot).is_some() {
                                    return Err(Error::format(
                                        "duplicate slot in aux payload",
                                    )
                                    .with_context("slot", slot));
                                }
                                map.insert(slot, get_value(pair));
                            }
                            aux = Some(map);
                        }
                        Representation::Hll4(Hll4Array::from_parts(
                            lg_config_k,
                            byte_arr,
                            byte6,
                            num_at_cur_min as u32,
                            aux,
                            estimator,
                        ))
                    }
                    HllType::Hll6 => {
                        if aux_count != 0 {
                            return Err(Error::format("aux entries on a non-4-bit image"));
                        }
                        Representation::Hll6(Hll6Array::from_parts(
                            lg_config_k,
                            byte_arr,
                            num_at_cur_min as u32,
                            estimator,
                        ))
                    }
                    HllType::Hll8 => {
                        if aux_count != 0 {
                            return Err(Error::format("aux entries on a non-4-bit image"));
                        }
                        Representation::Hll8(Hll8Array::from_parts(
                            lg_config_k,
                            byte_arr,
                            num_at_cur_min as u32,
                            estimator,
                        ))
                    }
                };
            }
        }

        Ok(sketch)
    }

    /// Deserializes a sketch from a reader, consuming exactly one image.
    pub fn deserialize_from<R: Read>(reader: &mut R, seed: u64) -> Result<HllSketch, Error> {
        let mut header = [0u8; 8];
        reader
            .read_exact(&mut header)
            .map_err(|e| Error::insufficient_data("preamble").set_source(e))?;

        let lg_config_k = header[3];
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_config_k}"
            )));
        }
        let cur_mode = extract_cur_mode(header[7])?;
        let tgt_type = extract_tgt_type(header[7])?;

        let mut image = header.to_vec();
        match cur_mode {
            CurMode::List => {
                let count = header[6] as usize;
                read_extend(reader, &mut image, count * 4, "list coupons")?;
            }
            CurMode::Set => {
                read_extend(reader, &mut image, 4, "set count")?;
                let count =
                    u32::from_le_bytes(image[8..12].try_into().unwrap()) as usize;
                read_extend(reader, &mut image, count * 4, "set coupons")?;
            }
            CurMode::Hll => {
                read_extend(reader, &mut image, 32, "estimator data")?;
                let aux_count = i32::from_le_bytes(image[36..40].try_into().unwrap());
                if aux_count > 0 && aux_count as u64 > 1u64 << lg_config_k {
                    return Err(Error::format("aux count exceeds the slot count")
                        .with_context("aux_count", aux_count));
                }
                let byte_len = match tgt_type {
                    HllType::Hll4 => Hll4Array::byte_arr_len(lg_config_k),
                    HllType::Hll6 => Hll6Array::byte_arr_len(lg_config_k),
                    HllType::Hll8 => Hll8Array::byte_arr_len(lg_config_k),
                };
                let aux_bytes = if aux_count > 0 {
                    aux_count as usize * 4
                } else {
                    0
                };
                read_extend(reader, &mut image, byte_len + aux_bytes, "register bytes")?;
            }
        }

        Self::deserialize_with_seed(&image, seed)
    }
}

fn read_extend<R: Read>(
    reader: &mut R,
    image: &mut Vec<u8>,
    additional: usize,
    field: &'static str,
) -> Result<(), Error> {
    let offset = image.len();
    image.resize(offset + additional, 0);
    reader
        .read_exact(&mut image[offset..])
        .map_err(|e| Error::insufficient_data(field).set_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(lg_k: u8, tgt: HllType, n: u64) -> HllSketch {
        let mut sketch = HllSketch::new(lg_k, tgt).unwrap();
        for i in 0..n {
            sketch.update_u64(i);
        }
        sketch
    }

    fn coupon_contents(sketch: &HllSketch) -> std::collections::BTreeSet<u32> {
        match &sketch.representation {
            Representation::List(list) => list.coupons().iter().copied().collect(),
            Representation::Set(set) => set.iter().collect(),
            _ => panic!("coupon_contents requires a coupon mode"),
        }
    }

    fn slot_contents(sketch: &HllSketch) -> Vec<u8> {
        (0..1u32 << sketch.lg_config_k())
            .map(|slot| match &sketch.representation {
                Representation::Hll4(arr) => arr.get(slot),
                Representation::Hll6(arr) => arr.get(slot),
                Representation::Hll8(arr) => arr.get(slot),
                _ => panic!("slot_contents requires HLL mode"),
            })
            .collect()
    }

    fn assert_round_trip(sketch: &HllSketch) {
        use crate::common::NumStdDev;

        let bytes = sketch.serialize();
        let restored = HllSketch::deserialize(&bytes).unwrap();
        assert_eq!(restored.lg_config_k(), sketch.lg_config_k());
        assert_eq!(restored.tgt_type(), sketch.tgt_type());
        assert_eq!(restored.cur_mode(), sketch.cur_mode());
        assert_eq!(restored.is_empty(), sketch.is_empty());
        assert_eq!(restored.is_out_of_order(), sketch.is_out_of_order());
        assert_eq!(restored.estimate(), sketch.estimate());
        for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            assert_eq!(restored.lower_bound(kappa), sketch.lower_bound(kappa));
            assert_eq!(restored.upper_bound(kappa), sketch.upper_bound(kappa));
        }
        // the hash-table layouts may legitimately differ, the contents may not
        match sketch.cur_mode() {
            CurMode::Hll => assert_eq!(slot_contents(&restored), slot_contents(sketch)),
            _ => assert_eq!(coupon_contents(&restored), coupon_contents(sketch)),
        }
    }

    #[test]
    fn test_round_trip_empty() {
        assert_round_trip(&HllSketch::new(10, HllType::Hll4).unwrap());
    }

    #[test]
    fn test_round_trip_all_modes_and_widths() {
        for tgt in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
            for n in [1u64, 5, 100, 40_000] {
                assert_round_trip(&filled(10, tgt, n));
            }
        }
    }

    #[test]
    fn test_bad_family_rejected() {
        let mut bytes = filled(10, HllType::Hll8, 100).serialize();
        bytes[2] = 16;
        let err = HllSketch::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FamilyMismatch);
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut bytes = filled(10, HllType::Hll8, 100).serialize();
        bytes[1] = 9;
        let err = HllSketch::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Version);
    }

    #[test]
    fn test_truncated_image_rejected() {
        let bytes = filled(10, HllType::Hll8, 40_000).serialize();
        let err = HllSketch::deserialize(&bytes[..bytes.len() - 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_reader_framing() {
        // two images back to back on one stream
        let a = filled(9, HllType::Hll4, 30_000);
        let b = filled(9, HllType::Hll6, 7);
        let mut stream = a.serialize();
        stream.extend(b.serialize());
        let mut cursor = std::io::Cursor::new(stream);
        let ra = HllSketch::deserialize_from(&mut cursor, crate::hash::DEFAULT_UPDATE_SEED)
            .unwrap();
        let rb = HllSketch::deserialize_from(&mut cursor, crate::hash::DEFAULT_UPDATE_SEED)
            .unwrap();
        assert_eq!(ra.estimate(), a.estimate());
        assert_eq!(rb.estimate(), b.estimate());
    }
}
