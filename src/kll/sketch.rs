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

use std::cmp::Ordering;

use super::helper::compute_total_capacity;
use super::helper::level_capacity;
use super::helper::random_bit;
use super::helper::sum_the_sample_weights;
use super::serialization::DATA_START;
use super::serialization::DATA_START_SINGLE_ITEM;
use super::serialization::EMPTY_SIZE_BYTES;
use super::serialization::FLAG_EMPTY;
use super::serialization::FLAG_LEVEL_ZERO_SORTED;
use super::serialization::FLAG_SINGLE_ITEM;
use super::serialization::PREAMBLE_INTS_FULL;
use super::serialization::PREAMBLE_INTS_SHORT;
use super::serialization::SERIAL_VERSION_1;
use super::serialization::SERIAL_VERSION_2;
use super::sorted_view::build_sorted_view;
use super::DEFAULT_K;
use super::DEFAULT_M;
use super::MAX_K;
use super::MIN_K;
use crate::codec::Family;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;

/// Trait implemented by item types supported by [`KllSketch`].
///
/// An implementation supplies a strict weak ordering plus the read and
/// write hooks the binary format needs. Implementations for `f32`, `f64`,
/// `i32`, `i64` and `String` ship with the crate.
pub trait KllItem: Clone {
    /// Compare two items.
    fn cmp(a: &Self, b: &Self) -> Ordering;

    /// Returns true if the item is NaN.
    fn is_nan(_value: &Self) -> bool {
        false
    }

    /// Serialized size of one item in bytes.
    fn serialized_size(value: &Self) -> usize;

    /// Appends the serialized item to the buffer.
    fn write_item(value: &Self, out: &mut Vec<u8>);

    /// Reads one item from the front of `input`, advancing the slice.
    fn read_item(input: &mut &[u8]) -> Result<Self, Error>
    where
        Self: Sized;
}

/// KLL sketch for estimating quantiles and ranks.
///
/// See the [kll module level documentation](crate::kll) for more.
#[derive(Debug, Clone, PartialEq)]
pub struct KllSketch<T: KllItem> {
    k: u16,
    m: u8,
    /// The smallest k this sketch was merged with; drives the error bound.
    min_k: u16,
    n: u64,
    is_level_zero_sorted: bool,
    levels: Vec<Vec<T>>,
    min_item: Option<T>,
    max_item: Option<T>,
}

impl<T: KllItem> Default for KllSketch<T> {
    fn default() -> Self {
        Self::new(DEFAULT_K).expect("the default k is always valid")
    }
}

impl<T: KllItem> KllSketch<T> {
    /// Creates a new sketch with the given value of k.
    ///
    /// # Examples
    ///
    /// ```
    /// # use approx_sketches::kll::KllSketch;
    /// let sketch = KllSketch::<f64>::new(200).unwrap();
    /// assert_eq!(sketch.k(), 200);
    /// ```
    pub fn new(k: u16) -> Result<Self, Error> {
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(Error::invalid_argument(format!(
                "k must be in [{MIN_K}, {MAX_K}], got {k}"
            )));
        }
        Ok(Self::make(k, k, 0, vec![Vec::new()], None, None, false))
    }

    /// Returns parameter k used to configure this sketch.
    pub fn k(&self) -> u16 {
        self.k
    }

    /// Returns the minimum k this sketch was merged with.
    pub fn min_k(&self) -> u16 {
        self.min_k
    }

    /// Returns total weight of the stream.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Returns true if the sketch has not seen any data.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Returns the number of retained items.
    pub fn num_retained(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    /// Returns true once answers are approximate rather than exact.
    pub fn is_estimation_mode(&self) -> bool {
        self.levels.len() > 1
    }

    /// Returns the minimum item seen by the sketch.
    pub fn min_item(&self) -> Option<&T> {
        self.min_item.as_ref()
    }

    /// Returns the maximum item seen by the sketch.
    pub fn max_item(&self) -> Option<&T> {
        self.max_item.as_ref()
    }

    /// Updates the sketch with a new item.
    ///
    /// NaN values are ignored for floating-point types.
    pub fn update(&mut self, item: T) {
        if T::is_nan(&item) {
            return;
        }
        self.update_min_max(&item);
        self.internal_update(item);
    }

    /// Merges another sketch into this one.
    pub fn merge(&mut self, other: &KllSketch<T>) {
        if other.is_empty() {
            return;
        }

        self.update_min_max_from_other(other);

        let final_n = self.n + other.n;
        for item in &other.levels[0] {
            self.internal_update(item.clone());
        }

        if other.levels.len() >= 2 {
            self.merge_higher_levels(other);
        }

        self.n = final_n;
        if other.is_estimation_mode() {
            self.min_k = self.min_k.min(other.min_k);
        }

        debug_assert_eq!(self.total_weight(), self.n, "total weight does not match n");
    }

    /// Returns the normalized rank of the given item, or None on an empty
    /// sketch.
    pub fn rank(&self, item: &T, inclusive: bool) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let view = build_sorted_view(&self.levels);
        Some(view.rank(item, inclusive))
    }

    /// Returns the quantile for the given normalized rank in [0, 1], or
    /// None on an empty sketch.
    ///
    /// Rank 0 always returns the exact minimum and rank 1 the exact
    /// maximum, even when compaction has dropped them from the samples.
    pub fn quantile(&self, rank: f64, inclusive: bool) -> Result<Option<T>, Error> {
        check_rank(rank)?;
        if self.is_empty() {
            return Ok(None);
        }
        if rank == 0.0 {
            return Ok(self.min_item.clone());
        }
        if rank == 1.0 {
            return Ok(self.max_item.clone());
        }
        let view = build_sorted_view(&self.levels);
        Ok(Some(view.quantile(rank, inclusive)))
    }

    /// Returns quantiles for several normalized ranks at once, sharing one
    /// sorted view across all of them.
    pub fn quantiles(&self, ranks: &[f64], inclusive: bool) -> Result<Option<Vec<T>>, Error> {
        for &rank in ranks {
            check_rank(rank)?;
        }
        if self.is_empty() {
            return Ok(None);
        }
        let view = build_sorted_view(&self.levels);
        Ok(Some(
            ranks
                .iter()
                .map(|&rank| {
                    if rank == 0.0 {
                        self.min_item.clone().expect("non-empty sketch has a min")
                    } else if rank == 1.0 {
                        self.max_item.clone().expect("non-empty sketch has a max")
                    } else {
                        view.quantile(rank, inclusive)
                    }
                })
                .collect(),
        ))
    }

    /// Returns the approximate CDF at the given split points; the result
    /// has one more entry than the input and ends with 1.0.
    pub fn cdf(&self, split_points: &[T], inclusive: bool) -> Result<Option<Vec<f64>>, Error> {
        if self.is_empty() {
            // still reject malformed inputs on an empty sketch
            let view = build_sorted_view(&self.levels);
            view.cdf(split_points, inclusive)?;
            return Ok(None);
        }
        let view = build_sorted_view(&self.levels);
        view.cdf(split_points, inclusive).map(Some)
    }

    /// Returns the approximate PMF between the given split points.
    pub fn pmf(&self, split_points: &[T], inclusive: bool) -> Result<Option<Vec<f64>>, Error> {
        if self.is_empty() {
            let view = build_sorted_view(&self.levels);
            view.pmf(split_points, inclusive)?;
            return Ok(None);
        }
        let view = build_sorted_view(&self.levels);
        view.pmf(split_points, inclusive).map(Some)
    }

    /// Returns normalized rank error for this sketch. If `pmf` is true,
    /// returns the error for the "double-sided" PMF queries; otherwise for
    /// the single-sided rank and quantile queries.
    pub fn normalized_rank_error(&self, pmf: bool) -> f64 {
        normalized_rank_error(self.min_k, pmf)
    }

    /// Serializes the sketch to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let size = self.serialized_size();
        let mut bytes = SketchBytes::with_capacity(size);

        let is_empty = self.is_empty();
        let is_single_item = self.n == 1;

        let preamble_ints = if is_empty || is_single_item {
            PREAMBLE_INTS_SHORT
        } else {
            PREAMBLE_INTS_FULL
        };
        let serial_version = if is_single_item {
            SERIAL_VERSION_2
        } else {
            SERIAL_VERSION_1
        };

        let flags = (if is_empty { FLAG_EMPTY } else { 0 })
            | (if self.is_level_zero_sorted {
                FLAG_LEVEL_ZERO_SORTED
            } else {
                0
            })
            | (if is_single_item { FLAG_SINGLE_ITEM } else { 0 });

        bytes.write_u8(preamble_ints);
        bytes.write_u8(serial_version);
        bytes.write_u8(Family::KLL.id);
        bytes.write_u8(flags);
        bytes.write_u16_le(self.k);
        bytes.write_u8(self.m);
        bytes.write_u8(0);

        if is_empty {
            return bytes.into_bytes();
        }

        if !is_single_item {
            bytes.write_u64_le(self.n);
            bytes.write_u16_le(self.min_k);
            bytes.write_u8(self.levels.len() as u8);
            bytes.write_u8(0);

            let level_offsets = self.level_offsets();
            for offset in level_offsets.iter().take(self.levels.len()) {
                bytes.write_u32_le(*offset);
            }
        }

        let mut out = bytes.into_bytes();
        if !is_single_item {
            if let Some(min_item) = &self.min_item {
                T::write_item(min_item, &mut out);
            }
            if let Some(max_item) = &self.max_item {
                T::write_item(max_item, &mut out);
            }
        }
        for level in &self.levels {
            for item in level {
                T::write_item(item, &mut out);
            }
        }
        out
    }

    /// Serializes into a writer, returning the number of bytes written.
    pub fn serialize_into<W: std::io::Write>(&self, writer: &mut W) -> Result<usize, Error> {
        let bytes = self.serialize();
        writer
            .write_all(&bytes)
            .map_err(|e| Error::new(crate::error::ErrorKind::Io, "write failed").set_source(e))?;
        Ok(bytes.len())
    }

    /// Deserializes a sketch from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<KllSketch<T>, Error> {
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
        let flags = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("flags"))?;
        let k = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("k"))?;
        let m = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("m"))?;
        let _unused = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("unused"))?;

        Family::KLL.validate_id(family_id)?;
        if m != DEFAULT_M {
            return Err(Error::format(format!(
                "invalid m: expected {DEFAULT_M}, got {m}"
            )));
        }
        if serial_version != SERIAL_VERSION_1 && serial_version != SERIAL_VERSION_2 {
            return Err(Error::version(SERIAL_VERSION_1, serial_version));
        }

        let is_empty = (flags & FLAG_EMPTY) != 0;
        let is_single_item = (flags & FLAG_SINGLE_ITEM) != 0;
        let is_level_zero_sorted = (flags & FLAG_LEVEL_ZERO_SORTED) != 0;
        if is_empty || is_single_item {
            if preamble_ints != PREAMBLE_INTS_SHORT {
                return Err(Error::format(format!(
                    "invalid preamble ints: expected {PREAMBLE_INTS_SHORT}, got {preamble_ints}"
                )));
            }
        } else if preamble_ints != PREAMBLE_INTS_FULL {
            return Err(Error::format(format!(
                "invalid preamble ints: expected {PREAMBLE_INTS_FULL}, got {preamble_ints}"
            )));
        }

        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(Error::format(format!("k out of range: {k}")));
        }

        if is_empty {
            return Ok(Self::make(
                k,
                k,
                0,
                vec![Vec::new()],
                None,
                None,
                is_level_zero_sorted,
            ));
        }

        let (n, min_k, num_levels) = if is_single_item {
            (1u64, k, 1usize)
        } else {
            let n = cursor
                .read_u64_le()
                .map_err(|_| Error::insufficient_data("n"))?;
            let min_k = cursor
                .read_u16_le()
                .map_err(|_| Error::insufficient_data("min_k"))?;
            let num_levels = cursor
                .read_u8()
                .map_err(|_| Error::insufficient_data("num_levels"))?;
            let _unused = cursor
                .read_u8()
                .map_err(|_| Error::insufficient_data("unused2"))?;
            (n, min_k, num_levels as usize)
        };

        if num_levels == 0 {
            return Err(Error::format("num_levels must be > 0"));
        }
        if num_levels > 61 {
            return Err(Error::format(format!(
                "num_levels out of range: {num_levels}"
            )));
        }
        if min_k < MIN_K || min_k > k {
            return Err(Error::format(format!(
                "min_k must be in [{MIN_K}, {k}], got {min_k}"
            )));
        }

        let capacity = compute_total_capacity(k, m, num_levels);
        let mut level_offsets = Vec::with_capacity(num_levels + 1);
        if !is_single_item {
            for _ in 0..num_levels {
                let offset = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("levels"))?;
                level_offsets.push(offset);
            }
        } else {
            level_offsets.push(capacity - 1);
        }
        level_offsets.push(capacity);

        if level_offsets[0] > capacity {
            return Err(Error::format("levels[0] exceeds capacity"));
        }
        for window in level_offsets.windows(2) {
            if window[1] < window[0] {
                return Err(Error::format("levels array must be non-decreasing"));
            }
        }

        let mut items = cursor.remaining();
        let (min_item, max_item) = if is_single_item {
            (None, None)
        } else {
            (
                Some(T::read_item(&mut items)?),
                Some(T::read_item(&mut items)?),
            )
        };

        let mut levels = Vec::with_capacity(num_levels);
        for level in 0..num_levels {
            let size = (level_offsets[level + 1] - level_offsets[level]) as usize;
            let mut level_items = Vec::with_capacity(size);
            for _ in 0..size {
                level_items.push(T::read_item(&mut items)?);
            }
            levels.push(level_items);
        }

        let mut sketch = Self::make(
            k,
            min_k,
            n,
            levels,
            min_item,
            max_item,
            is_level_zero_sorted,
        );

        if is_single_item {
            if let Some(item) = sketch.levels[0].first().cloned() {
                sketch.min_item = Some(item.clone());
                sketch.max_item = Some(item);
            }
        }

        if sketch.total_weight() != sketch.n {
            return Err(Error::format("retained weight does not match n"));
        }

        Ok(sketch)
    }

    fn make(
        k: u16,
        min_k: u16,
        n: u64,
        levels: Vec<Vec<T>>,
        min_item: Option<T>,
        max_item: Option<T>,
        is_level_zero_sorted: bool,
    ) -> Self {
        Self {
            k,
            m: DEFAULT_M,
            min_k,
            n,
            is_level_zero_sorted,
            levels,
            min_item,
            max_item,
        }
    }

    fn capacity(&self) -> usize {
        compute_total_capacity(self.k, self.m, self.levels.len()) as usize
    }

    fn level_offsets(&self) -> Vec<u32> {
        let capacity = self.capacity() as u32;
        let retained = self.num_retained() as u32;
        debug_assert!(capacity >= retained, "capacity must be >= retained");

        let mut offsets = Vec::with_capacity(self.levels.len() + 1);
        let mut offset = capacity - retained;
        offsets.push(offset);
        for level in &self.levels {
            offset += level.len() as u32;
            offsets.push(offset);
        }
        offsets
    }

    fn serialized_size(&self) -> usize {
        if self.is_empty() {
            return EMPTY_SIZE_BYTES;
        }
        if self.n == 1 {
            let item = &self.levels[0][0];
            return DATA_START_SINGLE_ITEM + T::serialized_size(item);
        }

        let mut size = DATA_START + self.levels.len() * 4;
        if let Some(min_item) = &self.min_item {
            size += T::serialized_size(min_item);
        }
        if let Some(max_item) = &self.max_item {
            size += T::serialized_size(max_item);
        }
        for level in &self.levels {
            for item in level {
                size += T::serialized_size(item);
            }
        }
        size
    }

    fn update_min_max(&mut self, item: &T) {
        match self.min_item.as_ref() {
            None => {
                self.min_item = Some(item.clone());
                self.max_item = Some(item.clone());
            }
            Some(min) => {
                if T::cmp(item, min) == Ordering::Less {
                    self.min_item = Some(item.clone());
                }
                if let Some(max) = &self.max_item {
                    if T::cmp(max, item) == Ordering::Less {
                        self.max_item = Some(item.clone());
                    }
                }
            }
        }
    }

    fn update_min_max_from_other(&mut self, other: &KllSketch<T>) {
        match (&self.min_item, &self.max_item) {
            (None, None) => {
                self.min_item = other.min_item.clone();
                self.max_item = other.max_item.clone();
            }
            (Some(min), Some(max)) => {
                if let Some(other_min) = &other.min_item {
                    if T::cmp(other_min, min) == Ordering::Less {
                        self.min_item = Some(other_min.clone());
                    }
                }
                if let Some(other_max) = &other.max_item {
                    if T::cmp(max, other_max) == Ordering::Less {
                        self.max_item = Some(other_max.clone());
                    }
                }
            }
            _ => {
                self.min_item = other.min_item.clone();
                self.max_item = other.max_item.clone();
            }
        }
    }

    fn internal_update(&mut self, item: T) {
        if self.num_retained() >= self.capacity() {
            self.compress_while_updating();
        }
        self.n += 1;
        self.is_level_zero_sorted = false;
        self.levels[0].insert(0, item);
    }

    fn compress_while_updating(&mut self) {
        let level = self.find_level_to_compact();
        if level + 1 == self.levels.len() {
            self.levels.push(Vec::new());
        }

        let mut current = std::mem::take(&mut self.levels[level]);
        let mut above = std::mem::take(&mut self.levels[level + 1]);

        let odd = current.len() % 2 == 1;
        let mut leftover = None;
        if odd {
            leftover = Some(current.remove(0));
        }

        if level == 0 && !self.is_level_zero_sorted {
            current.sort_by(T::cmp);
        }

        let use_up = above.is_empty();
        let promoted = downsample(current, random_bit(), use_up);
        if above.is_empty() {
            above = promoted;
        } else {
            above = merge_sorted_vec(promoted, above);
        }
        self.levels[level + 1] = above;

        let mut new_level = Vec::new();
        if let Some(item) = leftover {
            new_level.push(item);
        }
        self.levels[level] = new_level;
    }

    fn find_level_to_compact(&self) -> usize {
        let num_levels = self.levels.len();
        for level in 0..num_levels {
            let pop = self.levels[level].len() as u32;
            let cap = level_capacity(self.k, num_levels, level, self.m);
            if pop >= cap {
                return level;
            }
        }
        panic!("no level to compact");
    }

    fn merge_higher_levels(&mut self, other: &KllSketch<T>) {
        let provisional_levels = self.levels.len().max(other.levels.len());
        let mut self_levels = std::mem::take(&mut self.levels);
        let mut work_levels = vec![Vec::new(); provisional_levels];
        work_levels[0] = std::mem::take(&mut self_levels[0]);

        for (level, work) in work_levels.iter_mut().enumerate().skip(1) {
            let left = if level < self_levels.len() {
                std::mem::take(&mut self_levels[level])
            } else {
                Vec::new()
            };
            let right = other.levels.get(level).cloned().unwrap_or_default();

            *work = if left.is_empty() {
                right
            } else if right.is_empty() {
                left
            } else {
                merge_sorted_vec(left, right)
            };
        }

        self.levels = general_compress(work_levels, self.k, self.m, self.is_level_zero_sorted);
    }

    fn total_weight(&self) -> u64 {
        let sizes: Vec<usize> = self.levels.iter().map(|level| level.len()).collect();
        sum_the_sample_weights(&sizes)
    }
}

fn check_rank(rank: f64) -> Result<(), Error> {
    if !(0.0..=1.0).contains(&rank) {
        return Err(Error::invalid_argument(format!(
            "rank must be in [0.0, 1.0], got {rank}"
        )));
    }
    Ok(())
}

/// Normalized rank error for the given k.
pub fn normalized_rank_error(k: u16, pmf: bool) -> f64 {
    let k = k as f64;
    if pmf {
        2.446 / k.powf(0.9433)
    } else {
        2.296 / k.powf(0.9723)
    }
}

fn downsample<T: KllItem>(items: Vec<T>, offset: u32, use_up: bool) -> Vec<T> {
    let len = items.len();
    debug_assert!(len % 2 == 0, "length must be even");
    let offset = (offset & 1) as usize;
    let parity = if use_up {
        (len - 1 - offset) % 2
    } else {
        offset
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| if idx % 2 == parity { Some(item) } else { None })
        .collect()
}

fn merge_sorted_vec<T: KllItem>(left: Vec<T>, right: Vec<T>) -> Vec<T> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left_iter = left.into_iter().peekable();
    let mut right_iter = right.into_iter().peekable();

    while let (Some(l), Some(r)) = (left_iter.peek(), right_iter.peek()) {
        if T::cmp(l, r) == Ordering::Less {
            merged.push(left_iter.next().unwrap());
        } else {
            merged.push(right_iter.next().unwrap());
        }
    }
    merged.extend(left_iter);
    merged.extend(right_iter);
    merged
}

fn general_compress<T: KllItem>(
    mut levels_in: Vec<Vec<T>>,
    k: u16,
    m: u8,
    is_level_zero_sorted: bool,
) -> Vec<Vec<T>> {
    let mut current_num_levels = levels_in.len();
    let mut current_item_count: usize = levels_in.iter().map(|level| level.len()).sum();
    let mut target_item_count = compute_total_capacity(k, m, current_num_levels) as usize;
    let mut levels_out = Vec::with_capacity(current_num_levels + 1);

    let mut current_level = 0usize;
    while current_level < current_num_levels {
        if current_level + 1 >= levels_in.len() {
            levels_in.push(Vec::new());
        }

        let raw_pop = levels_in[current_level].len();
        let cap = level_capacity(k, current_num_levels, current_level, m) as usize;

        if current_item_count < target_item_count || raw_pop < cap {
            levels_out.push(std::mem::take(&mut levels_in[current_level]));
        } else {
            let mut current = std::mem::take(&mut levels_in[current_level]);
            let mut above = std::mem::take(&mut levels_in[current_level + 1]);

            let odd = current.len() % 2 == 1;
            let mut leftover = None;
            if odd {
                leftover = Some(current.remove(0));
            }

            if current_level == 0 && !is_level_zero_sorted {
                current.sort_by(T::cmp);
            }

            let use_up = above.is_empty();
            let promoted = downsample(current, random_bit(), use_up);
            let promoted_len = promoted.len();
            if above.is_empty() {
                above = promoted;
            } else {
                above = merge_sorted_vec(promoted, above);
            }
            levels_in[current_level + 1] = above;

            let mut out_level = Vec::new();
            if let Some(item) = leftover {
                out_level.push(item);
            }
            levels_out.push(out_level);

            current_item_count = current_item_count.saturating_sub(promoted_len);

            if current_level == current_num_levels - 1 {
                current_num_levels += 1;
                target_item_count += level_capacity(k, current_num_levels, 0, m) as usize;
                if levels_in.len() < current_num_levels + 1 {
                    levels_in.resize_with(current_num_levels + 1, Vec::new);
                }
            }
        }
        current_level += 1;
    }

    levels_out.truncate(current_num_levels);
    levels_out
}

impl KllItem for f32 {
    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.partial_cmp(b).unwrap_or(Ordering::Greater)
    }

    fn is_nan(value: &Self) -> bool {
        value.is_nan()
    }

    fn serialized_size(_value: &Self) -> usize {
        4
    }

    fn write_item(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn read_item(input: &mut &[u8]) -> Result<Self, Error> {
        let bytes = take(input, 4, "f32")?;
        Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

impl KllItem for f64 {
    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.partial_cmp(b).unwrap_or(Ordering::Greater)
    }

    fn is_nan(value: &Self) -> bool {
        value.is_nan()
    }

    fn serialized_size(_value: &Self) -> usize {
        8
    }

    fn write_item(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn read_item(input: &mut &[u8]) -> Result<Self, Error> {
        let bytes = take(input, 8, "f64")?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

impl KllItem for i32 {
    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    fn serialized_size(_value: &Self) -> usize {
        4
    }

    fn write_item(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn read_item(input: &mut &[u8]) -> Result<Self, Error> {
        let bytes = take(input, 4, "i32")?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

impl KllItem for i64 {
    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    fn serialized_size(_value: &Self) -> usize {
        8
    }

    fn write_item(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn read_item(input: &mut &[u8]) -> Result<Self, Error> {
        let bytes = take(input, 8, "i64")?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

impl KllItem for String {
    fn cmp(a: &Self, b: &Self) -> Ordering {
        a.cmp(b)
    }

    fn serialized_size(value: &Self) -> usize {
        4 + value.len()
    }

    fn write_item(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn read_item(input: &mut &[u8]) -> Result<Self, Error> {
        let len_bytes = take(input, 4, "string length")?;
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        let bytes = take(input, len, "string bytes")?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::format("invalid utf-8 string"))
    }
}

fn take<'a>(input: &mut &'a [u8], len: usize, field: &'static str) -> Result<&'a [u8], Error> {
    if input.len() < len {
        return Err(Error::insufficient_data(field));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_keeps_half() {
        let items: Vec<i64> = (0..10).collect();
        let kept = downsample(items.clone(), 0, false);
        assert_eq!(kept, vec![0, 2, 4, 6, 8]);
        let kept = downsample(items, 1, false);
        assert_eq!(kept, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_merge_sorted_vec() {
        let merged = merge_sorted_vec(vec![1i64, 4, 6], vec![2i64, 3, 5]);
        assert_eq!(merged, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_retained_weight_matches_n() {
        let mut sketch = KllSketch::<i64>::new(128).unwrap();
        for i in 0..100_000 {
            sketch.update(i);
        }
        assert_eq!(sketch.total_weight(), sketch.n());
        assert!(sketch.is_estimation_mode());
        assert!(sketch.num_retained() < 1000);
    }

    #[test]
    fn test_string_items() {
        let mut sketch = KllSketch::<String>::new(200).unwrap();
        for word in ["pear", "apple", "quince", "banana"] {
            sketch.update(word.to_string());
        }
        assert_eq!(sketch.min_item().map(String::as_str), Some("apple"));
        assert_eq!(sketch.max_item().map(String::as_str), Some("quince"));
        let bytes = sketch.serialize();
        let restored = KllSketch::<String>::deserialize(&bytes).unwrap();
        assert_eq!(restored, sketch);
    }
}
