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

//! Byte-level reader/writer for the sketch wire formats.
//!
//! All multi-byte fields are little-endian. Big-endian hosts byte-swap;
//! the `IS_BIG_ENDIAN` flag bit is reserved and always written as 0.

use std::io;
use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LE};

mod family;

pub(crate) use family::Family;

/// A growable output buffer with little-endian write methods.
pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write(&mut self, buf: &[u8]) {
        self.bytes.extend_from_slice(buf);
    }

    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    pub fn write_u16_le(&mut self, n: u16) {
        let mut buf = [0u8; 2];
        LE::write_u16(&mut buf, n);
        self.write(&buf);
    }

    pub fn write_u32_le(&mut self, n: u32) {
        let mut buf = [0u8; 4];
        LE::write_u32(&mut buf, n);
        self.write(&buf);
    }

    pub fn write_i32_le(&mut self, n: i32) {
        let mut buf = [0u8; 4];
        LE::write_i32(&mut buf, n);
        self.write(&buf);
    }

    pub fn write_u64_le(&mut self, n: u64) {
        let mut buf = [0u8; 8];
        LE::write_u64(&mut buf, n);
        self.write(&buf);
    }

    pub fn write_f64_le(&mut self, n: f64) {
        let mut buf = [0u8; 8];
        LE::write_f64(&mut buf, n);
        self.write(&buf);
    }
}

/// A cursor over serialized sketch bytes with little-endian read methods.
pub(crate) struct SketchSlice<'a> {
    slice: Cursor<&'a [u8]>,
}

impl<'a> SketchSlice<'a> {
    /// The unread remainder of the input.
    pub fn remaining(&self) -> &'a [u8] {
        let bytes = *self.slice.get_ref();
        let position = (self.slice.position() as usize).min(bytes.len());
        &bytes[position..]
    }
}

impl SketchSlice<'_> {
    pub fn new(slice: &[u8]) -> SketchSlice {
        SketchSlice {
            slice: Cursor::new(slice),
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.slice.read_exact(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(LE::read_u16(&buf))
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(LE::read_u32(&buf))
    }

    pub fn read_i32_le(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(LE::read_i32(&buf))
    }

    pub fn read_u64_le(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(LE::read_u64(&buf))
    }

    pub fn read_f64_le(&mut self) -> io::Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(LE::read_f64(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_primitives() {
        let mut bytes = SketchBytes::with_capacity(32);
        bytes.write_u8(7);
        bytes.write_u16_le(0xBEEF);
        bytes.write_u32_le(123_456_789);
        bytes.write_u64_le(u64::MAX - 1);
        bytes.write_f64_le(-0.25);
        let buf = bytes.into_bytes();

        let mut slice = SketchSlice::new(&buf);
        assert_eq!(slice.read_u8().unwrap(), 7);
        assert_eq!(slice.read_u16_le().unwrap(), 0xBEEF);
        assert_eq!(slice.read_u32_le().unwrap(), 123_456_789);
        assert_eq!(slice.read_u64_le().unwrap(), u64::MAX - 1);
        assert_eq!(slice.read_f64_le().unwrap(), -0.25);
        assert!(slice.read_u8().is_err());
    }
}
