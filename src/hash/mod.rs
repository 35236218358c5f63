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

//! MurmurHash3 x64 128 with a 64-bit seed.
//!
//! This is the x64 variant of MurmurHash3 with the full-mixing finalizer,
//! widened to accept a 64-bit seed (both lanes start from the seed). With a
//! seed that fits in 32 bits the output is identical to the reference
//! implementation.

/// Default seed used by all update sketches.
///
/// Sketches must be fed and merged under the same seed; the seed hash stored
/// in serialized images rejects accidental cross-seed mixing.
pub const DEFAULT_UPDATE_SEED: u64 = 9001;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline]
fn mix_k1(mut k1: u64) -> u64 {
    k1 = k1.wrapping_mul(C1);
    k1 = k1.rotate_left(31);
    k1.wrapping_mul(C2)
}

#[inline]
fn mix_k2(mut k2: u64) -> u64 {
    k2 = k2.wrapping_mul(C2);
    k2 = k2.rotate_left(33);
    k2.wrapping_mul(C1)
}

/// Hashes `bytes` with the given seed, returning the 128-bit result as
/// `(h1, h2)`.
pub fn murmur_hash3_x64_128(bytes: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut chunks = bytes.chunks_exact(16);
    for block in chunks.by_ref() {
        let k1 = u64::from_le_bytes(block[0..8].try_into().unwrap());
        let k2 = u64::from_le_bytes(block[8..16].try_into().unwrap());

        h1 ^= mix_k1(k1);
        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u64;
        let mut k2 = 0u64;
        for (i, &byte) in tail.iter().enumerate() {
            if i < 8 {
                k1 |= (byte as u64) << (8 * i);
            } else {
                k2 |= (byte as u64) << (8 * (i - 8));
            }
        }
        if tail.len() > 8 {
            h2 ^= mix_k2(k2);
        }
        h1 ^= mix_k1(k1);
    }

    h1 ^= bytes.len() as u64;
    h2 ^= bytes.len() as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

/// Returns the 16-bit fingerprint of a seed.
///
/// Defined as the low 16 bits of `h1` of the hash of 8 zero bytes under the
/// seed. Stored in serialized images so that deserialize and merge can
/// fail fast on incompatible seeds.
pub fn compute_seed_hash(seed: u64) -> u16 {
    let (h1, _) = murmur_hash3_x64_128(&[0u8; 8], seed);
    h1 as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_vectors() {
        // remainder > 8
        let key = "The quick brown fox jumps over the lazy dog";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xe34bbc7bbc071b6c);
        assert_eq!(h2, 0x7a433ca9c49a9347);

        // change one bit
        let key = "The quick brown fox jumps over the lazy eog";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0x362108102c62d1c9);
        assert_eq!(h2, 0x3285cd100292b305);

        // test a remainder < 8
        let key = "The quick brown fox jumps over the lazy dogdogdog";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0x9c8205300e612fc4);
        assert_eq!(h2, 0xcbc0af6136aa3df9);

        // test a remainder = 8
        let key = "The quick brown fox jumps over the lazy1";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xe3301a827e5cdfe3);
        assert_eq!(h2, 0xbdbf05f8da0f0392);

        // test a remainder = 0
        let key = "The quick brown fox jumps over t";
        let (h1, h2) = murmur_hash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xdf6af91bb29bdacf);
        assert_eq!(h2, 0x91a341c58df1f3a6);
    }

    #[test]
    fn test_agrees_with_mur3_for_small_seeds() {
        for seed in [0u32, 1, 9001, 0xDEAD_BEEF] {
            for len in [0usize, 1, 7, 8, 9, 15, 16, 17, 48, 63] {
                let data: Vec<u8> = (0..len as u8).collect();
                let (a1, a2) = murmur_hash3_x64_128(&data, seed as u64);
                let (b1, b2) = mur3::murmurhash3_x64_128(&data, seed);
                assert_eq!((a1, a2), (b1, b2), "seed={seed} len={len}");
            }
        }
    }

    #[test]
    fn test_seed_hash_differs_across_seeds() {
        assert_ne!(
            compute_seed_hash(DEFAULT_UPDATE_SEED),
            compute_seed_hash(DEFAULT_UPDATE_SEED + 1)
        );
    }
}
