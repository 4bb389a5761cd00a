//! Fingerprint - 128-bit Content-Addressing Key
//!
//! Every identity in the core (memory cache key, disk file name, scheduler
//! coalescing tag) is a [`Fingerprint`] computed with MurmurHash3 x64-128 over
//! the UTF-8 bytes of a logical cache key.
//!
//! # Design
//!
//! - Two `u64` halves instead of a `String` key: cheap to copy, hash and compare
//! - Fixed 32-character lowercase hex form used as the on-disk file name
//! - The all-zero value is reserved for "no key" and is never persisted

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Seed used for every fingerprint computed by this crate
pub const FINGERPRINT_SEED: u64 = 0xe17a_1465;

/// Length of the hex representation
pub const HEX_LEN: usize = 32;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

// =============================================================================
// MurmurHash3 x64-128
// =============================================================================

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
fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[inline]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Compute the 128-bit MurmurHash3 (x64 variant) of `data`.
///
/// Returns the two 64-bit halves `(h1, h2)`.
pub fn murmur3_x64_128(data: &[u8], seed: u64) -> (u64, u64) {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let k1 = read_u64_le(&block[0..8]);
        let k2 = read_u64_le(&block[8..16]);

        h1 ^= mix_k1(k1);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        let mut k2 = 0u64;
        for (i, &b) in tail[8..].iter().enumerate() {
            k2 ^= (b as u64) << (8 * i);
        }
        h2 ^= mix_k2(k2);
    }
    if !tail.is_empty() {
        let mut k1 = 0u64;
        for (i, &b) in tail.iter().take(8).enumerate() {
            k1 ^= (b as u64) << (8 * i);
        }
        h1 ^= mix_k1(k1);
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    (h1, h2)
}

// =============================================================================
// Fingerprint
// =============================================================================

/// 128-bit identity of a cache entry or scheduling tag
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    h1: u64,
    h2: u64,
}

impl Fingerprint {
    /// Reserved "no key" value
    pub const EMPTY: Fingerprint = Fingerprint { h1: 0, h2: 0 };

    /// Build a fingerprint from its raw halves
    #[inline]
    pub const fn new(h1: u64, h2: u64) -> Self {
        Self { h1, h2 }
    }

    /// Fingerprint of a logical cache key.
    ///
    /// An empty key maps to [`Fingerprint::EMPTY`].
    pub fn of(key: &str) -> Self {
        Self::of_bytes(key.as_bytes())
    }

    /// Fingerprint of arbitrary bytes; empty input maps to [`Fingerprint::EMPTY`]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::EMPTY;
        }
        let (h1, h2) = murmur3_x64_128(bytes, FINGERPRINT_SEED);
        Self { h1, h2 }
    }

    #[inline]
    pub fn h1(&self) -> u64 {
        self.h1
    }

    #[inline]
    pub fn h2(&self) -> u64 {
        self.h2
    }

    /// True for the reserved all-zero value
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.h1 == 0 && self.h2 == 0
    }

    /// Big-endian byte layout used by the journal
    pub fn to_be_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.h1.to_be_bytes());
        out[8..].copy_from_slice(&self.h2.to_be_bytes());
        out
    }

    /// Inverse of [`Fingerprint::to_be_bytes`]
    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&bytes[..8]);
        h2.copy_from_slice(&bytes[8..]);
        Self {
            h1: u64::from_be_bytes(h1),
            h2: u64::from_be_bytes(h2),
        }
    }

    /// 32-character lowercase hex form
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(HEX_LEN);
        for byte in self.to_be_bytes() {
            out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            out.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
        }
        out
    }

    /// Parse the 32-character lowercase hex form.
    ///
    /// Returns `None` for anything else (wrong length, uppercase, non-hex).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes = hex.as_bytes();
        if bytes.len() != HEX_LEN {
            return None;
        }
        let mut raw = [0u8; 16];
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            raw[i] = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
        }
        Some(Self::from_be_bytes(raw))
    }
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or_else(|| Error::InvalidFingerprint(s.to_string()))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<&str> for Fingerprint {
    fn from(key: &str) -> Self {
        Self::of(key)
    }
}

// =============================================================================
// Tests
// =============================================================================
