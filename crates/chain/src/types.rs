use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use hex::{encode as hex_encode, decode as hex_decode};

use crate::error::KernelError;

/// Length of every digest used by the kernel (SHA3-256).
pub const HASH_LEN: usize = 32;

/// Hash type: sha3-256 digest wrapper (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const fn zero() -> Self { Hash([0u8; HASH_LEN]) }
    pub fn from_bytes(b: [u8; HASH_LEN]) -> Self { Hash(b) }
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] { &self.0 }
    pub fn to_hex(&self) -> String { hex_encode(self.0) }
    pub fn is_zero(&self) -> bool { self.0 == [0u8; HASH_LEN] }

    /// Parse from a byte slice of exactly 32 bytes.
    pub fn from_slice(b: &[u8]) -> Result<Self, KernelError> {
        if b.len() != HASH_LEN {
            return Err(KernelError::Malformed(format!("invalid hash length: {}", b.len())));
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(b);
        Ok(Hash(arr))
    }

    /// Most significant 64 bits, big-endian.
    pub fn leading_u64(&self) -> u64 {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&self.0[0..8]);
        u64::from_be_bytes(arr)
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex_encode(&self.0[0..6])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_hex()).finish()
    }
}

impl FromStr for Hash {
    type Err = KernelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let v = hex_decode(s).map_err(|e| KernelError::Malformed(format!("invalid hash hex: {}", e)))?;
        Hash::from_slice(&v)
    }
}

/* serde impls for Hash as hex string */
impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&self.to_hex())
    }
}
impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Hash, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        Hash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper: `Vec<u8>` as lowercase hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Token amount in smallest units.
pub type Amount = u128;

/// Wall clock in milliseconds since the Unix epoch; 0 if the clock is before it.
#[inline]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    #[test]
    fn hash_hex_roundtrip() {
        let h = crypto::sha3_256(b"aether");
        let parsed: Hash = h.to_hex().parse().expect("parse");
        assert_eq!(parsed, h);
        let prefixed: Hash = format!("0x{}", h.to_hex()).parse().expect("parse 0x");
        assert_eq!(prefixed, h);
    }

    #[test]
    fn hash_rejects_wrong_length() {
        assert!(Hash::from_str("abcd").is_err());
        assert!(Hash::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn leading_u64_is_big_endian() {
        let mut bytes = [0u8; HASH_LEN];
        bytes[7] = 1;
        assert_eq!(Hash::from_bytes(bytes).leading_u64(), 1);
        bytes[0] = 0x80;
        assert_eq!(Hash::from_bytes(bytes).leading_u64(), 0x8000_0000_0000_0001);
    }

    #[test]
    fn hash_serializes_as_hex_string() {
        let h = crypto::sha3_256(b"x");
        let json = serde_json::to_string(&h).expect("json");
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
    }
}
