use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Integrity digest over stored content.
///
/// A `MetaDigest` is produced by a pluggable hasher and summarizes either a single leaf or a whole subtree. The null digest (all
/// zeros) represents an empty subtree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaDigest([u8; 32]);

impl MetaDigest {
    /// Wrap a pre-computed 32-byte hash.
    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The null digest (all zeros). Represents "no content".
    pub const fn null() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the null digest.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for MetaDigest {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for MetaDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetaDigest({})", self.short_hex())
    }
}

impl fmt::Display for MetaDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for MetaDigest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<MetaDigest> for [u8; 32] {
    fn from(digest: MetaDigest) -> Self {
        digest.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_all_zeros() {
        assert!(MetaDigest::null().is_null());
        assert_eq!(MetaDigest::default(), MetaDigest::null());
        assert!(!MetaDigest::from_hash([1; 32]).is_null());
    }

    #[test]
    fn hex_roundtrip() {
        let mut raw = [0u8; 32];
        raw[0] = 0xab;
        raw[31] = 0x01;
        let digest = MetaDigest::from_hash(raw);
        assert_eq!(MetaDigest::from_hex(&digest.to_hex()).unwrap(), digest);
        assert_eq!(digest.short_hex().len(), 8);
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(matches!(
            MetaDigest::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
        assert_eq!(
            MetaDigest::from_hex("abcd"),
            Err(TypeError::InvalidLength {
                expected: 32,
                actual: 2
            })
        );
    }
}
