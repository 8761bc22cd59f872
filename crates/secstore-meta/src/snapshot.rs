//! Exportable meta artifact.
//!
//! Wire format:
//! ```text
//! [8 bytes: magic "SSMETA01"]
//! [4 bytes: payload length (u32 LE)]
//! [4 bytes: CRC32 of payload (u32 LE)]
//! [N bytes: payload (bincode-serialized MetaSnapshot)]
//! ```

use serde::{Deserialize, Serialize};

use secstore_crypto::{merkle_root, DigestHasher};
use secstore_types::{MetaDigest, StoragePath};

use crate::error::{MetaError, MetaResult};

/// Magic bytes opening every encoded snapshot.
pub const MAGIC: &[u8; 8] = b"SSMETA01";

/// Snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER_LEN: usize = MAGIC.len() + 8;

/// Digest and size of one stored leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub path: StoragePath,
    pub digest: MetaDigest,
    pub size: u64,
}

/// A self-contained copy of the integrity metadata.
///
/// `leaves` is sorted by path, so `root` can be recomputed from the records
/// alone with [`MetaSnapshot::verify_root`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSnapshot {
    pub version: u32,
    /// Name of the digest algorithm that produced the records.
    pub algorithm: String,
    /// Incremented on every digest change; reset by nothing.
    pub generation: u64,
    pub root: MetaDigest,
    pub leaves: Vec<LeafRecord>,
}

impl MetaSnapshot {
    /// Serialize into the framed wire format.
    pub fn encode(&self) -> MetaResult<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| MetaError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| MetaError::Serialization("snapshot exceeds 4 GiB".into()))?;
        let crc = crc32fast::hash(&payload);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse and validate the framed wire format.
    pub fn decode(bytes: &[u8]) -> MetaResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(MetaError::Corrupt(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(MetaError::Corrupt("bad magic".into()));
        }

        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let length = word(MAGIC.len()) as usize;
        let expected_crc = word(MAGIC.len() + 4);

        let payload = &bytes[HEADER_LEN..];
        if payload.len() != length {
            return Err(MetaError::Corrupt(format!(
                "length mismatch: header says {length}, found {}",
                payload.len()
            )));
        }
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            return Err(MetaError::Corrupt(format!(
                "crc mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let snapshot: MetaSnapshot =
            bincode::deserialize(payload).map_err(|e| MetaError::Serialization(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MetaError::Corrupt(format!(
                "unsupported version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Recompute the root from the leaf records and compare.
    pub fn verify_root(&self, hasher: &dyn DigestHasher) -> bool {
        if hasher.algorithm() != self.algorithm {
            return false;
        }
        let sorted = self.leaves.windows(2).all(|w| w[0].path < w[1].path);
        let digests = self.leaves.iter().map(|r| r.digest).collect();
        sorted && merkle_root(hasher, digests) == self.root
    }

    /// Sum of all leaf sizes.
    pub fn total_size(&self) -> u64 {
        self.leaves.iter().map(|r| r.size).sum()
    }
}
