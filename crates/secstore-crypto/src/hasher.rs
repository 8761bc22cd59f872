use secstore_types::{MetaDigest, StoragePath};

/// Hashing interface used to compute meta digests.
///
/// Implementations must be deterministic: the same inputs always produce the
/// same digest, independent of call order or history.
pub trait DigestHasher: Send + Sync {
    /// Stable algorithm name recorded in exported metadata.
    fn algorithm(&self) -> &str;

    /// Digest of a single leaf. Covers the path as well as the content, so
    /// relocating data changes the digest.
    fn hash_leaf(&self, path: &StoragePath, data: &[u8]) -> MetaDigest;

    /// Digest of an interior Merkle node.
    fn hash_pair(&self, left: &MetaDigest, right: &MetaDigest) -> MetaDigest;
}

const LEAF_DOMAIN: &[u8] = b"secstore-leaf-v1:";
const NODE_DOMAIN: &[u8] = b"secstore-node-v1:";

/// Domain-separated BLAKE3 hasher.
///
/// Leaf and node hashes carry distinct domain tags so a leaf can never be
/// confused with an interior node.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Hasher;

impl Blake3Hasher {
    pub const fn new() -> Self {
        Self
    }
}

impl DigestHasher for Blake3Hasher {
    fn algorithm(&self) -> &str {
        "blake3"
    }

    fn hash_leaf(&self, path: &StoragePath, data: &[u8]) -> MetaDigest {
        let path = path.as_str().as_bytes();
        let mut hasher = blake3::Hasher::new();
        hasher.update(LEAF_DOMAIN);
        // Length prefix keeps (path, data) boundaries unambiguous.
        hasher.update(&(path.len() as u32).to_le_bytes());
        hasher.update(path);
        hasher.update(data);
        MetaDigest::from_hash(*hasher.finalize().as_bytes())
    }

    fn hash_pair(&self, left: &MetaDigest, right: &MetaDigest) -> MetaDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NODE_DOMAIN);
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        MetaDigest::from_hash(*hasher.finalize().as_bytes())
    }
}
