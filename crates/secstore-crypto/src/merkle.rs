use secstore_types::MetaDigest;

use crate::hasher::DigestHasher;

/// Root of a binary Merkle tree over `leaves`.
///
/// Leaves are taken in the order given; callers supply them in path order so
/// the root depends only on the final content, never on mutation history.
/// An empty list yields the null digest and a single leaf is its own root.
/// An odd node at any level is paired with itself.
pub fn merkle_root(hasher: &dyn DigestHasher, leaves: Vec<MetaDigest>) -> MetaDigest {
    let mut level = leaves;
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hasher.hash_pair(left, right),
                [single] => hasher.hash_pair(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level.first().copied().unwrap_or_else(MetaDigest::null)
}
