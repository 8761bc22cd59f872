//! Digest primitives for SecStore integrity metadata.
//!
//! The digest algorithm is pluggable through [`DigestHasher`]. The default
//! [`Blake3Hasher`] wraps the `blake3` crate with domain separation. Subtree
//! and namespace digests are Merkle roots over leaf digests in path order,
//! computed by [`merkle_root`].
//!
//! All crypto operations wrap established libraries: no custom cryptography.

pub mod hasher;
pub mod merkle;

pub use hasher::{Blake3Hasher, DigestHasher};
pub use merkle::merkle_root;
