//! Foundation types for SecStore.
//!
//! This crate provides the identifiers and value types shared by every other
//! SecStore crate. It performs no I/O.
//!
//! # Key Types
//!
//! - [`StoragePath`]: Validated, normalized hierarchical path
//! - [`MetaDigest`]: 32-byte integrity digest over stored content
//! - [`Entry`] / [`EntryKind`]: One immediate child discovered by enumeration
//! - [`SpaceStats`]: Total and free capacity of the namespace

pub mod digest;
pub mod entry;
pub mod error;
pub mod path;

pub use digest::MetaDigest;
pub use entry::{Entry, EntryKind, SpaceStats};
pub use error::TypeError;
pub use path::{StoragePath, MAX_COMPONENT_LEN, MAX_PATH_LEN, RESERVED_COMPONENT};
