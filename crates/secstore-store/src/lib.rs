//! Path-addressed secure storage.
//!
//! [`PathStore`] layers path validation, per-subtree mutual exclusion,
//! all-or-nothing mutations and integrity digests over any
//! [`Backend`](secstore_backend::Backend).
//!
//! # Concurrency
//!
//! - Mutations on disjoint subtrees run in parallel; overlapping ones are
//!   serialized by [`SubtreeLocks`], with waits bounded by
//!   [`StoreConfig::lock_timeout`].
//! - Reads are lock-free with respect to the store and are not isolated
//!   from concurrent writers.
//! - [`PathStore::rebuild_meta`] excludes every mutation. Mutations arriving
//!   meanwhile block or fail with `Unavailable` per [`RebuildPolicy`].

pub mod config;
pub mod entries;
pub mod error;
pub mod locks;
pub mod store;
mod undo;

pub use config::{RebuildPolicy, StoreConfig};
pub use entries::Entries;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use locks::{SubtreeGuard, SubtreeLocks};
pub use store::PathStore;
