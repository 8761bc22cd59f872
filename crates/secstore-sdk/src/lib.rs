//! High-level SDK for SecStore.
//!
//! [`SecStore`] is the main entry point for applications: it opens a
//! backend from a [`SecStoreConfig`], wires the path store to a restore
//! coordinator and handler registry, and exposes every storage operation
//! behind a single handle.
//!
//! ```
//! use secstore_sdk::SecStore;
//!
//! let store = SecStore::in_memory().unwrap();
//! store.write("/app/token", b"s3cr3t").unwrap();
//! assert_eq!(store.get_size("/app").unwrap(), 6);
//! ```

pub mod config;
pub mod error;
pub mod secstore;

pub use config::{BackendConfig, SecStoreConfig};
pub use error::{SdkError, SdkResult};
pub use secstore::SecStore;

// Re-export key types
pub use secstore_meta::{IntegrityReport, MetaSnapshot};
pub use secstore_restore::{HandlerRef, RestoreEvent, RestoreState, RestoreStream};
pub use secstore_store::{ErrorKind, RebuildPolicy, StoreConfig, StoreError};
pub use secstore_types::{Entry, EntryKind, MetaDigest, SpaceStats, StoragePath};
