//! Backend adapters for SecStore.
//!
//! A backend performs raw byte-level operations against the physical medium.
//! It knows nothing about digests, locking, or rollback; those belong to the
//! layers above. The namespace is a tree of leaves: a directory exists only
//! while at least one leaf lives beneath it.
//!
//! # Backends
//!
//! All backends implement the [`Backend`] trait:
//!
//! - [`InMemoryBackend`] -- `BTreeMap`-based store with a capacity limit and
//!   fault injection, for tests and embedding
//! - [`FsBackend`] -- maps paths under a directory root with atomic
//!   temp-file-and-rename leaf replacement
//!
//! # Rules
//!
//! 1. A leaf can never have children, and a directory can never hold bytes.
//! 2. Exhausted capacity is reported as [`BackendError::NoSpace`], never as
//!    a generic I/O failure.
//! 3. An inaccessible medium is reported as [`BackendError::Unavailable`].
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use fs::FsBackend;
pub use memory::InMemoryBackend;
pub use traits::Backend;
