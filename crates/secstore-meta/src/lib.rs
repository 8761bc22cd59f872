//! Integrity metadata for SecStore.
//!
//! The [`MetaManager`] keeps a digest per stored leaf and derives subtree and
//! namespace digests ("meta hash") as Merkle roots over those leaf digests in
//! path order. Normal mutations update the table incrementally through
//! [`MetaManager::apply`]; [`MetaManager::rebuild`] recomputes everything
//! from backend content after an out-of-band change.
//!
//! # Persistence
//!
//! When journaling is enabled, the manager stores an encoded
//! [`MetaSnapshot`] at [`journal_path`] after every digest change, inside
//! the same critical section as the change. A journal write failure reverts
//! the change and is returned to the caller, so the triggering mutation can
//! be rolled back. The reserved [`META_COMPONENT`] subtree never contributes
//! to digests.
//!
//! # Verification
//!
//! [`MetaManager::verify`] compares the tracked table with what the backend
//! actually holds and reports every leaf that was modified, lost, or added
//! behind the manager's back.

pub mod error;
pub mod manager;
pub mod report;
pub mod snapshot;

pub use error::{MetaError, MetaResult};
pub use manager::{journal_path, is_reserved, LeafChange, MetaManager, META_COMPONENT};
pub use report::IntegrityReport;
pub use snapshot::{LeafRecord, MetaSnapshot, SNAPSHOT_VERSION};
