use secstore_types::{Entry, EntryKind, SpaceStats, StoragePath};

use crate::error::BackendResult;

/// Raw byte storage addressed by path.
///
/// All implementations must satisfy these invariants:
/// - `write` replaces the whole leaf; readers never see a partial leaf.
/// - A leaf never has children; writing beneath a leaf or onto a directory
///   fails.
/// - Directories are implicit: removing the last leaf under a directory
///   removes the directory from `kind` and `list`.
/// - The root always reports [`EntryKind::Directory`] while the medium is
///   available.
pub trait Backend: Send + Sync {
    /// Read a whole leaf.
    ///
    /// Returns `Ok(None)` if no leaf exists at the path (including when the
    /// path is a directory).
    fn read(&self, path: &StoragePath) -> BackendResult<Option<Vec<u8>>>;

    /// Create or replace a leaf, creating intermediate directories.
    fn write(&self, path: &StoragePath, data: &[u8]) -> BackendResult<()>;

    /// Remove a single leaf. Returns `true` if the leaf existed.
    fn remove(&self, path: &StoragePath) -> BackendResult<bool>;

    /// What exists at the path, if anything.
    fn kind(&self, path: &StoragePath) -> BackendResult<Option<EntryKind>>;

    /// Immediate children of a directory. Empty for leaves and absent paths.
    /// Order is backend-defined.
    fn list(&self, path: &StoragePath) -> BackendResult<Vec<Entry>>;

    /// Every leaf in the subtree rooted at `path`, with its size in bytes.
    /// A leaf path yields itself.
    fn leaves(&self, path: &StoragePath) -> BackendResult<Vec<(StoragePath, u64)>>;

    /// Capacity snapshot of the medium.
    fn space(&self) -> BackendResult<SpaceStats>;

    /// Atomically move the subtree at `src` to `dest`.
    ///
    /// Returns `Ok(false)` when the backend cannot rename natively; callers
    /// then fall back to copy-and-delete. The default implementation never
    /// renames.
    fn rename(&self, _dest: &StoragePath, _src: &StoragePath) -> BackendResult<bool> {
        Ok(false)
    }

    /// Re-derive any cached state (such as used bytes) from the medium
    /// after its content changed out of band. Backends without a cache do
    /// nothing.
    fn rescan(&self) -> BackendResult<()> {
        Ok(())
    }
}
