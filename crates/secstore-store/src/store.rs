use std::ops::ControlFlow;
use std::sync::{Arc, RwLock, RwLockReadGuard, TryLockError};

use tracing::{debug, error, info, warn};

use secstore_backend::Backend;
use secstore_crypto::DigestHasher;
use secstore_meta::{is_reserved, IntegrityReport, LeafChange, MetaManager, META_COMPONENT};
use secstore_types::{Entry, EntryKind, MetaDigest, SpaceStats, StoragePath};

use crate::config::{RebuildPolicy, StoreConfig};
use crate::entries::Entries;
use crate::error::{StoreError, StoreResult};
use crate::locks::SubtreeLocks;
use crate::undo::UndoLog;

/// Path-addressed store that keeps the meta digest current.
///
/// Every mutation claims the subtrees it touches, applies its backend steps
/// with an undo log, then folds the result into the meta table. If any step
/// (including the digest update) fails, the backend steps are reversed and
/// the error is returned, so callers observe either the whole mutation or
/// none of it.
///
/// Reads take no locks and see whatever the backend currently holds.
pub struct PathStore {
    backend: Arc<dyn Backend>,
    meta: MetaManager,
    locks: SubtreeLocks,
    /// Shared by mutations, exclusive for rebuild.
    gate: RwLock<()>,
    config: StoreConfig,
}

impl PathStore {
    /// Open a store over `backend`.
    ///
    /// Loads the meta journal when journaling is enabled and verifies it
    /// against backend content if configured. Without a usable journal the
    /// digest is rebuilt from scratch.
    pub fn open(
        backend: Arc<dyn Backend>,
        hasher: Arc<dyn DigestHasher>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let meta = MetaManager::new(backend.clone(), hasher, config.persist_meta);
        let loaded = config.persist_meta && meta.load()?;

        if !loaded {
            meta.rebuild()?;
        } else if config.verify_on_open {
            let report = meta.verify()?;
            if !report.is_clean() {
                if config.strict_integrity {
                    return Err(StoreError::IntegrityViolation(report.to_string()));
                }
                warn!(%report, "stored content diverged from meta journal; rebuilding");
                meta.rebuild()?;
            }
        }

        let store = Self {
            backend,
            meta,
            locks: SubtreeLocks::new(config.lock_timeout),
            gate: RwLock::new(()),
            config,
        };
        info!(
            root = %store.meta.root_digest()?.short_hex(),
            leaves = store.meta.leaf_count()?,
            from_journal = loaded,
            "secure store opened"
        );
        Ok(store)
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn check_client_path(path: &StoragePath) -> StoreResult<()> {
        if is_reserved(path) {
            return Err(StoreError::BadParameter(format!(
                "{path} is inside the reserved {META_COMPONENT} subtree"
            )));
        }
        Ok(())
    }

    fn check_leaf_target(path: &StoragePath) -> StoreResult<()> {
        Self::check_client_path(path)?;
        if path.is_root() {
            return Err(StoreError::BadParameter("the root is a directory".into()));
        }
        Ok(())
    }

    fn enter_mutation(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        match self.config.rebuild_policy {
            RebuildPolicy::Block => self
                .gate
                .read()
                .map_err(|e| StoreError::Fault(format!("rebuild gate poisoned: {e}"))),
            RebuildPolicy::Fail => match self.gate.try_read() {
                Ok(guard) => Ok(guard),
                Err(TryLockError::WouldBlock) => {
                    Err(StoreError::Unavailable("meta rebuild in progress".into()))
                }
                Err(TryLockError::Poisoned(e)) => {
                    Err(StoreError::Fault(format!("rebuild gate poisoned: {e}")))
                }
            },
        }
    }

    /// Client-visible leaves under `path`, excluding the reserved subtree.
    fn client_leaves(&self, path: &StoragePath) -> StoreResult<Vec<(StoragePath, u64)>> {
        let mut leaves = self.backend.leaves(path)?;
        leaves.retain(|(p, _)| !is_reserved(p));
        Ok(leaves)
    }

    /// Fold `changes` into the meta table, undoing the backend steps if the
    /// digest update fails.
    fn commit(&self, undo: UndoLog<'_>, changes: &[LeafChange<'_>]) -> StoreResult<MetaDigest> {
        match self.meta.apply(changes) {
            Ok(root) => Ok(root),
            Err(e) => {
                warn!(error = %e, "digest update failed; rolling back");
                if !undo.rollback() {
                    error!("rollback incomplete; meta rebuild required");
                }
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Write / Read
    // -----------------------------------------------------------------------

    /// Create or replace the leaf at `path`.
    pub fn write(&self, path: &StoragePath, data: &[u8]) -> StoreResult<()> {
        Self::check_leaf_target(path)?;
        let _gate = self.enter_mutation()?;
        let _claim = self.locks.acquire(&[path])?;
        self.write_claimed(path, data)?;
        debug!(path = %path, bytes = data.len(), "leaf written");
        Ok(())
    }

    fn write_claimed(&self, path: &StoragePath, data: &[u8]) -> StoreResult<()> {
        if self.backend.kind(path)? == Some(EntryKind::Directory) {
            return Err(StoreError::BadParameter(format!("{path} is a directory")));
        }
        let mut undo = UndoLog::new(self.backend.as_ref());
        undo.before_write(path)?;
        self.backend.write(path, data)?;
        self.commit(
            undo,
            &[LeafChange::Put {
                path: path.clone(),
                data,
            }],
        )?;
        Ok(())
    }

    /// Copy the leaf at `path` into `buf`, returning the byte count.
    ///
    /// All or nothing: if `buf` is shorter than the leaf, nothing is copied
    /// and [`StoreError::Overflow`] reports the required length.
    pub fn read(&self, path: &StoragePath, buf: &mut [u8]) -> StoreResult<usize> {
        let data = self.read_to_vec(path)?;
        if data.len() > buf.len() {
            return Err(StoreError::Overflow {
                required: data.len(),
                provided: buf.len(),
            });
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Read the whole leaf at `path`.
    pub fn read_to_vec(&self, path: &StoragePath) -> StoreResult<Vec<u8>> {
        Self::check_client_path(path)?;
        self.backend
            .read(path)?
            .ok_or_else(|| StoreError::not_found(path))
    }

    // -----------------------------------------------------------------------
    // Delete / size / enumeration
    // -----------------------------------------------------------------------

    /// Remove the leaf or whole subtree at `path`.
    pub fn delete(&self, path: &StoragePath) -> StoreResult<()> {
        Self::check_leaf_target(path)?;
        let _gate = self.enter_mutation()?;
        let _claim = self.locks.acquire(&[path])?;

        let leaves = self.client_leaves(path)?;
        if leaves.is_empty() {
            return Err(StoreError::not_found(path));
        }

        let mut undo = UndoLog::new(self.backend.as_ref());
        let mut changes = Vec::with_capacity(leaves.len());
        for (leaf, _) in leaves {
            let Some(data) = self.backend.read(&leaf)? else {
                continue;
            };
            undo.before_remove(&leaf, data);
            if let Err(e) = self.backend.remove(&leaf) {
                warn!(path = %leaf, error = %e, "delete step failed; rolling back");
                if !undo.rollback() {
                    error!(path = %path, "rollback incomplete; meta rebuild required");
                }
                return Err(e.into());
            }
            changes.push(LeafChange::Remove { path: leaf });
        }
        self.commit(undo, &changes)?;
        debug!(path = %path, leaves = changes.len(), "subtree deleted");
        Ok(())
    }

    /// Total bytes of all leaves at or beneath `path`.
    ///
    /// The root always exists, so an empty store reports `0` for it. Any
    /// other path without leaves (including an empty directory left on the
    /// medium) is NotFound, matching [`delete`](Self::delete).
    pub fn get_size(&self, path: &StoragePath) -> StoreResult<u64> {
        Self::check_client_path(path)?;
        let leaves = self.client_leaves(path)?;
        if leaves.is_empty() && !path.is_root() {
            return Err(StoreError::not_found(path));
        }
        Ok(leaves.iter().map(|(_, size)| size).sum())
    }

    /// Immediate children of `path`. A missing path or a leaf yields an
    /// empty enumeration.
    pub fn entries(&self, path: &StoragePath) -> StoreResult<Entries> {
        Self::check_client_path(path)?;
        let mut entries = self.backend.list(path)?;
        if path.is_root() {
            entries.retain(|e| e.name != META_COMPONENT);
        }
        Ok(Entries::new(entries))
    }

    /// Visit the immediate children of `path` until `visit` breaks.
    /// Returns the number of entries visited.
    pub fn for_each_entry<F>(&self, path: &StoragePath, mut visit: F) -> StoreResult<usize>
    where
        F: FnMut(&Entry) -> ControlFlow<()>,
    {
        let mut visited = 0;
        for entry in self.entries(path)? {
            visited += 1;
            if visit(&entry).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    /// Capacity snapshot of the medium.
    pub fn total_space(&self) -> StoreResult<SpaceStats> {
        Ok(self.backend.space()?)
    }

    // -----------------------------------------------------------------------
    // Copy / Move
    // -----------------------------------------------------------------------

    fn check_relocation(dest: &StoragePath, src: &StoragePath) -> StoreResult<()> {
        Self::check_leaf_target(dest)?;
        Self::check_leaf_target(src)?;
        if dest.overlaps(src) {
            return Err(StoreError::BadParameter(format!(
                "{src} and {dest} overlap"
            )));
        }
        Ok(())
    }

    /// Leaves to relocate; `src` must exist and `dest` must be empty.
    fn relocation_plan(
        &self,
        dest: &StoragePath,
        src: &StoragePath,
    ) -> StoreResult<Vec<(StoragePath, StoragePath)>> {
        let leaves = self.client_leaves(src)?;
        if leaves.is_empty() {
            return Err(StoreError::not_found(src));
        }
        if self.backend.kind(dest)?.is_some() {
            return Err(StoreError::DestinationNotEmpty(dest.clone()));
        }
        leaves
            .into_iter()
            .map(|(leaf, _)| {
                let target = leaf.rebase(src, dest).ok_or_else(|| {
                    StoreError::BadParameter(format!("{leaf} cannot be placed under {dest}"))
                })?;
                Ok((leaf, target))
            })
            .collect()
    }

    /// Write every planned target, recording undo steps. Returns the copied
    /// bytes per target.
    fn copy_leaves(
        &self,
        plan: &[(StoragePath, StoragePath)],
        undo: &mut UndoLog<'_>,
    ) -> StoreResult<Vec<(StoragePath, Vec<u8>)>> {
        let mut copied = Vec::with_capacity(plan.len());
        for (leaf, target) in plan {
            let data = self
                .backend
                .read(leaf)?
                .ok_or_else(|| StoreError::not_found(leaf))?;
            undo.before_write(target)?;
            self.backend.write(target, &data)?;
            copied.push((target.clone(), data));
        }
        Ok(copied)
    }

    /// Duplicate the leaf or subtree at `src` under `dest`.
    ///
    /// `dest` must not exist. On failure nothing is left at `dest`.
    pub fn copy(&self, dest: &StoragePath, src: &StoragePath) -> StoreResult<()> {
        Self::check_relocation(dest, src)?;
        let _gate = self.enter_mutation()?;
        let _claim = self.locks.acquire(&[dest, src])?;

        let plan = self.relocation_plan(dest, src)?;
        let mut undo = UndoLog::new(self.backend.as_ref());
        let copied = match self.copy_leaves(&plan, &mut undo) {
            Ok(copied) => copied,
            Err(e) => {
                warn!(src = %src, dest = %dest, error = %e, "copy failed; rolling back");
                if !undo.rollback() {
                    error!(dest = %dest, "rollback incomplete; meta rebuild required");
                }
                return Err(e);
            }
        };

        let changes: Vec<LeafChange<'_>> = copied
            .iter()
            .map(|(path, data)| LeafChange::Put {
                path: path.clone(),
                data: data.as_slice(),
            })
            .collect();
        self.commit(undo, &changes)?;
        debug!(src = %src, dest = %dest, leaves = changes.len(), "subtree copied");
        Ok(())
    }

    /// Relocate the leaf or subtree at `src` to `dest`.
    ///
    /// Uses a native backend rename when available and falls back to copy
    /// plus delete. Either way the source is intact if the move fails.
    pub fn move_to(&self, dest: &StoragePath, src: &StoragePath) -> StoreResult<()> {
        Self::check_relocation(dest, src)?;
        let _gate = self.enter_mutation()?;
        let _claim = self.locks.acquire(&[dest, src])?;

        let plan = self.relocation_plan(dest, src)?;
        if self.backend.rename(dest, src)? {
            self.commit_rename(dest, src, &plan)?;
            debug!(src = %src, dest = %dest, leaves = plan.len(), "subtree renamed");
            return Ok(());
        }

        let mut undo = UndoLog::new(self.backend.as_ref());
        let result = self.copy_leaves(&plan, &mut undo).and_then(|copied| {
            for (leaf, _) in &plan {
                let data = self
                    .backend
                    .read(leaf)?
                    .ok_or_else(|| StoreError::not_found(leaf))?;
                undo.before_remove(leaf, data);
                self.backend.remove(leaf)?;
            }
            Ok(copied)
        });
        let copied = match result {
            Ok(copied) => copied,
            Err(e) => {
                warn!(src = %src, dest = %dest, error = %e, "move failed; rolling back");
                if !undo.rollback() {
                    error!(src = %src, "rollback incomplete; meta rebuild required");
                }
                return Err(e);
            }
        };

        let mut changes: Vec<LeafChange<'_>> = plan
            .iter()
            .map(|(leaf, _)| LeafChange::Remove { path: leaf.clone() })
            .collect();
        changes.extend(copied.iter().map(|(path, data)| LeafChange::Put {
            path: path.clone(),
            data: data.as_slice(),
        }));
        self.commit(undo, &changes)?;
        debug!(src = %src, dest = %dest, leaves = copied.len(), "subtree moved");
        Ok(())
    }

    /// Digest a natively renamed subtree; rename it back if that fails.
    fn commit_rename(
        &self,
        dest: &StoragePath,
        src: &StoragePath,
        plan: &[(StoragePath, StoragePath)],
    ) -> StoreResult<()> {
        let rename_back = |e: StoreError| {
            warn!(src = %src, dest = %dest, error = %e, "move digest update failed; renaming back");
            if let Err(back) = self.backend.rename(src, dest) {
                error!(src = %src, dest = %dest, error = %back, "rename back failed; meta rebuild required");
            }
            e
        };

        let mut moved = Vec::with_capacity(plan.len());
        for (_, target) in plan {
            match self.backend.read(target) {
                Ok(Some(data)) => moved.push((target.clone(), data)),
                Ok(None) => return Err(rename_back(StoreError::not_found(target))),
                Err(e) => return Err(rename_back(e.into())),
            }
        }

        let mut changes: Vec<LeafChange<'_>> = plan
            .iter()
            .map(|(leaf, _)| LeafChange::Remove { path: leaf.clone() })
            .collect();
        changes.extend(moved.iter().map(|(path, data)| LeafChange::Put {
            path: path.clone(),
            data: data.as_slice(),
        }));
        self.meta.apply(&changes).map_err(|e| rename_back(e.into()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Integrity metadata
    // -----------------------------------------------------------------------

    /// Store the encoded meta artifact as a leaf at `dest`.
    ///
    /// The artifact captures the digest state before it is written; the
    /// write itself then updates the digest like any other leaf.
    pub fn copy_meta_to(&self, dest: &StoragePath) -> StoreResult<()> {
        Self::check_leaf_target(dest)?;
        let _gate = self.enter_mutation()?;
        let _claim = self.locks.acquire(&[dest])?;
        let artifact = self.meta.export()?;
        self.write_claimed(dest, &artifact)?;
        info!(dest = %dest, bytes = artifact.len(), "meta artifact exported");
        Ok(())
    }

    /// Recompute every digest from backend content, excluding all
    /// mutations for the duration.
    pub fn rebuild_meta(&self) -> StoreResult<MetaDigest> {
        let _exclusive = self
            .gate
            .write()
            .map_err(|e| StoreError::Fault(format!("rebuild gate poisoned: {e}")))?;
        self.backend.rescan()?;
        Ok(self.meta.rebuild()?)
    }

    /// Compare tracked digests with backend content.
    pub fn verify(&self) -> StoreResult<IntegrityReport> {
        Ok(self.meta.verify()?)
    }

    /// The namespace meta digest.
    pub fn root_digest(&self) -> StoreResult<MetaDigest> {
        Ok(self.meta.root_digest()?)
    }

    /// Digest of the subtree at `path`; null if it holds nothing.
    pub fn subtree_digest(&self, path: &StoragePath) -> StoreResult<MetaDigest> {
        Self::check_client_path(path)?;
        Ok(self.meta.subtree_digest(path)?)
    }

    /// Number of leaves tracked by the meta table.
    pub fn leaf_count(&self) -> StoreResult<usize> {
        Ok(self.meta.leaf_count()?)
    }

    /// Meta table generation; bumps on every digest change.
    pub fn meta_generation(&self) -> StoreResult<u64> {
        Ok(self.meta.generation()?)
    }
}

impl std::fmt::Debug for PathStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathStore")
            .field("meta", &self.meta)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use secstore_backend::{BackendResult, FsBackend, InMemoryBackend};
    use secstore_crypto::Blake3Hasher;
    use secstore_meta::{journal_path, MetaSnapshot};

    use crate::error::ErrorKind;

    fn p(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    fn open_with(backend: Arc<dyn Backend>, config: StoreConfig) -> PathStore {
        PathStore::open(backend, Arc::new(Blake3Hasher::new()), config).unwrap()
    }

    fn memory_store() -> (Arc<InMemoryBackend>, PathStore) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = open_with(backend.clone(), StoreConfig::default());
        (backend, store)
    }

    fn names(store: &PathStore, path: &str) -> Vec<String> {
        store.entries(&p(path)).unwrap().map(|e| e.name).collect()
    }

    /// Wraps a backend and hides its native rename, forcing copy+delete.
    struct NoRename(InMemoryBackend);

    impl Backend for NoRename {
        fn read(&self, path: &StoragePath) -> BackendResult<Option<Vec<u8>>> {
            self.0.read(path)
        }
        fn write(&self, path: &StoragePath, data: &[u8]) -> BackendResult<()> {
            self.0.write(path, data)
        }
        fn remove(&self, path: &StoragePath) -> BackendResult<bool> {
            self.0.remove(path)
        }
        fn kind(&self, path: &StoragePath) -> BackendResult<Option<EntryKind>> {
            self.0.kind(path)
        }
        fn list(&self, path: &StoragePath) -> BackendResult<Vec<Entry>> {
            self.0.list(path)
        }
        fn leaves(&self, path: &StoragePath) -> BackendResult<Vec<(StoragePath, u64)>> {
            self.0.leaves(path)
        }
        fn space(&self) -> BackendResult<SpaceStats> {
            self.0.space()
        }
    }

    // -----------------------------------------------------------------------
    // Write / Read
    // -----------------------------------------------------------------------

    #[test]
    fn write_then_read_roundtrip() {
        let (_, store) = memory_store();
        store.write(&p("/app/key"), b"secret").unwrap();

        let mut buf = [0u8; 16];
        let n = store.read(&p("/app/key"), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"secret");

        store.write(&p("/app/key"), b"v2").unwrap();
        assert_eq!(store.read_to_vec(&p("/app/key")).unwrap(), b"v2");
    }

    #[test]
    fn undersized_read_overflows_without_copying() {
        let (_, store) = memory_store();
        store.write(&p("/k"), b"0123456789").unwrap();

        let mut buf = [0xAAu8; 4];
        match store.read(&p("/k"), &mut buf) {
            Err(StoreError::Overflow { required, provided }) => {
                assert_eq!(required, 10);
                assert_eq!(provided, 4);
            }
            other => panic!("expected Overflow, got {other:?}"),
        }
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn read_missing_or_directory_is_not_found() {
        let (_, store) = memory_store();
        store.write(&p("/d/leaf"), b"1").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(
            store.read(&p("/nope"), &mut buf).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store.read(&p("/d"), &mut buf).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn write_rejects_directories_and_leaf_parents() {
        let (_, store) = memory_store();
        store.write(&p("/d/leaf"), b"1").unwrap();
        let before = store.root_digest().unwrap();

        for target in ["/d", "/", "/d/leaf/child"] {
            let err = store.write(&p(target), b"x").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadParameter, "target {target}");
        }
        assert_eq!(store.root_digest().unwrap(), before);
    }

    #[test]
    fn reserved_subtree_is_off_limits() {
        let (_, store) = memory_store();
        let reserved = p("/.secstore/meta");
        assert_eq!(store.write(&reserved, b"x").unwrap_err().kind(), ErrorKind::BadParameter);
        assert_eq!(store.read_to_vec(&reserved).unwrap_err().kind(), ErrorKind::BadParameter);
        assert_eq!(store.delete(&p("/.secstore")).unwrap_err().kind(), ErrorKind::BadParameter);

        store.write(&p("/visible"), b"1").unwrap();
        assert_eq!(names(&store, "/"), vec!["visible".to_string()]);
        assert_eq!(store.get_size(&StoragePath::root()).unwrap(), 1);
    }

    #[test]
    fn no_space_is_distinct_from_fault() {
        let backend = Arc::new(InMemoryBackend::with_capacity(8));
        let store = open_with(backend, StoreConfig::ephemeral());
        store.write(&p("/a"), b"12345").unwrap();
        let err = store.write(&p("/b"), b"12345").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(!err.is_retryable());
        assert_eq!(store.get_size(&p("/b")).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unavailable_backend_is_retryable() {
        let (backend, store) = memory_store();
        store.write(&p("/a"), b"1").unwrap();
        backend.set_available(false);

        let err = store.write(&p("/b"), b"2").unwrap_err();
        assert!(err.is_retryable());
        assert!(store.total_space().unwrap_err().is_retryable());
        assert!(store.read_to_vec(&p("/a")).unwrap_err().is_retryable());

        backend.set_available(true);
        store.write(&p("/b"), b"2").unwrap();
    }

    // -----------------------------------------------------------------------
    // Delete / size / enumeration
    // -----------------------------------------------------------------------

    #[test]
    fn delete_is_recursive() {
        let (_, store) = memory_store();
        store.write(&p("/x/y/a"), b"1").unwrap();
        store.write(&p("/x/y/b"), b"2").unwrap();
        store.write(&p("/x/keep"), b"3").unwrap();

        store.delete(&p("/x/y")).unwrap();
        assert_eq!(names(&store, "/x"), vec!["keep".to_string()]);
        assert_eq!(store.get_size(&p("/x/y")).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.delete(&p("/x/y")).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(store.verify().unwrap().is_clean());
    }

    #[test]
    fn delete_rolls_back_on_backend_fault() {
        let (backend, store) = memory_store();
        for leaf in ["/t/1", "/t/2", "/t/3"] {
            store.write(&p(leaf), leaf.as_bytes()).unwrap();
        }
        let before = store.root_digest().unwrap();

        backend.fail_mutations_under(p("/t/3"));
        assert_eq!(store.delete(&p("/t")).unwrap_err().kind(), ErrorKind::Fault);
        backend.clear_faults();

        assert_eq!(store.get_size(&p("/t")).unwrap(), 12);
        assert_eq!(store.read_to_vec(&p("/t/1")).unwrap(), b"/t/1");
        assert_eq!(store.root_digest().unwrap(), before);
        assert!(store.verify().unwrap().is_clean());
    }

    #[test]
    fn get_size_sums_subtree() {
        let (_, store) = memory_store();
        assert_eq!(store.get_size(&StoragePath::root()).unwrap(), 0);
        store.write(&p("/s/a"), b"123").unwrap();
        store.write(&p("/s/b/c"), b"45").unwrap();
        assert_eq!(store.get_size(&p("/s")).unwrap(), 5);
        assert_eq!(store.get_size(&p("/s/a")).unwrap(), 3);
        assert_eq!(store.get_size(&StoragePath::root()).unwrap(), 5);
    }

    #[test]
    fn entries_are_non_recursive_and_restartable() {
        let (_, store) = memory_store();
        store.write(&p("/r/one"), b"1").unwrap();
        store.write(&p("/r/sub/two"), b"2").unwrap();

        let entries: Vec<Entry> = store.entries(&p("/r")).unwrap().collect();
        assert_eq!(entries, vec![Entry::file("one"), Entry::directory("sub")]);
        assert_eq!(store.entries(&p("/r")).unwrap().len(), 2);
        assert_eq!(store.entries(&p("/missing")).unwrap().len(), 0);
        assert_eq!(store.entries(&p("/r/one")).unwrap().len(), 0);
    }

    #[test]
    fn visitor_can_stop_early() {
        let (_, store) = memory_store();
        for leaf in ["/v/a", "/v/b", "/v/c"] {
            store.write(&p(leaf), b"x").unwrap();
        }
        let mut seen = Vec::new();
        let visited = store
            .for_each_entry(&p("/v"), |entry| {
                seen.push(entry.name.clone());
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn total_space_reports_capacity() {
        let backend = Arc::new(InMemoryBackend::with_capacity(1000));
        let store = open_with(backend, StoreConfig::ephemeral());
        store.write(&p("/a"), &[0u8; 100]).unwrap();
        let stats = store.total_space().unwrap();
        assert_eq!(stats.total, 1000);
        assert_eq!(stats.free, 900);
    }

    // -----------------------------------------------------------------------
    // Copy / Move
    // -----------------------------------------------------------------------

    #[test]
    fn copy_and_move_scenario() {
        let (_, store) = memory_store();
        store.write(&p("/x/y"), b"payload").unwrap();

        store.copy(&p("/x2"), &p("/x")).unwrap();
        assert_eq!(store.read_to_vec(&p("/x2/y")).unwrap(), b"payload");
        assert_eq!(store.read_to_vec(&p("/x/y")).unwrap(), b"payload");

        store.move_to(&p("/x3"), &p("/x")).unwrap();
        assert_eq!(store.read_to_vec(&p("/x3/y")).unwrap(), b"payload");
        assert_eq!(store.get_size(&p("/x")).unwrap_err().kind(), ErrorKind::NotFound);

        assert_eq!(names(&store, "/"), vec!["x2".to_string(), "x3".to_string()]);
        assert!(store.verify().unwrap().is_clean());
        assert_ne!(
            store.subtree_digest(&p("/x2")).unwrap(),
            store.subtree_digest(&p("/x3")).unwrap(),
            "leaf digests bind the path"
        );
    }

    #[test]
    fn relocation_into_occupied_destination_is_rejected() {
        let (_, store) = memory_store();
        store.write(&p("/src/a"), b"1").unwrap();
        store.write(&p("/dst/b"), b"2").unwrap();
        let before = store.root_digest().unwrap();

        let err = store.copy(&p("/dst"), &p("/src")).unwrap_err();
        assert!(matches!(err, StoreError::DestinationNotEmpty(_)));
        let err = store.move_to(&p("/dst"), &p("/src")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationNotEmpty);

        assert_eq!(store.root_digest().unwrap(), before);
        assert_eq!(store.read_to_vec(&p("/src/a")).unwrap(), b"1");
        assert_eq!(names(&store, "/dst"), vec!["b".to_string()]);
    }

    #[test]
    fn relocation_requires_disjoint_existing_source() {
        let (_, store) = memory_store();
        store.write(&p("/a/b"), b"1").unwrap();
        assert_eq!(store.copy(&p("/a/b/c"), &p("/a")).unwrap_err().kind(), ErrorKind::BadParameter);
        assert_eq!(store.move_to(&p("/a"), &p("/a/b")).unwrap_err().kind(), ErrorKind::BadParameter);
        assert_eq!(store.copy(&p("/z"), &p("/missing")).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn copy_rolls_back_partial_destination() {
        let (backend, store) = memory_store();
        for leaf in ["/src/a", "/src/b", "/src/c"] {
            store.write(&p(leaf), b"x").unwrap();
        }
        let before = store.root_digest().unwrap();

        backend.fail_mutations_under(p("/dst/c"));
        assert!(store.copy(&p("/dst"), &p("/src")).is_err());
        backend.clear_faults();

        assert_eq!(store.entries(&p("/dst")).unwrap().len(), 0);
        assert_eq!(store.root_digest().unwrap(), before);
        assert!(store.verify().unwrap().is_clean());
    }

    #[test]
    fn move_without_native_rename_falls_back() {
        let backend = Arc::new(NoRename(InMemoryBackend::new()));
        let store = open_with(backend.clone(), StoreConfig::default());
        store.write(&p("/m/a"), b"1").unwrap();
        store.write(&p("/m/b/c"), b"2").unwrap();

        store.move_to(&p("/n"), &p("/m")).unwrap();
        assert_eq!(store.read_to_vec(&p("/n/b/c")).unwrap(), b"2");
        assert_eq!(store.get_size(&p("/m")).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(store.verify().unwrap().is_clean());
    }

    #[test]
    fn failed_fallback_move_keeps_source() {
        let backend = Arc::new(NoRename(InMemoryBackend::new()));
        let store = open_with(backend.clone(), StoreConfig::default());
        store.write(&p("/m/a"), b"1").unwrap();
        store.write(&p("/m/b"), b"2").unwrap();
        let before = store.root_digest().unwrap();

        backend.0.fail_mutations_under(p("/m/b"));
        assert!(store.move_to(&p("/n"), &p("/m")).is_err());
        backend.0.clear_faults();

        assert_eq!(store.read_to_vec(&p("/m/a")).unwrap(), b"1");
        assert_eq!(store.read_to_vec(&p("/m/b")).unwrap(), b"2");
        assert_eq!(store.get_size(&p("/n")).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.root_digest().unwrap(), before);
    }

    #[test]
    fn failed_digest_update_renames_back() {
        let (backend, store) = memory_store();
        store.write(&p("/m/a"), b"1").unwrap();
        let before = store.root_digest().unwrap();

        backend.fail_mutations_under(journal_path());
        assert_eq!(store.move_to(&p("/n"), &p("/m")).unwrap_err().kind(), ErrorKind::Fault);
        backend.clear_faults();

        assert_eq!(store.read_to_vec(&p("/m/a")).unwrap(), b"1");
        assert_eq!(store.entries(&p("/n")).unwrap().len(), 0);
        assert_eq!(store.root_digest().unwrap(), before);
    }

    // -----------------------------------------------------------------------
    // Integrity metadata
    // -----------------------------------------------------------------------

    #[test]
    fn journal_failure_rolls_back_write() {
        let (backend, store) = memory_store();
        store.write(&p("/k"), b"old").unwrap();
        let before = store.root_digest().unwrap();

        backend.fail_mutations_under(journal_path());
        assert!(store.write(&p("/k"), b"new").is_err());
        assert!(store.write(&p("/fresh"), b"x").is_err());
        backend.clear_faults();

        assert_eq!(store.read_to_vec(&p("/k")).unwrap(), b"old");
        assert_eq!(store.read_to_vec(&p("/fresh")).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.root_digest().unwrap(), before);
    }

    #[test]
    fn rebuild_matches_incremental_digest() {
        let (_, store) = memory_store();
        store.write(&p("/a"), b"1").unwrap();
        store.write(&p("/b/c"), b"2").unwrap();
        store.copy(&p("/d"), &p("/b")).unwrap();
        store.delete(&p("/a")).unwrap();
        store.move_to(&p("/e"), &p("/d")).unwrap();

        let incremental = store.root_digest().unwrap();
        assert_eq!(store.rebuild_meta().unwrap(), incremental);
        assert_eq!(store.rebuild_meta().unwrap(), incremental);
    }

    #[test]
    fn copy_meta_to_exports_decodable_artifact() {
        let (_, store) = memory_store();
        store.write(&p("/data"), b"d").unwrap();
        let digest = store.root_digest().unwrap();

        store.copy_meta_to(&p("/backup/meta")).unwrap();
        let artifact = store.read_to_vec(&p("/backup/meta")).unwrap();
        let snapshot = MetaSnapshot::decode(&artifact).unwrap();
        assert_eq!(snapshot.root, digest);
        assert_eq!(snapshot.leaves.len(), 1);
        assert!(snapshot.verify_root(&Blake3Hasher::new()));

        assert_ne!(store.root_digest().unwrap(), digest);
        assert_eq!(store.copy_meta_to(&p("/")).unwrap_err().kind(), ErrorKind::BadParameter);
    }

    #[test]
    fn reopen_loads_journal() {
        let (backend, store) = memory_store();
        store.write(&p("/a"), b"1").unwrap();
        let digest = store.root_digest().unwrap();
        let generation = store.meta_generation().unwrap();
        drop(store);

        let reopened = open_with(backend, StoreConfig::default());
        assert_eq!(reopened.root_digest().unwrap(), digest);
        assert_eq!(reopened.meta_generation().unwrap(), generation);
    }

    #[test]
    fn out_of_band_change_detected_on_open() {
        let (backend, store) = memory_store();
        store.write(&p("/a"), b"1").unwrap();
        drop(store);
        backend.write(&p("/a"), b"tampered").unwrap();

        let strict = StoreConfig {
            strict_integrity: true,
            ..StoreConfig::default()
        };
        let err = PathStore::open(backend.clone(), Arc::new(Blake3Hasher::new()), strict)
            .unwrap_err();
        assert!(matches!(err, StoreError::IntegrityViolation(_)));

        let lenient = open_with(backend, StoreConfig::default());
        assert!(lenient.verify().unwrap().is_clean());
    }

    #[test]
    fn filesystem_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let store = open_with(backend, StoreConfig::default());
        store.write(&p("/cfg/key"), b"value").unwrap();
        store.move_to(&p("/cfg2"), &p("/cfg")).unwrap();
        let digest = store.root_digest().unwrap();
        drop(store);

        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let reopened = open_with(backend, StoreConfig::default());
        assert_eq!(reopened.root_digest().unwrap(), digest);
        assert_eq!(reopened.read_to_vec(&p("/cfg2/key")).unwrap(), b"value");
        assert_eq!(names(&reopened, "/"), vec!["cfg2".to_string()]);
    }

    #[test]
    fn filesystem_store_keeps_temp_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let store = open_with(backend, StoreConfig::default());
        let key = p("/d/.secstore-tmp-key");
        store.write(&key, b"secret").unwrap();

        assert_eq!(names(&store, "/d"), vec![".secstore-tmp-key".to_string()]);
        assert_eq!(store.get_size(&p("/d")).unwrap(), 6);
        assert!(store.verify().unwrap().is_clean());
        drop(store);

        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let reopened = open_with(backend, StoreConfig::default());
        assert_eq!(reopened.read_to_vec(&key).unwrap(), b"secret");
        reopened.delete(&p("/d")).unwrap();
        assert_eq!(reopened.get_size(&p("/d")).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_directory_on_medium_has_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let store = open_with(backend, StoreConfig::default());
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        assert_eq!(store.get_size(&p("/empty")).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.delete(&p("/empty")).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.get_size(&StoragePath::root()).unwrap(), 0);
    }

    #[test]
    fn rebuild_refreshes_filesystem_usage() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let store = open_with(backend, StoreConfig::ephemeral());
        let before = store.total_space().unwrap().free;

        std::fs::write(dir.path().join("restored"), vec![7u8; 100]).unwrap();
        store.rebuild_meta().unwrap();
        assert_eq!(store.total_space().unwrap().free, before - 100);
        assert_eq!(store.read_to_vec(&p("/restored")).unwrap().len(), 100);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn disjoint_concurrent_writes_both_succeed() {
        let (_, store) = memory_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for j in 0..10 {
                        let path = p(&format!("/t{i}/k{j}"));
                        store.write(&path, format!("{i}-{j}").as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.leaf_count().unwrap(), 80);
        assert_eq!(store.read_to_vec(&p("/t3/k7")).unwrap(), b"3-7");
        assert!(store.verify().unwrap().is_clean());
    }

    #[test]
    fn filesystem_delete_and_sibling_write_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::open(dir.path(), 1 << 20).unwrap());
        let store = Arc::new(open_with(backend, StoreConfig::default()));

        for round in 0..100 {
            store.write(&p("/a/b/x"), b"x").unwrap();
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let deleter = {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.delete(&p("/a/b/x"))
                })
            };
            let writer = {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.write(&p("/a/b/y"), b"y")
                })
            };
            deleter.join().unwrap().unwrap_or_else(|e| panic!("round {round}: {e}"));
            writer.join().unwrap().unwrap_or_else(|e| panic!("round {round}: {e}"));
            store.delete(&p("/a/b/y")).unwrap();
        }
        assert!(store.verify().unwrap().is_clean());
    }

    #[test]
    fn concurrent_write_and_delete_leave_one_winner() {
        for _ in 0..20 {
            let (_, store) = memory_store();
            store.write(&p("/w"), b"old").unwrap();
            let store = Arc::new(store);

            let writer = {
                let store = store.clone();
                thread::spawn(move || store.write(&p("/w"), b"new").is_ok())
            };
            let deleter = {
                let store = store.clone();
                thread::spawn(move || store.delete(&p("/w")).is_ok())
            };
            assert!(writer.join().unwrap());
            assert!(deleter.join().unwrap());

            match store.read_to_vec(&p("/w")) {
                Ok(data) => assert_eq!(data, b"new"),
                Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
            }
            assert!(store.verify().unwrap().is_clean());
        }
    }

    #[test]
    fn fail_policy_rejects_mutations_during_rebuild() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = StoreConfig {
            rebuild_policy: RebuildPolicy::Fail,
            ..StoreConfig::default()
        };
        let store = open_with(backend, config);

        let exclusive = store.gate.write().unwrap();
        let err = store.write(&p("/a"), b"1").unwrap_err();
        assert!(err.is_retryable());
        drop(exclusive);

        store.write(&p("/a"), b"1").unwrap();
    }

    #[test]
    fn block_policy_waits_for_rebuild() {
        let (_, store) = memory_store();
        let store = Arc::new(store);

        let exclusive = store.gate.write().unwrap();
        let writer = {
            let store = store.clone();
            thread::spawn(move || store.write(&p("/late"), b"1"))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(store.leaf_count().unwrap(), 0);
        drop(exclusive);

        writer.join().unwrap().unwrap();
        assert_eq!(store.leaf_count().unwrap(), 1);
    }

    #[test]
    fn overlapping_mutation_times_out() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = StoreConfig {
            lock_timeout: Duration::from_millis(20),
            ..StoreConfig::default()
        };
        let store = open_with(backend, config);
        let held = p("/busy");
        let _claim = store.locks.acquire(&[&held]).unwrap();

        let err = store.write(&p("/busy/leaf"), b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        store.write(&p("/free"), b"1").unwrap();
    }
}
