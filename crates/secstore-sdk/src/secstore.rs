use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{info, warn};

use secstore_backend::{Backend, FsBackend, InMemoryBackend};
use secstore_crypto::{Blake3Hasher, DigestHasher};
use secstore_meta::IntegrityReport;
use secstore_restore::{
    HandlerRef, RestoreCoordinator, RestoreEvent, RestoreRegistry, RestoreState, RestoreStream,
};
use secstore_store::PathStore;
use secstore_types::{Entry, MetaDigest, SpaceStats, StoragePath};

use crate::config::{BackendConfig, SecStoreConfig};
use crate::error::SdkResult;

/// High-level SecStore API.
///
/// Paths are accepted as strings and validated on every call. The restore
/// registry belongs to this handle: dropping it removes every handler.
pub struct SecStore {
    store: Arc<PathStore>,
    registry: Arc<RestoreRegistry>,
    coordinator: RestoreCoordinator,
}

impl SecStore {
    /// Open the backend described by `config`.
    pub fn open(config: &SecStoreConfig) -> SdkResult<Self> {
        let backend: Arc<dyn Backend> = match &config.backend {
            BackendConfig::Memory { capacity } => Arc::new(InMemoryBackend::with_capacity(*capacity)),
            BackendConfig::Filesystem { root, capacity } => {
                Arc::new(FsBackend::create(root, *capacity)?)
            }
        };
        Self::with_backend(backend, Arc::new(Blake3Hasher::new()), config)
    }

    /// A fresh in-memory store with default tuning.
    pub fn in_memory() -> SdkResult<Self> {
        Self::open(&SecStoreConfig::default())
    }

    /// Wire a store over an existing backend and digest algorithm.
    pub fn with_backend(
        backend: Arc<dyn Backend>,
        hasher: Arc<dyn DigestHasher>,
        config: &SecStoreConfig,
    ) -> SdkResult<Self> {
        let store = Arc::new(PathStore::open(backend, hasher, config.store.clone())?);
        let registry = Arc::new(RestoreRegistry::new(config.notify_channel_capacity));
        let coordinator = RestoreCoordinator::new(store.clone(), registry.clone());
        info!(backend = ?config.backend, "secstore ready");
        Ok(Self {
            store,
            registry,
            coordinator,
        })
    }

    /// The underlying path store.
    pub fn path_store(&self) -> &Arc<PathStore> {
        &self.store
    }

    // ---- Content operations ----

    pub fn write(&self, path: &str, data: &[u8]) -> SdkResult<()> {
        Ok(self.store.write(&StoragePath::parse(path)?, data)?)
    }

    /// Copy the leaf into `buf`; see [`PathStore::read`].
    pub fn read(&self, path: &str, buf: &mut [u8]) -> SdkResult<usize> {
        Ok(self.store.read(&StoragePath::parse(path)?, buf)?)
    }

    pub fn read_to_vec(&self, path: &str) -> SdkResult<Vec<u8>> {
        Ok(self.store.read_to_vec(&StoragePath::parse(path)?)?)
    }

    pub fn delete(&self, path: &str) -> SdkResult<()> {
        Ok(self.store.delete(&StoragePath::parse(path)?)?)
    }

    pub fn get_size(&self, path: &str) -> SdkResult<u64> {
        Ok(self.store.get_size(&StoragePath::parse(path)?)?)
    }

    /// Visit immediate children with `(name, is_leaf)` until the visitor
    /// breaks. Returns the number visited.
    pub fn get_entries<F>(&self, path: &str, mut visit: F) -> SdkResult<usize>
    where
        F: FnMut(&str, bool) -> ControlFlow<()>,
    {
        let path = StoragePath::parse(path)?;
        Ok(self
            .store
            .for_each_entry(&path, |entry| visit(&entry.name, entry.is_leaf()))?)
    }

    /// All immediate children of `path`.
    pub fn entries(&self, path: &str) -> SdkResult<Vec<Entry>> {
        Ok(self.store.entries(&StoragePath::parse(path)?)?.collect())
    }

    pub fn get_total_space(&self) -> SdkResult<SpaceStats> {
        Ok(self.store.total_space()?)
    }

    pub fn copy(&self, dest: &str, src: &str) -> SdkResult<()> {
        let dest = StoragePath::parse(dest)?;
        let src = StoragePath::parse(src)?;
        Ok(self.store.copy(&dest, &src)?)
    }

    pub fn move_to(&self, dest: &str, src: &str) -> SdkResult<()> {
        let dest = StoragePath::parse(dest)?;
        let src = StoragePath::parse(src)?;
        Ok(self.store.move_to(&dest, &src)?)
    }

    // ---- Integrity operations ----

    pub fn copy_meta_to(&self, dest: &str) -> SdkResult<()> {
        Ok(self.store.copy_meta_to(&StoragePath::parse(dest)?)?)
    }

    pub fn root_digest(&self) -> SdkResult<MetaDigest> {
        Ok(self.store.root_digest()?)
    }

    pub fn subtree_digest(&self, path: &str) -> SdkResult<MetaDigest> {
        Ok(self.store.subtree_digest(&StoragePath::parse(path)?)?)
    }

    pub fn verify(&self) -> SdkResult<IntegrityReport> {
        Ok(self.store.verify()?)
    }

    // ---- Restore operations ----

    /// Signal that the medium was restored out of band.
    ///
    /// Best-effort: a failed rebuild is logged and no handler runs. Use
    /// [`try_reinit`](Self::try_reinit) to observe the outcome.
    pub fn reinit_sec_storage(&self) {
        if let Err(e) = self.coordinator.reinit() {
            warn!(error = %e, retryable = e.is_retryable(), "secure storage re-initialization failed");
        }
    }

    /// Like [`reinit_sec_storage`](Self::reinit_sec_storage), returning the
    /// delivered event or the rebuild error.
    pub fn try_reinit(&self) -> SdkResult<RestoreEvent> {
        Ok(self.coordinator.reinit()?)
    }

    /// Register a callback for completed restores.
    pub fn set_restore_handler<F>(&self, handler: F) -> HandlerRef
    where
        F: Fn(&RestoreEvent) + Send + Sync + 'static,
    {
        self.registry.set_handler(handler)
    }

    pub fn remove_restore_handler(&self, handle: HandlerRef) -> bool {
        self.registry.remove_handler(handle)
    }

    /// Async stream of restore events.
    pub fn subscribe_restores(&self) -> RestoreStream {
        self.registry.subscribe()
    }

    pub fn restore_state(&self) -> RestoreState {
        self.coordinator.state()
    }
}

impl Drop for SecStore {
    fn drop(&mut self) {
        self.registry.clear();
    }
}

impl std::fmt::Debug for SecStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecStore")
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use secstore_store::ErrorKind;

    use crate::error::SdkError;

    #[test]
    fn scenario_copy_move() {
        let store = SecStore::in_memory().unwrap();
        store.write("/x/y", b"data").unwrap();
        store.copy("/x2", "/x").unwrap();
        store.move_to("/x3", "/x").unwrap();

        let mut names = Vec::new();
        store
            .get_entries("/", |name, is_leaf| {
                names.push((name.to_string(), is_leaf));
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(names, vec![("x2".into(), false), ("x3".into(), false)]);
        assert_eq!(store.read_to_vec("/x2/y").unwrap(), b"data");
        assert_eq!(store.read_to_vec("/x3/y").unwrap(), b"data");
    }

    #[test]
    fn malformed_paths_are_bad_parameters() {
        let store = SecStore::in_memory().unwrap();
        for bad in ["", "/a/../b", "/a//b"] {
            let err = store.write(bad, b"x").unwrap_err();
            assert_eq!(err.kind(), Some(ErrorKind::BadParameter), "path {bad:?}");
        }
    }

    #[test]
    fn restore_handlers_fire_after_reinit() {
        let store = SecStore::in_memory().unwrap();
        store.write("/k", b"v").unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            store.set_restore_handler(move |event| {
                assert_eq!(event.leaf_count, 1);
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        store.reinit_sec_storage();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(store.restore_state(), RestoreState::Normal);
    }

    #[test]
    fn failed_reinit_is_visible_through_try_reinit() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = SecStore::with_backend(
            backend.clone(),
            Arc::new(Blake3Hasher::new()),
            &SecStoreConfig::default(),
        )
        .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let count = hits.clone();
        store.set_restore_handler(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        backend.set_available(false);
        store.reinit_sec_storage();
        let err = store.try_reinit().unwrap_err();
        assert!(matches!(err, SdkError::Store(ref e) if e.is_retryable()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn filesystem_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecStoreConfig::filesystem(dir.path().join("medium"), 1 << 20);

        let store = SecStore::open(&config).unwrap();
        store.write("/app/key", b"value").unwrap();
        store.copy_meta_to("/backup/meta").unwrap();
        let digest = store.root_digest().unwrap();
        drop(store);

        let reopened = SecStore::open(&config).unwrap();
        assert_eq!(reopened.root_digest().unwrap(), digest);
        assert!(reopened.verify().unwrap().is_clean());
        assert_eq!(reopened.get_total_space().unwrap().total, 1 << 20);
    }

    #[tokio::test]
    async fn restore_events_stream_to_subscribers() {
        let store = SecStore::in_memory().unwrap();
        let mut events = store.subscribe_restores();
        let event = store.try_reinit().unwrap();
        let received = events.recv().await.unwrap();
        assert_eq!(received, event);
    }
}
