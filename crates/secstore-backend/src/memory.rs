use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use secstore_types::{Entry, EntryKind, SpaceStats, StoragePath};

use crate::error::{BackendError, BackendResult};
use crate::traits::Backend;

/// Default capacity of an in-memory backend (64 MiB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = 64 * 1024 * 1024;

struct MemState {
    leaves: BTreeMap<StoragePath, Vec<u8>>,
    used: u64,
}

impl MemState {
    /// Leaves strictly beneath `path`, in path order.
    fn descendants<'a>(
        &'a self,
        path: &StoragePath,
    ) -> impl Iterator<Item = (&'a StoragePath, &'a Vec<u8>)> + 'a {
        let prefix = path.child_prefix();
        self.leaves
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |(k, _)| k.as_str().starts_with(&prefix))
    }

    fn kind(&self, path: &StoragePath) -> Option<EntryKind> {
        if path.is_root() {
            return Some(EntryKind::Directory);
        }
        if self.leaves.contains_key(path) {
            return Some(EntryKind::File);
        }
        self.descendants(path)
            .next()
            .map(|_| EntryKind::Directory)
    }

    /// Reject paths that would sit beneath a leaf or replace a directory.
    fn check_placement(&self, path: &StoragePath) -> BackendResult<()> {
        if path.is_root() {
            return Err(BackendError::IsDirectory(path.clone()));
        }
        if let Some(leaf) = path.ancestors().into_iter().find(|a| self.leaves.contains_key(a)) {
            return Err(BackendError::NotADirectory(leaf));
        }
        if self.descendants(path).next().is_some() {
            return Err(BackendError::IsDirectory(path.clone()));
        }
        Ok(())
    }
}

/// In-memory, `BTreeMap`-based backend.
///
/// Intended for tests and embedding. Leaves are held behind a `RwLock` and
/// cloned on read. A fixed capacity bounds the total stored bytes. The
/// backend can be switched unavailable, and mutations can be made to fail
/// after a countdown, to exercise error paths in the layers above.
pub struct InMemoryBackend {
    state: RwLock<MemState>,
    capacity: u64,
    available: AtomicBool,
    /// Remaining successful mutations before injected faults start.
    mutation_budget: Mutex<Option<usize>>,
    /// Mutations touching this subtree fail.
    faulty_subtree: Mutex<Option<StoragePath>>,
}

impl InMemoryBackend {
    /// Create an empty backend with [`DEFAULT_MEMORY_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create an empty backend bounded to `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            state: RwLock::new(MemState {
                leaves: BTreeMap::new(),
                used: 0,
            }),
            capacity,
            available: AtomicBool::new(true),
            mutation_budget: Mutex::new(None),
            faulty_subtree: Mutex::new(None),
        }
    }

    /// Simulate the medium going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Let the next `count` mutations succeed, then fail every later one
    /// with [`BackendError::Fault`] until [`Self::clear_faults`].
    pub fn fail_mutations_after(&self, count: usize) {
        if let Ok(mut budget) = self.mutation_budget.lock() {
            *budget = Some(count);
        }
    }

    /// Fail every mutation that touches `path` or its descendants with
    /// [`BackendError::Fault`] until [`Self::clear_faults`].
    pub fn fail_mutations_under(&self, path: StoragePath) {
        if let Ok(mut faulty) = self.faulty_subtree.lock() {
            *faulty = Some(path);
        }
    }

    /// Stop injecting mutation faults.
    pub fn clear_faults(&self) {
        if let Ok(mut budget) = self.mutation_budget.lock() {
            *budget = None;
        }
        if let Ok(mut faulty) = self.faulty_subtree.lock() {
            *faulty = None;
        }
    }

    /// Number of leaves currently stored.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.leaves.len()).unwrap_or(0)
    }

    /// Returns `true` if no leaves are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("in-memory backend offline".into()))
        }
    }

    fn consume_mutation(&self) -> BackendResult<()> {
        let mut budget = self
            .mutation_budget
            .lock()
            .map_err(|e| BackendError::Fault(format!("lock poisoned: {e}")))?;
        match budget.as_mut() {
            None => Ok(()),
            Some(0) => Err(BackendError::Fault("injected mutation fault".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }

    fn check_subtree_fault(&self, path: &StoragePath) -> BackendResult<()> {
        let faulty = self
            .faulty_subtree
            .lock()
            .map_err(|e| BackendError::Fault(format!("lock poisoned: {e}")))?;
        match faulty.as_ref() {
            Some(prefix) if prefix.contains(path) => Err(BackendError::Fault(format!(
                "injected fault under {prefix}"
            ))),
            _ => Ok(()),
        }
    }

    fn read_state(&self) -> BackendResult<std::sync::RwLockReadGuard<'_, MemState>> {
        self.ensure_available()?;
        self.state
            .read()
            .map_err(|e| BackendError::Fault(format!("lock poisoned: {e}")))
    }

    fn write_state(&self) -> BackendResult<std::sync::RwLockWriteGuard<'_, MemState>> {
        self.ensure_available()?;
        self.consume_mutation()?;
        self.state
            .write()
            .map_err(|e| BackendError::Fault(format!("lock poisoned: {e}")))
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for InMemoryBackend {
    fn read(&self, path: &StoragePath) -> BackendResult<Option<Vec<u8>>> {
        let state = self.read_state()?;
        Ok(state.leaves.get(path).cloned())
    }

    fn write(&self, path: &StoragePath, data: &[u8]) -> BackendResult<()> {
        self.check_subtree_fault(path)?;
        let mut state = self.write_state()?;
        state.check_placement(path)?;

        let old_len = state.leaves.get(path).map_or(0, |d| d.len() as u64);
        let base = state.used - old_len;
        let available = self.capacity.saturating_sub(base);
        if data.len() as u64 > available {
            return Err(BackendError::NoSpace {
                requested: data.len() as u64,
                available,
            });
        }

        state.leaves.insert(path.clone(), data.to_vec());
        state.used = base + data.len() as u64;
        Ok(())
    }

    fn remove(&self, path: &StoragePath) -> BackendResult<bool> {
        self.check_subtree_fault(path)?;
        let mut state = self.write_state()?;
        match state.leaves.remove(path) {
            Some(data) => {
                state.used -= data.len() as u64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn kind(&self, path: &StoragePath) -> BackendResult<Option<EntryKind>> {
        let state = self.read_state()?;
        Ok(state.kind(path))
    }

    fn list(&self, path: &StoragePath) -> BackendResult<Vec<Entry>> {
        let state = self.read_state()?;
        let prefix = path.child_prefix();
        let mut children: BTreeMap<&str, EntryKind> = BTreeMap::new();
        for (key, _) in state.descendants(path) {
            let rel = &key.as_str()[prefix.len()..];
            match rel.split_once('/') {
                Some((name, _)) => {
                    children.insert(name, EntryKind::Directory);
                }
                None => {
                    children.insert(rel, EntryKind::File);
                }
            }
        }
        Ok(children
            .into_iter()
            .map(|(name, kind)| Entry {
                name: name.to_string(),
                kind,
            })
            .collect())
    }

    fn leaves(&self, path: &StoragePath) -> BackendResult<Vec<(StoragePath, u64)>> {
        let state = self.read_state()?;
        if let Some(data) = state.leaves.get(path) {
            return Ok(vec![(path.clone(), data.len() as u64)]);
        }
        Ok(state
            .descendants(path)
            .map(|(k, v)| (k.clone(), v.len() as u64))
            .collect())
    }

    fn space(&self) -> BackendResult<SpaceStats> {
        let state = self.read_state()?;
        Ok(SpaceStats {
            total: self.capacity,
            free: self.capacity.saturating_sub(state.used),
        })
    }

    fn rename(&self, dest: &StoragePath, src: &StoragePath) -> BackendResult<bool> {
        self.check_subtree_fault(src)?;
        self.check_subtree_fault(dest)?;
        let mut state = self.write_state()?;
        let moving: Vec<StoragePath> = match state.kind(src) {
            None => return Err(BackendError::NotFound(src.clone())),
            Some(EntryKind::File) => vec![src.clone()],
            Some(EntryKind::Directory) => state.descendants(src).map(|(k, _)| k.clone()).collect(),
        };
        if src.is_root() || src.contains(dest) {
            return Err(BackendError::IsDirectory(dest.clone()));
        }
        if state.kind(dest).is_some() {
            return Err(BackendError::AlreadyExists(dest.clone()));
        }
        if let Some(leaf) = dest.ancestors().into_iter().find(|a| state.leaves.contains_key(a)) {
            return Err(BackendError::NotADirectory(leaf));
        }

        let mut targets = Vec::with_capacity(moving.len());
        for old in &moving {
            let new = old
                .rebase(src, dest)
                .ok_or_else(|| BackendError::Fault(format!("cannot rebase {old} onto {dest}")))?;
            targets.push(new);
        }
        for (old, new) in moving.into_iter().zip(targets) {
            if let Some(data) = state.leaves.remove(&old) {
                state.leaves.insert(new, data);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("leaf_count", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
