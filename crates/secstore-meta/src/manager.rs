use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use secstore_backend::Backend;
use secstore_crypto::{merkle_root, DigestHasher};
use secstore_types::{MetaDigest, StoragePath, RESERVED_COMPONENT};

use crate::error::{MetaError, MetaResult};
use crate::report::IntegrityReport;
use crate::snapshot::{LeafRecord, MetaSnapshot, SNAPSHOT_VERSION};

/// Top-level component reserved for integrity metadata and backend staging.
pub const META_COMPONENT: &str = RESERVED_COMPONENT;

const JOURNAL_PATH: &str = "/.secstore/meta";

/// Location of the persisted meta journal.
pub fn journal_path() -> StoragePath {
    StoragePath::parse(JOURNAL_PATH).expect("journal path is a valid constant")
}

/// Returns `true` if the path lies in the reserved metadata subtree.
pub fn is_reserved(path: &StoragePath) -> bool {
    path.is_under_component(META_COMPONENT)
}

/// One leaf-level change to fold into the meta table.
#[derive(Clone, Debug)]
pub enum LeafChange<'a> {
    /// The leaf now holds `data`.
    Put { path: StoragePath, data: &'a [u8] },
    /// The leaf no longer exists.
    Remove { path: StoragePath },
}

impl LeafChange<'_> {
    fn path(&self) -> &StoragePath {
        match self {
            LeafChange::Put { path, .. } | LeafChange::Remove { path } => path,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LeafMeta {
    digest: MetaDigest,
    size: u64,
}

#[derive(Clone, Debug, Default)]
struct MetaTable {
    leaves: BTreeMap<StoragePath, LeafMeta>,
    generation: u64,
    root: MetaDigest,
}

impl MetaTable {
    fn recompute_root(&mut self, hasher: &dyn DigestHasher) {
        let digests = self.leaves.values().map(|m| m.digest).collect();
        self.root = merkle_root(hasher, digests);
    }

    /// Leaves at or beneath `path`, in path order.
    fn subtree<'a>(
        &'a self,
        path: &StoragePath,
    ) -> Box<dyn Iterator<Item = (&'a StoragePath, &'a LeafMeta)> + 'a> {
        if path.is_root() {
            return Box::new(self.leaves.iter());
        }
        let exact = self.leaves.get_key_value(path.as_str());
        let prefix = path.child_prefix();
        let below = self
            .leaves
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(move |(p, _)| p.as_str().starts_with(&prefix));
        Box::new(exact.into_iter().chain(below))
    }

    fn snapshot(&self, algorithm: &str) -> MetaSnapshot {
        MetaSnapshot {
            version: SNAPSHOT_VERSION,
            algorithm: algorithm.to_string(),
            generation: self.generation,
            root: self.root,
            leaves: self
                .leaves
                .iter()
                .map(|(path, meta)| LeafRecord {
                    path: path.clone(),
                    digest: meta.digest,
                    size: meta.size,
                })
                .collect(),
        }
    }
}

/// Maintains per-leaf digests and the namespace meta digest.
///
/// The table is `None` until [`load`](Self::load) or
/// [`rebuild`](Self::rebuild) succeeds; every digest query before that
/// returns [`MetaError::NotInitialized`].
pub struct MetaManager {
    backend: Arc<dyn Backend>,
    hasher: Arc<dyn DigestHasher>,
    table: RwLock<Option<MetaTable>>,
    persist: bool,
}

impl MetaManager {
    /// Create an uninitialized manager. With `persist`, every digest change
    /// is journaled to [`journal_path`].
    pub fn new(backend: Arc<dyn Backend>, hasher: Arc<dyn DigestHasher>, persist: bool) -> Self {
        Self {
            backend,
            hasher,
            table: RwLock::new(None),
            persist,
        }
    }

    fn read_table(&self) -> MetaResult<RwLockReadGuard<'_, Option<MetaTable>>> {
        self.table
            .read()
            .map_err(|e| MetaError::Poisoned(e.to_string()))
    }

    fn write_table(&self) -> MetaResult<RwLockWriteGuard<'_, Option<MetaTable>>> {
        self.table
            .write()
            .map_err(|e| MetaError::Poisoned(e.to_string()))
    }

    /// Name of the digest algorithm in use.
    pub fn algorithm(&self) -> &str {
        self.hasher.algorithm()
    }

    /// Whether a digest table is present.
    pub fn is_initialized(&self) -> MetaResult<bool> {
        Ok(self.read_table()?.is_some())
    }

    /// Install the persisted journal, if one exists and is trustworthy.
    ///
    /// Returns `Ok(false)` when there is no journal or it fails validation;
    /// the caller should then [`rebuild`](Self::rebuild).
    pub fn load(&self) -> MetaResult<bool> {
        let Some(bytes) = self.backend.read(&journal_path())? else {
            debug!("no meta journal present");
            return Ok(false);
        };

        let snapshot = match MetaSnapshot::decode(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "discarding unreadable meta journal");
                return Ok(false);
            }
        };
        if !snapshot.verify_root(self.hasher.as_ref()) {
            warn!(
                algorithm = %snapshot.algorithm,
                "meta journal root does not match its records; discarding"
            );
            return Ok(false);
        }

        let mut table = MetaTable {
            generation: snapshot.generation,
            root: snapshot.root,
            ..MetaTable::default()
        };
        for record in snapshot.leaves {
            if is_reserved(&record.path) {
                continue;
            }
            table.leaves.insert(
                record.path,
                LeafMeta {
                    digest: record.digest,
                    size: record.size,
                },
            );
        }

        info!(
            generation = table.generation,
            leaves = table.leaves.len(),
            root = %table.root.short_hex(),
            "meta journal loaded"
        );
        *self.write_table()? = Some(table);
        Ok(true)
    }

    /// Recompute every digest from backend content.
    ///
    /// Leaves that vanish between enumeration and reading are skipped. A
    /// journal write failure is logged and does not fail the rebuild.
    pub fn rebuild(&self) -> MetaResult<MetaDigest> {
        let mut guard = self.write_table()?;
        let previous_generation = guard.as_ref().map_or(0, |t| t.generation);

        let mut table = MetaTable {
            generation: previous_generation + 1,
            ..MetaTable::default()
        };
        for (path, _) in self.backend.leaves(&StoragePath::root())? {
            if is_reserved(&path) {
                continue;
            }
            let Some(data) = self.backend.read(&path)? else {
                debug!(path = %path, "leaf vanished during rebuild");
                continue;
            };
            table.leaves.insert(
                path.clone(),
                LeafMeta {
                    digest: self.hasher.hash_leaf(&path, &data),
                    size: data.len() as u64,
                },
            );
        }
        table.recompute_root(self.hasher.as_ref());

        if let Err(e) = self.persist_table(&table) {
            warn!(error = %e, "failed to persist rebuilt meta journal");
        }

        let root = table.root;
        info!(
            generation = table.generation,
            leaves = table.leaves.len(),
            root = %root.short_hex(),
            "meta digest rebuilt"
        );
        *guard = Some(table);
        Ok(root)
    }

    /// Fold leaf changes into the table and journal the result.
    ///
    /// Either every change is applied and persisted, or the table is left
    /// exactly as it was and the error is returned.
    pub fn apply(&self, changes: &[LeafChange<'_>]) -> MetaResult<MetaDigest> {
        let mut guard = self.write_table()?;
        let table = guard.as_mut().ok_or(MetaError::NotInitialized)?;
        if changes.is_empty() {
            return Ok(table.root);
        }

        let prior_root = table.root;
        let prior_generation = table.generation;
        let mut undo: Vec<(StoragePath, Option<LeafMeta>)> = Vec::with_capacity(changes.len());

        for change in changes {
            if is_reserved(change.path()) {
                continue;
            }
            let previous = match change {
                LeafChange::Put { path, data } => table.leaves.insert(
                    path.clone(),
                    LeafMeta {
                        digest: self.hasher.hash_leaf(path, data),
                        size: data.len() as u64,
                    },
                ),
                LeafChange::Remove { path } => table.leaves.remove(path),
            };
            undo.push((change.path().clone(), previous));
        }
        table.recompute_root(self.hasher.as_ref());
        table.generation += 1;

        if let Err(e) = self.persist_table(table) {
            for (path, previous) in undo.into_iter().rev() {
                match previous {
                    Some(meta) => table.leaves.insert(path, meta),
                    None => table.leaves.remove(&path),
                };
            }
            table.root = prior_root;
            table.generation = prior_generation;
            warn!(error = %e, "meta journal write failed; changes reverted");
            return Err(e);
        }

        debug!(
            changes = changes.len(),
            generation = table.generation,
            root = %table.root.short_hex(),
            "meta digest updated"
        );
        Ok(table.root)
    }

    fn persist_table(&self, table: &MetaTable) -> MetaResult<()> {
        if !self.persist {
            return Ok(());
        }
        let bytes = table.snapshot(self.hasher.algorithm()).encode()?;
        self.backend.write(&journal_path(), &bytes)?;
        Ok(())
    }

    /// The namespace meta digest.
    pub fn root_digest(&self) -> MetaResult<MetaDigest> {
        let guard = self.read_table()?;
        guard
            .as_ref()
            .map(|t| t.root)
            .ok_or(MetaError::NotInitialized)
    }

    /// Merkle root over the leaves at or beneath `path`.
    ///
    /// For the root path this equals [`root_digest`](Self::root_digest). An
    /// empty subtree yields the null digest.
    pub fn subtree_digest(&self, path: &StoragePath) -> MetaResult<MetaDigest> {
        let guard = self.read_table()?;
        let table = guard.as_ref().ok_or(MetaError::NotInitialized)?;
        let digests = table.subtree(path).map(|(_, m)| m.digest).collect();
        Ok(merkle_root(self.hasher.as_ref(), digests))
    }

    /// Recorded digest of a single leaf.
    pub fn leaf_digest(&self, path: &StoragePath) -> MetaResult<Option<MetaDigest>> {
        let guard = self.read_table()?;
        let table = guard.as_ref().ok_or(MetaError::NotInitialized)?;
        Ok(table.leaves.get(path).map(|m| m.digest))
    }

    /// Number of tracked leaves.
    pub fn leaf_count(&self) -> MetaResult<usize> {
        let guard = self.read_table()?;
        let table = guard.as_ref().ok_or(MetaError::NotInitialized)?;
        Ok(table.leaves.len())
    }

    /// Number of digest changes since the table was first created.
    pub fn generation(&self) -> MetaResult<u64> {
        let guard = self.read_table()?;
        let table = guard.as_ref().ok_or(MetaError::NotInitialized)?;
        Ok(table.generation)
    }

    /// A consistent copy of the whole table.
    pub fn snapshot(&self) -> MetaResult<MetaSnapshot> {
        let guard = self.read_table()?;
        let table = guard.as_ref().ok_or(MetaError::NotInitialized)?;
        Ok(table.snapshot(self.hasher.algorithm()))
    }

    /// The encoded meta artifact.
    pub fn export(&self) -> MetaResult<Vec<u8>> {
        self.snapshot()?.encode()
    }

    /// Compare the table with actual backend content.
    pub fn verify(&self) -> MetaResult<IntegrityReport> {
        let guard = self.read_table()?;
        let table = guard.as_ref().ok_or(MetaError::NotInitialized)?;

        let mut report = IntegrityReport {
            expected_root: table.root,
            ..IntegrityReport::default()
        };

        let mut observed: BTreeMap<StoragePath, MetaDigest> = BTreeMap::new();
        for (path, _) in self.backend.leaves(&StoragePath::root())? {
            if is_reserved(&path) {
                continue;
            }
            if let Some(data) = self.backend.read(&path)? {
                let digest = self.hasher.hash_leaf(&path, &data);
                observed.insert(path, digest);
            }
        }

        for (path, digest) in &observed {
            match table.leaves.get(path) {
                Some(meta) if meta.digest == *digest => {}
                Some(_) => report.modified.push(path.clone()),
                None => report.unexpected.push(path.clone()),
            }
        }
        report.missing = table
            .leaves
            .keys()
            .filter(|path| !observed.contains_key(*path))
            .cloned()
            .collect();
        report.actual_root =
            merkle_root(self.hasher.as_ref(), observed.into_values().collect());

        if !report.is_clean() {
            warn!(
                modified = report.modified.len(),
                missing = report.missing.len(),
                unexpected = report.unexpected.len(),
                "integrity verification found discrepancies"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for MetaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaManager")
            .field("algorithm", &self.hasher.algorithm())
            .field("persist", &self.persist)
            .finish_non_exhaustive()
    }
}
