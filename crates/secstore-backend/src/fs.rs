use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use secstore_types::{Entry, EntryKind, SpaceStats, StoragePath, RESERVED_COMPONENT};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{BackendError, BackendResult};
use crate::traits::Backend;

/// Directory under the reserved subtree that holds in-flight leaf copies.
const STAGING_DIR: &str = "staging";

#[derive(Debug)]
struct FsState {
    /// Bytes held by all leaves outside the staging directory.
    used: u64,
}

/// Filesystem backend rooted at a directory.
///
/// Each storage path maps to the same relative path under the root. Leaves
/// are regular files; directories are real directories, pruned as soon as
/// their last leaf is removed so they stay implicit.
///
/// Leaf replacement writes and syncs a temporary file in a staging directory
/// inside the reserved subtree, then renames it over the target, so readers
/// never observe a torn leaf and no client name is ever mistaken for a
/// temporary file. Directory creation, the final rename and pruning all run
/// under one mutex, which also guards the used-bytes counter, so a prune
/// never removes a directory another writer is about to fill and capacity
/// checks cannot interleave.
///
/// The root directory itself must exist: if it disappears (unmounted
/// medium), every operation fails with [`BackendError::Unavailable`].
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
    staging: PathBuf,
    capacity: u64,
    state: Mutex<FsState>,
}

impl FsBackend {
    /// Open an existing root directory, reporting `capacity` bytes as total
    /// space. Staged files and empty directories left by an earlier crash
    /// are removed.
    pub fn open(root: impl AsRef<Path>, capacity: u64) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(BackendError::Unavailable(format!(
                "storage root {} is not a directory",
                root.display()
            )));
        }
        let staging = root.join(RESERVED_COMPONENT).join(STAGING_DIR);
        let backend = Self {
            root,
            staging,
            capacity,
            state: Mutex::new(FsState { used: 0 }),
        };
        let (removed, failed) = backend.purge_orphans();
        if removed > 0 || failed > 0 {
            info!(removed, failed, root = %backend.root.display(), "cleaned up orphaned staged files");
        }
        backend.rescan()?;
        Ok(backend)
    }

    /// Create the root directory if needed, then [`Self::open`] it.
    pub fn create(root: impl AsRef<Path>, capacity: u64) -> BackendResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        Self::open(root, capacity)
    }

    /// The physical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state(&self) -> BackendResult<MutexGuard<'_, FsState>> {
        self.state
            .lock()
            .map_err(|e| BackendError::Fault(format!("lock poisoned: {e}")))
    }

    fn resolve(&self, path: &StoragePath) -> PathBuf {
        path.components()
            .fold(self.root.clone(), |acc, c| acc.join(c))
    }

    fn ensure_available(&self) -> BackendResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "storage root {} is missing",
                self.root.display()
            )))
        }
    }

    fn map_io(&self, err: std::io::Error, path: &StoragePath, requested: u64) -> BackendError {
        match err.kind() {
            ErrorKind::NotFound => BackendError::NotFound(path.clone()),
            ErrorKind::StorageFull => BackendError::NoSpace {
                requested,
                available: 0,
            },
            ErrorKind::PermissionDenied => BackendError::Unavailable(err.to_string()),
            _ => BackendError::Io(err),
        }
    }

    fn kind_of(&self, physical: &Path) -> Option<EntryKind> {
        match fs::symlink_metadata(physical) {
            Ok(meta) if meta.is_dir() => Some(EntryKind::Directory),
            Ok(meta) if meta.is_file() => Some(EntryKind::File),
            _ => None,
        }
    }

    fn file_len(&self, physical: &Path) -> u64 {
        match fs::symlink_metadata(physical) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        }
    }

    /// Reject paths that would sit beneath a leaf or replace a directory.
    fn check_placement(&self, path: &StoragePath) -> BackendResult<()> {
        if path.is_root() {
            return Err(BackendError::IsDirectory(path.clone()));
        }
        for ancestor in path.ancestors() {
            if ancestor.is_root() {
                continue;
            }
            if self.kind_of(&self.resolve(&ancestor)) == Some(EntryKind::File) {
                return Err(BackendError::NotADirectory(ancestor));
            }
        }
        if self.kind_of(&self.resolve(path)) == Some(EntryKind::Directory) {
            return Err(BackendError::IsDirectory(path.clone()));
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to (not including) the root.
    /// Callers hold the state lock.
    fn prune_empty_dirs(&self, start: Option<&Path>) {
        let mut current = start.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk.
            if fs::remove_dir(&dir).is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }

    fn purge_orphans(&self) -> (usize, usize) {
        let mut removed = 0;
        let mut failed = 0;
        for entry in WalkDir::new(&self.staging).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove staged file");
                    failed += 1;
                }
            }
        }
        for entry in WalkDir::new(&self.root)
            .contents_first(true)
            .into_iter()
            .flatten()
            .filter(|e| e.path() != self.root && e.file_type().is_dir())
        {
            let _ = fs::remove_dir(entry.path());
        }
        (removed, failed)
    }

    /// Create an empty staged file. The staging directory is created under
    /// the state lock so a concurrent prune cannot remove it in between.
    fn stage(&self, path: &StoragePath, requested: u64) -> BackendResult<tempfile::NamedTempFile> {
        let _state = self.state()?;
        fs::create_dir_all(&self.staging).map_err(|e| self.map_io(e, path, requested))?;
        tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.staging)
            .map_err(|e| self.map_io(e, path, requested))
    }
}

impl Backend for FsBackend {
    fn read(&self, path: &StoragePath) -> BackendResult<Option<Vec<u8>>> {
        self.ensure_available()?;
        let physical = self.resolve(path);
        if self.kind_of(&physical) != Some(EntryKind::File) {
            return Ok(None);
        }
        match fs::read(&physical) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.map_io(e, path, 0)),
        }
    }

    fn write(&self, path: &StoragePath, data: &[u8]) -> BackendResult<()> {
        self.ensure_available()?;
        self.check_placement(path)?;
        let requested = data.len() as u64;

        let mut temp = self.stage(path, requested)?;
        temp.write_all(data)
            .map_err(|e| self.map_io(e, path, requested))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| self.map_io(e, path, requested))?;

        let physical = self.resolve(path);
        let parent = physical
            .parent()
            .ok_or_else(|| BackendError::Fault(format!("no parent for {path}")))?;

        let mut state = self.state()?;
        let base = state.used.saturating_sub(self.file_len(&physical));
        let available = self.capacity.saturating_sub(base);
        if requested > available {
            // Dropping `temp` deletes the staged copy.
            return Err(BackendError::NoSpace {
                requested,
                available,
            });
        }
        fs::create_dir_all(parent).map_err(|e| self.map_io(e, path, requested))?;
        temp.persist(&physical)
            .map_err(|e| self.map_io(e.error, path, requested))?;
        state.used = base + requested;

        debug!(path = %path, len = data.len(), "fs leaf written");
        Ok(())
    }

    fn remove(&self, path: &StoragePath) -> BackendResult<bool> {
        self.ensure_available()?;
        let physical = self.resolve(path);
        let mut state = self.state()?;
        if self.kind_of(&physical) != Some(EntryKind::File) {
            return Ok(false);
        }
        let len = self.file_len(&physical);
        fs::remove_file(&physical).map_err(|e| self.map_io(e, path, 0))?;
        state.used = state.used.saturating_sub(len);
        self.prune_empty_dirs(physical.parent());
        Ok(true)
    }

    fn kind(&self, path: &StoragePath) -> BackendResult<Option<EntryKind>> {
        self.ensure_available()?;
        if path.is_root() {
            return Ok(Some(EntryKind::Directory));
        }
        Ok(self.kind_of(&self.resolve(path)))
    }

    fn list(&self, path: &StoragePath) -> BackendResult<Vec<Entry>> {
        self.ensure_available()?;
        let physical = self.resolve(path);
        if self.kind_of(&physical) != Some(EntryKind::Directory) {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for item in fs::read_dir(&physical).map_err(|e| self.map_io(e, path, 0))? {
            let item = item?;
            if item.path() == self.staging {
                continue;
            }
            let name = match item.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(name = ?raw, "skipping non-UTF-8 entry");
                    continue;
                }
            };
            let file_type = item.file_type()?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue;
            };
            entries.push(Entry { name, kind });
        }
        Ok(entries)
    }

    fn leaves(&self, path: &StoragePath) -> BackendResult<Vec<(StoragePath, u64)>> {
        self.ensure_available()?;
        let physical = self.resolve(path);
        match self.kind_of(&physical) {
            None => return Ok(Vec::new()),
            Some(EntryKind::File) => {
                let len = fs::metadata(&physical).map_err(|e| self.map_io(e, path, 0))?.len();
                return Ok(vec![(path.clone(), len)]);
            }
            Some(EntryKind::Directory) => {}
        }

        let mut out = Vec::new();
        let walk = WalkDir::new(&physical)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.path() != self.staging);
        for entry in walk {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => self.map_io(io, path, 0),
                None => BackendError::Fault("filesystem loop detected".into()),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&physical).ok().and_then(Path::to_str) {
                Some(rel) => rel.replace(std::path::MAIN_SEPARATOR, "/"),
                None => {
                    warn!(path = %entry.path().display(), "skipping non-UTF-8 leaf");
                    continue;
                }
            };
            match path.join(&rel) {
                Ok(leaf) => {
                    let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    out.push((leaf, len));
                }
                Err(e) => warn!(rel = %rel, error = %e, "skipping unaddressable leaf"),
            }
        }
        Ok(out)
    }

    fn space(&self) -> BackendResult<SpaceStats> {
        self.ensure_available()?;
        let used = self.state()?.used;
        Ok(SpaceStats {
            total: self.capacity,
            free: self.capacity.saturating_sub(used),
        })
    }

    fn rename(&self, dest: &StoragePath, src: &StoragePath) -> BackendResult<bool> {
        self.ensure_available()?;
        if src.is_root() || src.contains(dest) {
            return Err(BackendError::IsDirectory(dest.clone()));
        }
        let from = self.resolve(src);
        let to = self.resolve(dest);
        let _state = self.state()?;
        if self.kind_of(&from).is_none() {
            return Err(BackendError::NotFound(src.clone()));
        }
        if self.kind_of(&to).is_some() {
            return Err(BackendError::AlreadyExists(dest.clone()));
        }
        for ancestor in dest.ancestors() {
            if !ancestor.is_root() && self.kind_of(&self.resolve(&ancestor)) == Some(EntryKind::File) {
                return Err(BackendError::NotADirectory(ancestor));
            }
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| self.map_io(e, dest, 0))?;
        }
        fs::rename(&from, &to).map_err(|e| self.map_io(e, src, 0))?;
        self.prune_empty_dirs(from.parent());
        debug!(src = %src, dest = %dest, "fs subtree renamed");
        Ok(true)
    }

    fn rescan(&self) -> BackendResult<()> {
        self.ensure_available()?;
        let mut state = self.state()?;
        state.used = self
            .leaves(&StoragePath::root())?
            .iter()
            .map(|(_, size)| size)
            .sum();
        debug!(used = state.used, "fs usage rescanned");
        Ok(())
    }
}
