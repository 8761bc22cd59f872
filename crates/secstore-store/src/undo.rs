use tracing::error;

use secstore_backend::Backend;
use secstore_types::StoragePath;

use crate::error::StoreResult;

enum UndoAction {
    /// Put these bytes back at the path.
    Restore { path: StoragePath, data: Vec<u8> },
    /// Remove the leaf the operation created.
    Remove { path: StoragePath },
}

/// Backend-level compensation log for multi-step mutations.
///
/// Each step records how to reverse itself before it runs. On failure,
/// [`rollback`](Self::rollback) replays the reversals newest first.
pub(crate) struct UndoLog<'a> {
    backend: &'a dyn Backend,
    actions: Vec<UndoAction>,
}

impl<'a> UndoLog<'a> {
    pub(crate) fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            actions: Vec::new(),
        }
    }

    /// Remember the current state of `path` before it is overwritten.
    pub(crate) fn before_write(&mut self, path: &StoragePath) -> StoreResult<()> {
        let action = match self.backend.read(path)? {
            Some(data) => UndoAction::Restore {
                path: path.clone(),
                data,
            },
            None => UndoAction::Remove { path: path.clone() },
        };
        self.actions.push(action);
        Ok(())
    }

    /// Remember bytes that are about to be removed.
    pub(crate) fn before_remove(&mut self, path: &StoragePath, data: Vec<u8>) {
        self.actions.push(UndoAction::Restore {
            path: path.clone(),
            data,
        });
    }

    /// Reverse every recorded step. Returns `false` if any reversal failed.
    pub(crate) fn rollback(self) -> bool {
        let mut clean = true;
        for action in self.actions.into_iter().rev() {
            let result = match &action {
                UndoAction::Restore { path, data } => self.backend.write(path, data),
                UndoAction::Remove { path } => self.backend.remove(path).map(|_| ()),
            };
            if let Err(e) = result {
                let path = match &action {
                    UndoAction::Restore { path, .. } | UndoAction::Remove { path } => path,
                };
                error!(path = %path, error = %e, "rollback step failed");
                clean = false;
            }
        }
        clean
    }
}
