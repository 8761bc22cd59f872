use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use secstore_store::{PathStore, StoreResult};

use crate::event::RestoreEvent;
use crate::registry::RestoreRegistry;

/// Phase of the restore protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreState {
    Normal,
    /// A rebuild or its notification round is in progress.
    Restoring,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreState::Normal => f.write_str("normal"),
            RestoreState::Restoring => f.write_str("restoring"),
        }
    }
}

/// Resets the restoring flag even if a handler panics.
struct RestoringFlag<'a>(&'a AtomicBool);

impl<'a> RestoringFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RestoringFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives Normal → Restoring → rebuild → notify → Normal.
pub struct RestoreCoordinator {
    store: Arc<PathStore>,
    registry: Arc<RestoreRegistry>,
    /// Serializes restore triggers.
    trigger: Mutex<()>,
    restoring: AtomicBool,
    last_event: AtomicU64,
}

impl RestoreCoordinator {
    pub fn new(store: Arc<PathStore>, registry: Arc<RestoreRegistry>) -> Self {
        Self {
            store,
            registry,
            trigger: Mutex::new(()),
            restoring: AtomicBool::new(false),
            last_event: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RestoreState {
        if self.restoring.load(Ordering::SeqCst) {
            RestoreState::Restoring
        } else {
            RestoreState::Normal
        }
    }

    pub fn registry(&self) -> &Arc<RestoreRegistry> {
        &self.registry
    }

    /// Number of completed restore rounds.
    pub fn restore_count(&self) -> u64 {
        self.last_event.load(Ordering::SeqCst)
    }

    /// Rebuild the metadata from backend content, then notify handlers.
    ///
    /// If the rebuild fails no handler is invoked and the error is
    /// returned; the store keeps serving with its previous digest.
    pub fn reinit(&self) -> StoreResult<RestoreEvent> {
        let _serial = self.trigger.lock().unwrap_or_else(PoisonError::into_inner);
        let _flag = RestoringFlag::raise(&self.restoring);
        info!("restore signalled; rebuilding meta data");

        let digest = match self.store.rebuild_meta() {
            Ok(digest) => digest,
            Err(e) => {
                warn!(error = %e, "meta rebuild after restore failed");
                return Err(e);
            }
        };
        let leaf_count = self.store.leaf_count()?;

        let id = self.last_event.fetch_add(1, Ordering::SeqCst) + 1;
        let event = RestoreEvent::new(id, digest, leaf_count);
        let notified = self.registry.notify(&event);
        info!(
            event = id,
            root = %digest.short_hex(),
            leaves = leaf_count,
            notified,
            "restore complete"
        );
        Ok(event)
    }
}

impl fmt::Debug for RestoreCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreCoordinator")
            .field("state", &self.state())
            .field("restore_count", &self.restore_count())
            .field("registry", &self.registry)
            .finish()
    }
}
