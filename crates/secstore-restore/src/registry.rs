use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::event::RestoreEvent;

/// Callback invoked once per restore event.
pub type RestoreHandler = Arc<dyn Fn(&RestoreEvent) + Send + Sync>;

/// A broadcast channel receiver for restore events.
pub type RestoreStream = broadcast::Receiver<RestoreEvent>;

/// Default capacity of the broadcast channel behind [`RestoreRegistry::subscribe`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Opaque reference to one handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerRef(u64);

impl HandlerRef {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

struct Registration {
    handle: HandlerRef,
    handler: RestoreHandler,
    /// Highest event id already delivered to this handler.
    delivered: u64,
}

/// Table of restore handlers, owned by the storage subsystem.
///
/// Registrations are additive and live until removed, cleared, or the
/// registry is dropped. Handlers run on the notifying thread, outside the
/// registry lock, so a handler may register or remove handlers itself.
/// A panicking handler unwinds through [`notify`](Self::notify).
pub struct RestoreRegistry {
    handlers: Mutex<Vec<Registration>>,
    next_handle: AtomicU64,
    sender: broadcast::Sender<RestoreEvent>,
}

impl RestoreRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            handlers: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            sender,
        }
    }

    // A panicking handler never holds this lock, so the table stays sound.
    fn table(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler. Every registration is invoked independently,
    /// even if the same closure is registered twice.
    pub fn set_handler<F>(&self, handler: F) -> HandlerRef
    where
        F: Fn(&RestoreEvent) + Send + Sync + 'static,
    {
        let handle = HandlerRef(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.table().push(Registration {
            handle,
            handler: Arc::new(handler),
            delivered: 0,
        });
        debug!(%handle, "restore handler registered");
        handle
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn remove_handler(&self, handle: HandlerRef) -> bool {
        let mut table = self.table();
        let before = table.len();
        table.retain(|r| r.handle != handle);
        before != table.len()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let removed = {
            let mut table = self.table();
            let n = table.len();
            table.clear();
            n
        };
        debug!(removed, "restore handlers cleared");
    }

    /// Number of live registrations.
    pub fn handler_count(&self) -> usize {
        self.table().len()
    }

    /// Receive restore events asynchronously. Lagging receivers lose the
    /// oldest events, as with any `tokio` broadcast channel.
    pub fn subscribe(&self) -> RestoreStream {
        self.sender.subscribe()
    }

    /// Number of live async subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver `event` to every handler that has not seen it yet, then to
    /// async subscribers. Returns the number of handlers invoked.
    pub fn notify(&self, event: &RestoreEvent) -> usize {
        let due: Vec<(HandlerRef, RestoreHandler)> = {
            let mut table = self.table();
            table
                .iter_mut()
                .filter(|r| r.delivered < event.id)
                .map(|r| {
                    r.delivered = event.id;
                    (r.handle, r.handler.clone())
                })
                .collect()
        };

        for (handle, handler) in &due {
            debug!(%handle, event = event.id, "invoking restore handler");
            handler(event);
        }

        // No receivers is not an error.
        let _ = self.sender.send(event.clone());
        due.len()
    }
}

impl Default for RestoreRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl fmt::Debug for RestoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreRegistry")
            .field("handlers", &self.handler_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
