//! Restore protocol for SecStore.
//!
//! When the medium under a [`PathStore`](secstore_store::PathStore) is
//! changed behind its back (backup restore, factory reset), the
//! [`RestoreCoordinator`] rebuilds the integrity metadata from scratch and
//! then tells every registered handler about it through the
//! [`RestoreRegistry`].
//!
//! Ordering guarantees:
//! - The rebuild completes before the first handler runs.
//! - Each handler sees each [`RestoreEvent`] at most once.
//! - Concurrent restore triggers are serialized; each one produces its own
//!   rebuild and its own notification round.

pub mod coordinator;
pub mod event;
pub mod registry;

pub use coordinator::{RestoreCoordinator, RestoreState};
pub use event::RestoreEvent;
pub use registry::{HandlerRef, RestoreHandler, RestoreRegistry, RestoreStream};
