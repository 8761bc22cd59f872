//! Subtree exclusion for mutations.
//!
//! A mutation claims every subtree it touches. Two claims conflict when any
//! of their paths overlap (one contains the other), so writes to disjoint
//! subtrees run in parallel while a delete of `/a` waits for a write to
//! `/a/b`. Claims are all-or-nothing, which rules out lock-order deadlocks.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use secstore_types::StoragePath;

use crate::error::{StoreError, StoreResult};

/// Table of subtrees currently claimed by in-flight mutations.
#[derive(Debug)]
pub struct SubtreeLocks {
    held: Mutex<Vec<StoragePath>>,
    released: Condvar,
    timeout: Duration,
}

impl SubtreeLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(Vec::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Claim all `paths`, waiting up to the configured timeout for
    /// conflicting claims to be released.
    pub fn acquire(&self, paths: &[&StoragePath]) -> StoreResult<SubtreeGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|e| StoreError::Fault(format!("lock table poisoned: {e}")))?;

        while conflicts(&held, paths) {
            let now = Instant::now();
            if now >= deadline {
                debug!(?paths, "subtree lock wait timed out");
                return Err(StoreError::Unavailable(format!(
                    "timed out after {:?} waiting for subtree lock",
                    self.timeout
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|e| StoreError::Fault(format!("lock table poisoned: {e}")))?;
            held = guard;
        }

        let claimed: Vec<StoragePath> = paths.iter().map(|p| (*p).clone()).collect();
        held.extend(claimed.iter().cloned());
        Ok(SubtreeGuard {
            locks: self,
            claimed,
        })
    }

    /// Number of subtrees currently claimed.
    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

fn conflicts(held: &[StoragePath], wanted: &[&StoragePath]) -> bool {
    held.iter().any(|h| wanted.iter().any(|w| h.overlaps(w)))
}

/// Releases its claims on drop.
#[must_use = "the claim is released as soon as the guard is dropped"]
pub struct SubtreeGuard<'a> {
    locks: &'a SubtreeLocks,
    claimed: Vec<StoragePath>,
}

impl Drop for SubtreeGuard<'_> {
    fn drop(&mut self) {
        // A poisoned table still has to be cleaned up so waiters can proceed.
        let mut held = match self.locks.held.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        for path in &self.claimed {
            if let Some(idx) = held.iter().position(|h| h == path) {
                held.swap_remove(idx);
            }
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn p(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    #[test]
    fn disjoint_claims_coexist() {
        let locks = SubtreeLocks::new(Duration::from_millis(50));
        let a = p("/a");
        let b = p("/b");
        let _ga = locks.acquire(&[&a]).unwrap();
        let _gb = locks.acquire(&[&b]).unwrap();
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn overlapping_claim_times_out() {
        let locks = SubtreeLocks::new(Duration::from_millis(30));
        let parent = p("/a");
        let child = p("/a/b");
        let _g = locks.acquire(&[&parent]).unwrap();
        let err = locks.acquire(&[&child]).err().unwrap();
        assert!(err.is_retryable());
    }

    #[test]
    fn release_wakes_waiter() {
        let locks = Arc::new(SubtreeLocks::new(Duration::from_secs(5)));
        let path = p("/shared");
        let guard = locks.acquire(&[&path]).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || {
                let path = p("/shared/leaf");
                locks.acquire(&[&path]).map(|_| ()).is_ok()
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
        assert_eq!(locks.held_count(), 0);
    }
}
