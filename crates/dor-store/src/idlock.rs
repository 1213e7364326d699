//! Per-id exclusion for the engine's mutating operations.
//!
//! Add, replace, remove and the reconciliation sweep each hold the lock of
//! the base id they touch, so a replace's `/new` and `/old` temporaries are
//! never seen as leftovers by another operation on the same key. Different
//! ids never wait for each other.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::warn;

use crate::blob::BlobId;
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub(crate) struct IdLocks {
    held: Mutex<HashSet<BlobId>>,
    released: Condvar,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("id lock table poisoned".into())
}

impl IdLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> StoreResult<MutexGuard<'_, HashSet<BlobId>>> {
        self.held.lock().map_err(poisoned)
    }

    /// Block until `id` is free, then hold it until the guard drops.
    pub(crate) fn lock(&self, id: &BlobId) -> StoreResult<IdGuard<'_>> {
        let mut held = self.held()?;
        while held.contains(id) {
            held = self.released.wait(held).map_err(poisoned)?;
        }
        held.insert(id.clone());
        Ok(IdGuard {
            locks: self,
            id: id.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, id: &BlobId) -> bool {
        self.held().map(|h| h.contains(id)).unwrap_or(false)
    }
}

impl std::fmt::Debug for IdLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = self.held().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("IdLocks").field("held", &held).finish()
    }
}

pub(crate) struct IdGuard<'a> {
    locks: &'a IdLocks,
    id: BlobId,
}

impl Drop for IdGuard<'_> {
    fn drop(&mut self) {
        match self.locks.held.lock() {
            Ok(mut held) => {
                held.remove(&self.id);
            }
            Err(_) => warn!(id = %self.id, "id lock table poisoned on release"),
        }
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn guard_releases_on_drop() {
        let locks = IdLocks::new();
        let id = BlobId::new("file:k");
        {
            let _guard = locks.lock(&id).unwrap();
            assert!(locks.is_held(&id));
        }
        assert!(!locks.is_held(&id));
    }

    #[test]
    fn same_id_is_exclusive_and_other_ids_are_not() {
        let locks = Arc::new(IdLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let n = 6;
        let barrier = Arc::new(Barrier::new(n));

        let _other = locks.lock(&BlobId::new("file:other")).unwrap();
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        let _g = locks.lock(&BlobId::new("file:k")).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!locks.is_held(&BlobId::new("file:k")));
    }
}
