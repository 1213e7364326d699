//! Per-identifier reentrant locks.
//!
//! [`KeyLockTable`] hands out one lock per live token. A slot is created on
//! first use and dropped from the table once nobody holds or waits for it,
//! so the table only ever contains tokens that are in use. Locks are owned
//! by threads: the holder may lock again, and only the holder may unlock.
//!
//! Lock order is always table, then slot.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::{trace, warn};

use crate::error::{RegistryError, Result};

#[derive(Default)]
struct SlotState {
    owner: Option<ThreadId>,
    depth: usize,
    /// The holder plus every thread waiting for the slot.
    users: usize,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    released: Condvar,
}

/// Table of named, thread-reentrant mutexes.
#[derive(Default)]
pub struct KeyLockTable {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

fn poisoned(token: &str) -> RegistryError {
    RegistryError::LockState {
        token: token.to_string(),
        reason: "lock table poisoned".into(),
    }
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, token: &str) -> Result<MutexGuard<'_, HashMap<String, Arc<Slot>>>> {
        self.slots.lock().map_err(|_| poisoned(token))
    }

    /// Block until the calling thread holds the lock for `token`.
    ///
    /// Reentrant: a thread that already holds the lock gets it again and
    /// must unlock once per lock.
    pub fn lock(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "lock token must not be empty".into(),
            ));
        }
        let me = thread::current().id();

        let slot = {
            let mut table = self.table(token)?;
            let slot = Arc::clone(table.entry(token.to_string()).or_default());
            slot.state.lock().map_err(|_| poisoned(token))?.users += 1;
            slot
        };

        let mut state = slot.state.lock().map_err(|_| poisoned(token))?;
        if state.owner == Some(me) {
            state.depth += 1;
            state.users -= 1;
            trace!(token, depth = state.depth, "key lock re-entered");
            return Ok(());
        }
        while state.owner.is_some() {
            state = slot.released.wait(state).map_err(|_| poisoned(token))?;
        }
        state.owner = Some(me);
        state.depth = 1;
        trace!(token, "key lock acquired");
        Ok(())
    }

    /// Release one level of the calling thread's hold on `token`.
    ///
    /// `LockState` if the calling thread does not hold it.
    pub fn unlock(&self, token: &str) -> Result<()> {
        let me = thread::current().id();
        let mut table = self.table(token)?;
        let not_held = || RegistryError::LockState {
            token: token.to_string(),
            reason: "unlock by a thread that does not hold the lock".into(),
        };

        let slot = table.get(token).cloned().ok_or_else(not_held)?;
        let mut state = slot.state.lock().map_err(|_| poisoned(token))?;
        if state.owner != Some(me) {
            return Err(not_held());
        }

        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }
        state.owner = None;
        state.users -= 1;
        if state.users == 0 {
            drop(state);
            table.remove(token);
        } else {
            slot.released.notify_one();
        }
        trace!(token, "key lock released");
        Ok(())
    }

    /// Lock `token` and return a guard that unlocks on drop.
    pub fn guard(&self, token: &str) -> Result<KeyLockGuard<'_>> {
        self.lock(token)?;
        Ok(KeyLockGuard {
            table: self,
            token: token.to_string(),
            _not_send: PhantomData,
        })
    }

    /// Whether any thread holds the lock for `token`.
    pub fn is_locked(&self, token: &str) -> bool {
        let Ok(table) = self.slots.lock() else {
            return false;
        };
        table
            .get(token)
            .and_then(|slot| slot.state.lock().ok().map(|s| s.owner.is_some()))
            .unwrap_or(false)
    }

    /// Tokens currently present in the table.
    pub fn live_locks(&self) -> usize {
        self.slots.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for KeyLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLockTable")
            .field("live_locks", &self.live_locks())
            .finish()
    }
}

/// Holds one level of a [`KeyLockTable`] lock. Unlocks on drop.
///
/// Not `Send`: the lock belongs to the thread that took it.
#[must_use = "the lock is released when the guard is dropped"]
pub struct KeyLockGuard<'a> {
    table: &'a KeyLockTable,
    token: String,
    _not_send: PhantomData<*const ()>,
}

impl KeyLockGuard<'_> {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.table.unlock(&self.token) {
            warn!(token = %self.token, error = %e, "failed to release key lock");
        }
    }
}
