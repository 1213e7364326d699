//! Race-free identifier claims.
//!
//! A claim takes the identifier's key lock before looking at the registry
//! and keeps it until the caller commits or abandons the claim. The
//! check-then-insert sequence and the content writes that follow it run as
//! one critical section per identifier, while unrelated identifiers proceed
//! in parallel.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{RegistryError, Result};
use crate::lock::{KeyLockGuard, KeyLockTable};
use crate::traits::IdentifierRegistry;
use crate::types::{ClaimState, RegistryRecord};

/// Serializes claims on a registry through a shared lock table.
#[derive(Clone)]
pub struct ClaimCoordinator {
    registry: Arc<dyn IdentifierRegistry>,
    locks: Arc<KeyLockTable>,
}

impl ClaimCoordinator {
    pub fn new(registry: Arc<dyn IdentifierRegistry>, locks: Arc<KeyLockTable>) -> Self {
        Self { registry, locks }
    }

    pub fn registry(&self) -> &Arc<dyn IdentifierRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<KeyLockTable> {
        &self.locks
    }

    /// Exclusively claim `token`.
    ///
    /// On success the token is inserted in the registry and its lock is held
    /// by the returned [`Claim`]. `AlreadyExists` if the token is registered.
    pub fn claim(&self, token: &str) -> Result<Claim<'_>> {
        let guard = self.locks.guard(token)?;

        if self.registry.contains(token)? {
            debug!(token, "claim refused: already registered");
            return Err(RegistryError::AlreadyExists {
                token: token.to_string(),
            });
        }
        let record = self.registry.insert(token)?;

        debug!(token, "identifier claimed");
        Ok(Claim {
            coordinator: self,
            record,
            state: ClaimState::Claiming,
            guard: Some(guard),
        })
    }

    /// Hold `token`'s lock without claiming, for work on a registered
    /// identifier.
    pub fn lock(&self, token: &str) -> Result<KeyLockGuard<'_>> {
        self.locks.guard(token)
    }

    /// Unregister `token`, returning it to `Unclaimed`.
    pub fn release(&self, token: &str) -> Result<()> {
        let _guard = self.locks.guard(token)?;
        self.registry.remove(token)?;
        debug!(token, "identifier released");
        Ok(())
    }

    /// Registered or unclaimed, as seen by the registry.
    pub fn state(&self, token: &str) -> Result<ClaimState> {
        Ok(if self.registry.contains(token)? {
            ClaimState::Registered
        } else {
            ClaimState::Unclaimed
        })
    }
}

impl std::fmt::Debug for ClaimCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCoordinator")
            .field("registry", &self.registry.describe())
            .field("locks", &self.locks)
            .finish()
    }
}

/// An identifier in the `Claiming` state.
///
/// Commit once the content is written. Dropping an uncommitted claim
/// removes the registry entry again, so a failed ingest never leaves a
/// registered identifier without content.
#[must_use = "an uncommitted claim is rolled back on drop"]
pub struct Claim<'a> {
    coordinator: &'a ClaimCoordinator,
    record: RegistryRecord,
    state: ClaimState,
    guard: Option<KeyLockGuard<'a>>,
}

impl Claim<'_> {
    pub fn token(&self) -> &str {
        &self.record.token
    }

    pub fn record(&self) -> &RegistryRecord {
        &self.record
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    /// Keep the registration and release the lock.
    pub fn commit(mut self) -> ClaimState {
        self.state = ClaimState::Registered;
        drop(self.guard.take());
        debug!(token = %self.record.token, "claim committed");
        self.state
    }

    /// Roll the registration back and release the lock.
    pub fn abort(mut self) -> Result<ClaimState> {
        let result = self.rollback();
        self.state = ClaimState::Failed;
        drop(self.guard.take());
        result.map(|_| ClaimState::Failed)
    }

    fn rollback(&self) -> Result<()> {
        match self.coordinator.registry.remove(&self.record.token) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.state != ClaimState::Claiming {
            return;
        }
        warn!(token = %self.record.token, "uncommitted claim dropped; rolling back");
        if let Err(e) = self.rollback() {
            warn!(token = %self.record.token, error = %e, "claim rollback failed");
        }
        self.state = ClaimState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;
    use std::sync::Barrier;
    use std::thread;

    fn coordinator() -> ClaimCoordinator {
        ClaimCoordinator::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(KeyLockTable::new()),
        )
    }

    // ---- Claim lifecycle ----

    #[test]
    fn claim_and_commit() {
        let c = coordinator();
        let claim = c.claim("demo:1").unwrap();
        assert_eq!(claim.state(), ClaimState::Claiming);
        assert_eq!(claim.token(), "demo:1");
        assert!(c.locks().is_locked("demo:1"));

        assert_eq!(claim.commit(), ClaimState::Registered);
        assert!(!c.locks().is_locked("demo:1"));
        assert_eq!(c.state("demo:1").unwrap(), ClaimState::Registered);
    }

    #[test]
    fn second_claim_fails_already_exists() {
        let c = coordinator();
        c.claim("demo:1").unwrap().commit();
        let err = c.claim("demo:1").err().unwrap();
        assert!(err.is_already_exists());
        assert!(!c.locks().is_locked("demo:1"));
    }

    #[test]
    fn abort_rolls_back() {
        let c = coordinator();
        let claim = c.claim("demo:1").unwrap();
        assert_eq!(claim.abort().unwrap(), ClaimState::Failed);
        assert_eq!(c.state("demo:1").unwrap(), ClaimState::Unclaimed);
        assert_eq!(c.locks().live_locks(), 0);
    }

    #[test]
    fn dropped_claim_rolls_back() {
        let c = coordinator();
        {
            let _claim = c.claim("demo:1").unwrap();
            assert_eq!(c.state("demo:1").unwrap(), ClaimState::Registered);
        }
        assert_eq!(c.state("demo:1").unwrap(), ClaimState::Unclaimed);
        // Nothing orphaned: the identifier can be claimed again.
        c.claim("demo:1").unwrap().commit();
    }

    #[test]
    fn release_returns_to_unclaimed() {
        let c = coordinator();
        c.claim("demo:1").unwrap().commit();
        c.release("demo:1").unwrap();
        assert_eq!(c.state("demo:1").unwrap(), ClaimState::Unclaimed);
        assert!(c.release("demo:1").unwrap_err().is_not_found());
    }

    #[test]
    fn release_inside_held_lock_is_reentrant() {
        let c = coordinator();
        c.claim("demo:1").unwrap().commit();
        let _guard = c.lock("demo:1").unwrap();
        c.release("demo:1").unwrap();
        assert!(c.locks().is_locked("demo:1"));
    }

    #[test]
    fn empty_token_rejected() {
        let c = coordinator();
        assert!(matches!(
            c.claim("").err().unwrap(),
            RegistryError::InvalidArgument(_)
        ));
    }

    // ---- Concurrency ----

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let c = Arc::new(coordinator());
        let n = 16;
        let barrier = Arc::new(Barrier::new(n));

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let c = Arc::clone(&c);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    c.claim("x").map(|claim| claim.commit())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let dups = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_exists()))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(dups, n - 1);
        assert_eq!(c.locks().live_locks(), 0);
    }

    #[test]
    fn failed_claim_holder_lets_next_thread_win() {
        let c = Arc::new(coordinator());
        let n = 8;
        let barrier = Arc::new(Barrier::new(n));

        // Every thread that wins the claim abandons it, as if its content
        // write failed; no thread should ever see a stale registration.
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let c = Arc::clone(&c);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    match c.claim("y") {
                        Ok(claim) => claim.abort().map(|_| ()),
                        Err(e) => Err(e),
                    }
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
        assert_eq!(c.state("y").unwrap(), ClaimState::Unclaimed);
    }
}
