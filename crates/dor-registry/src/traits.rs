//! The [`IdentifierRegistry`] trait defining the registry interface.

use crate::error::Result;
use crate::types::RegistryRecord;

/// Uniqueness registry for identifiers.
///
/// Implementations must be thread-safe and make [`insert`](Self::insert) an
/// atomic create-if-absent: of any number of concurrent inserts of the same
/// token exactly one succeeds. Serializing the full check-insert-write
/// sequence is the job of [`ClaimCoordinator`](crate::ClaimCoordinator).
pub trait IdentifierRegistry: Send + Sync {
    fn contains(&self, token: &str) -> Result<bool>;

    /// Register `token`. `AlreadyExists` if it is registered.
    fn insert(&self, token: &str) -> Result<RegistryRecord>;

    /// Unregister `token`. `NotFound` if it is not registered.
    fn remove(&self, token: &str) -> Result<()>;

    /// The record for `token`, if registered.
    fn get(&self, token: &str) -> Result<Option<RegistryRecord>>;

    /// All registered tokens, sorted.
    fn list(&self) -> Result<Vec<String>>;

    fn describe(&self) -> String;
}

pub(crate) fn check_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(crate::error::RegistryError::InvalidArgument(
            "identifier must not be empty".into(),
        ));
    }
    Ok(())
}
