//! Error types for registry and lock operations.

use thiserror::Error;

/// Errors that can occur during registry and lock operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The identifier is already registered.
    #[error("identifier already registered: {token}")]
    AlreadyExists { token: String },

    /// The identifier is not registered.
    #[error("identifier not registered: {token}")]
    NotFound { token: String },

    /// An empty or otherwise unusable identifier.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The registry could not be set up, e.g. an unusable layout pattern.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unlock by a thread that does not hold the lock, or a poisoned lock.
    #[error("lock state error on {token:?}: {reason}")]
    LockState { token: String, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error during file-based registry operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Convenience type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
