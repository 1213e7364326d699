use std::fmt;

use crate::blob::BlobId;

/// Step of the safe-overwrite protocol at which a replace failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverwritePhase {
    /// Writing the new content to `key/new`.
    Stage,
    /// Renaming `key` to `key/old`.
    Backup,
    /// Renaming `key/new` to `key`.
    Commit,
}

impl fmt::Display for OverwritePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage => write!(f, "stage"),
            Self::Backup => write!(f, "backup"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Errors from blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An add targeted a key that already holds content.
    #[error("already exists: {key}")]
    AlreadyExists { key: String },

    /// The key (or blob id) holds no content.
    #[error("not found: {key}")]
    NotFound { key: String },

    /// A hash-path pattern or other construction parameter is invalid.
    #[error("invalid hash-path pattern {pattern:?}: {reason}")]
    Configuration { pattern: String, reason: String },

    /// The key cannot be mapped to or from an internal id.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// A replace failed partway through the safe-overwrite protocol.
    ///
    /// When `orphans` is empty the stored content is exactly what it was
    /// before the call. Otherwise it lists the `/new` and `/old` blobs that
    /// must be reconciled, by hand or by `rebuild`.
    #[error("storage fault in {phase} phase for {key}: {reason} (orphaned blobs: {orphans:?})")]
    StorageFault {
        key: String,
        phase: OverwritePhase,
        reason: String,
        orphans: Vec<BlobId>,
    },

    /// The connection was used after it was closed.
    #[error("connection is closed")]
    Closed,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
