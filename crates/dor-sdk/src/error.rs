use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid identifier: {0}")]
    Identifier(#[from] dor_types::TypeError),

    #[error("store error: {0}")]
    Store(#[from] dor_store::StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] dor_registry::RegistryError),

    #[error("checksum mismatch for {token}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        token: String,
        expected: String,
        computed: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("blocking task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// Absent object, datastream or registration.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) => e.is_not_found(),
            Self::Registry(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Unusable settings in either the storage or the registry section.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Store(e) => e.is_configuration(),
            Self::Registry(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// Duplicate ingest, claim or add.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Store(e) => e.is_already_exists(),
            Self::Registry(e) => e.is_already_exists(),
            _ => false,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
