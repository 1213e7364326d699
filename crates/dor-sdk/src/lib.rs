//! High-level SDK for the digital object repository.
//!
//! [`Repository`] ties the low-level blob storage engine to the identifier
//! registry: ingest claims a PID and writes the object record and its
//! datastreams as one unit, modifications run under the object's lock, and
//! purge removes everything again. [`AsyncRepository`] offers the same
//! operations to async callers.

pub mod async_repo;
pub mod config;
pub mod error;
pub mod repository;

pub use async_repo::AsyncRepository;
pub use config::{RegistryConfig, RepositoryConfig};
pub use error::{SdkError, SdkResult};
pub use repository::{
    DatastreamInput, IngestReceipt, IngestRequest, PurgeReport, Repository, StoredBlob,
};

// Re-export key types
pub use dor_crypto::ContentDigest;
pub use dor_registry::{ClaimState, IdentifierRegistry};
pub use dor_store::{AuditReport, BlobReader, LowlevelStorage, Orphan, RebuildReport, StorageConfig};
pub use dor_types::{DatastreamToken, Hints, Pid};
