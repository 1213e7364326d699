//! Low-level blob storage for the digital object repository.
//!
//! Object records and datastream content are stored as opaque blobs in two
//! independent [`BlobStore`]s. Callers address blobs by token (a PID or a
//! datastream token); a [`KeyMapper`] turns each token into an internal id
//! with hashed directory fan-out, and back.
//!
//! # Backends
//!
//! All backends implement the [`BlobStore`] / [`BlobConnection`] traits:
//!
//! - [`MemoryBlobStore`] -- map-based store for tests and embedding
//! - [`FsBlobStore`] -- one file per blob under a root directory
//!
//! # Engine
//!
//! [`BlobStorageEngine`] implements [`LowlevelStorage`] over the two
//! stores. Replacing content on a store without atomic overwrite runs a
//! staged `/new` + `/old` rename protocol, and [`LowlevelStorage::audit`] /
//! [`LowlevelStorage::rebuild`] find and reconcile anything an interrupted
//! replace left behind.
//!
//! # Design Rules
//!
//! 1. A connection belongs to one operation and is closed on every path.
//! 2. `add` never touches existing content.
//! 3. Operations on absent keys fail with `NotFound`.
//! 4. Readers never observe a partially replaced blob.
//! 5. Hints are forwarded to the backend and never interpreted.

pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
mod idlock;
pub mod keymap;
pub mod memory;
pub mod overwrite;
pub mod stream;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-export primary types at crate root for ergonomic imports.
pub use blob::{BlobConnection, BlobId, BlobIdIter, BlobStore, TempKind};
pub use config::{BackendConfig, StorageConfig};
pub use engine::{BlobStorageEngine, StoreScope};
pub use error::{OverwritePhase, StoreError, StoreResult};
pub use fs::FsBlobStore;
pub use keymap::KeyMapper;
pub use memory::MemoryBlobStore;
pub use overwrite::{AuditReport, Orphan, RebuildReport};
pub use stream::{BlobReader, KeyIter};
pub use traits::LowlevelStorage;
