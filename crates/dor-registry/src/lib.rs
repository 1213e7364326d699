//! Identifier registry and per-identifier locking.
//!
//! Guarantees that each identifier is claimed by exactly one ingest, even
//! when many threads race for it.
//!
//! # Modules
//!
//! - [`error`]: Error types for registry and lock operations
//! - [`types`]: [`RegistryRecord`] and the [`ClaimState`] lifecycle
//! - [`traits`]: The [`IdentifierRegistry`] trait
//! - [`memory`]: In-memory [`InMemoryRegistry`] for tests
//! - [`fs`]: File-backed [`FsRegistry`]
//! - [`lock`]: Reentrant per-token [`KeyLockTable`]
//! - [`claim`]: [`ClaimCoordinator`] and the [`Claim`] handle

pub mod claim;
pub mod error;
pub mod fs;
pub mod lock;
pub mod memory;
pub mod traits;
pub mod types;

pub use claim::{Claim, ClaimCoordinator};
pub use error::{RegistryError, Result};
pub use fs::FsRegistry;
pub use lock::{KeyLockGuard, KeyLockTable};
pub use memory::InMemoryRegistry;
pub use traits::IdentifierRegistry;
pub use types::{ClaimState, RegistryRecord};
