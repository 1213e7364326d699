use std::fmt;
use std::io::Read;

use dor_types::Hints;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Suffix of the staging blob written during a safe overwrite.
pub const STAGING_SUFFIX: &str = "new";

/// Suffix of the backup blob held during a safe overwrite.
pub const BACKUP_SUFFIX: &str = "old";

/// Internal storage id of a blob, produced by a [`KeyMapper`](crate::KeyMapper).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

/// Which temporary a [`BlobId`] names during a safe overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempKind {
    Staging,
    Backup,
}

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `self + "/new"`.
    pub fn staging(&self) -> Self {
        Self(format!("{}/{STAGING_SUFFIX}", self.0))
    }

    /// `self + "/old"`.
    pub fn backup(&self) -> Self {
        Self(format!("{}/{BACKUP_SUFFIX}", self.0))
    }

    /// Split a trailing `/new` or `/old` suffix off this id.
    ///
    /// This is purely syntactic; [`KeyMapper::temporary`](crate::KeyMapper::temporary)
    /// also checks that the base is a well-formed mapped id.
    pub fn split_suffix(&self) -> Option<(BlobId, TempKind)> {
        let (base, suffix) = self.0.rsplit_once('/')?;
        let kind = match suffix {
            STAGING_SUFFIX => TempKind::Staging,
            BACKUP_SUFFIX => TempKind::Backup,
            _ => return None,
        };
        Some((BlobId(base.to_string()), kind))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Iterator over the blob ids held by a connection.
pub type BlobIdIter = Box<dyn Iterator<Item = StoreResult<BlobId>> + Send>;

/// A key/blob storage backend.
///
/// A store hands out connections; every blob operation runs on a
/// connection. A deployment configures exactly two stores, one for object
/// records and one for datastream content.
pub trait BlobStore: Send + Sync {
    /// Open a new connection. `hints` are forwarded from the caller as-is.
    fn open(&self, hints: &Hints) -> StoreResult<Box<dyn BlobConnection>>;

    /// Whether an overwriting [`BlobConnection::write`] replaces content
    /// atomically, so readers never observe a partial blob.
    fn atomic_overwrite(&self) -> bool;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// A connection to a [`BlobStore`].
///
/// Connections are owned by a single operation and never shared across
/// threads. Implementations must make [`close`](Self::close) idempotent and
/// close themselves on drop if the owner did not.
pub trait BlobConnection: Send {
    fn exists(&mut self, id: &BlobId) -> StoreResult<bool>;

    /// Size in bytes. `NotFound` if absent.
    fn size(&mut self, id: &BlobId) -> StoreResult<u64>;

    /// Open the blob for reading. `NotFound` if absent.
    fn open_reader(&mut self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>>;

    /// Write `content` to `id` and return the number of bytes stored.
    ///
    /// With `overwrite == false` this fails with `AlreadyExists` if the
    /// blob exists and leaves the existing content untouched.
    fn write(
        &mut self,
        id: &BlobId,
        content: &mut dyn Read,
        overwrite: bool,
        hints: &Hints,
    ) -> StoreResult<u64>;

    /// Delete a blob. `NotFound` if absent.
    fn delete(&mut self, id: &BlobId) -> StoreResult<()>;

    /// Move a blob. `NotFound` if `from` is absent, `AlreadyExists` if
    /// `to` is present.
    fn rename(&mut self, from: &BlobId, to: &BlobId) -> StoreResult<()>;

    /// Blob ids starting with `prefix` (all ids if `None`).
    fn list(&mut self, prefix: Option<&str>) -> StoreResult<BlobIdIter>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
