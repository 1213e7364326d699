use std::io::Read;

use dor_types::Hints;

use crate::error::StoreResult;
use crate::overwrite::{AuditReport, RebuildReport};
use crate::stream::{BlobReader, KeyIter};

/// Storage call surface consumed by the ingest and retrieval workflow.
///
/// Keys are tokens: a PID for the object store, a datastream token for the
/// datastream store. All implementations must satisfy these invariants:
/// - `add_*` never touches existing content; a duplicate fails with
///   `AlreadyExists`.
/// - `replace_*`, `remove_*`, `retrieve_*` and the size queries fail with
///   `NotFound` on an absent key, never with an empty success.
/// - A replace never exposes partially written content to readers.
/// - `hints` are forwarded to the backend uninterpreted.
pub trait LowlevelStorage: Send + Sync {
    fn add_object(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64>;

    fn add_datastream(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64>;

    fn replace_object(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64>;

    fn replace_datastream(
        &self,
        key: &str,
        content: &mut dyn Read,
        hints: &Hints,
    ) -> StoreResult<u64>;

    fn retrieve_object(&self, key: &str) -> StoreResult<BlobReader>;

    fn retrieve_datastream(&self, key: &str) -> StoreResult<BlobReader>;

    fn remove_object(&self, key: &str) -> StoreResult<()>;

    fn remove_datastream(&self, key: &str) -> StoreResult<()>;

    fn list_objects(&self) -> StoreResult<KeyIter>;

    fn list_datastreams(&self) -> StoreResult<KeyIter>;

    /// Datastream tokens starting with `prefix`.
    fn list_datastreams_with_prefix(&self, prefix: &str) -> StoreResult<KeyIter>;

    fn object_size(&self, key: &str) -> StoreResult<u64>;

    fn datastream_size(&self, key: &str) -> StoreResult<u64>;

    fn object_exists(&self, key: &str) -> StoreResult<bool>;

    fn datastream_exists(&self, key: &str) -> StoreResult<bool>;

    /// Report orphaned overwrite temporaries.
    ///
    /// Default: nothing to report. Callers invoke it uniformly across
    /// backends.
    fn audit(&self) -> StoreResult<AuditReport> {
        Ok(AuditReport::default())
    }

    /// Reconcile orphaned overwrite temporaries.
    ///
    /// Default: no-op.
    fn rebuild(&self) -> StoreResult<RebuildReport> {
        Ok(RebuildReport::default())
    }
}
