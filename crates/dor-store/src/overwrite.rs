//! Rename-based safe overwrite and the reconciliation sweep for its
//! leftovers.
//!
//! For a key stored at id `K` a replace runs:
//!
//! ```text
//! 1. stage    write K/new
//! 2. backup   rename K -> K/old
//! 3. commit   rename K/new -> K
//! 4. cleanup  delete K/old          (best effort)
//! ```
//!
//! A crash or an unrecoverable failure can leave `K/new` or `K/old` behind.
//! [`find_orphans`] locates them and [`reconcile`] puts the store back into
//! a state with no temporaries, restoring `K` from `K/old` when `K` itself
//! is missing.

use std::io::Read;

use dor_types::Hints;
use serde::Serialize;
use tracing::{error, warn};

use crate::blob::{BlobConnection, BlobId, TempKind};
use crate::error::{OverwritePhase, StoreError, StoreResult};
use crate::keymap::KeyMapper;

/// Replace the content of `id` without ever exposing a partial blob.
///
/// The caller holds the key lock for `id` and has checked that it exists.
pub(crate) fn safe_overwrite(
    conn: &mut dyn BlobConnection,
    key: &str,
    id: &BlobId,
    content: &mut dyn Read,
    hints: &Hints,
) -> StoreResult<u64> {
    let staging = id.staging();
    let backup = id.backup();

    // Leftovers from an interrupted run: no other replace of K can be in
    // flight, and K exists, so an old backup is stale.
    if conn.exists(&staging)? {
        warn!(key, id = %staging, "removing stale staging blob");
        conn.delete(&staging)?;
    }
    if conn.exists(&backup)? {
        warn!(key, id = %backup, "removing stale backup blob");
        conn.delete(&backup)?;
    }

    let fault = |phase: OverwritePhase, reason: String, orphans: Vec<BlobId>| {
        error!(key, %phase, %reason, ?orphans, "safe overwrite failed");
        StoreError::StorageFault {
            key: key.to_string(),
            phase,
            reason,
            orphans,
        }
    };

    // 1. stage
    let size = match conn.write(&staging, content, false, hints) {
        Ok(size) => size,
        Err(e) => {
            let orphans = discard(conn, &staging);
            return Err(fault(OverwritePhase::Stage, e.to_string(), orphans));
        }
    };

    // 2. backup
    if let Err(e) = conn.rename(id, &backup) {
        let orphans = discard(conn, &staging);
        return Err(fault(OverwritePhase::Backup, e.to_string(), orphans));
    }

    // 3. commit
    if let Err(e) = conn.rename(&staging, id) {
        let mut orphans = Vec::new();
        let mut reason = e.to_string();
        if let Err(restore) = conn.rename(&backup, id) {
            reason = format!("{reason}; restoring backup failed: {restore}");
            // Only name the backup if an operator can still find it.
            if conn.exists(&backup).unwrap_or(true) {
                orphans.push(backup.clone());
            }
        }
        orphans.extend(discard(conn, &staging));
        return Err(fault(OverwritePhase::Commit, reason, orphans));
    }

    // 4. cleanup
    if let Err(e) = conn.delete(&backup) {
        warn!(key, id = %backup, error = %e, "could not delete backup after overwrite");
    }
    Ok(size)
}

/// Delete a temporary if present. Returns it as an orphan if that fails.
fn discard(conn: &mut dyn BlobConnection, id: &BlobId) -> Vec<BlobId> {
    match conn.exists(id).and_then(|present| {
        if present {
            conn.delete(id)
        } else {
            Ok(())
        }
    }) {
        Ok(()) => Vec::new(),
        Err(e) => {
            warn!(id = %id, error = %e, "could not delete staging blob");
            vec![id.clone()]
        }
    }
}

/// A `/new` or `/old` blob left behind by an interrupted overwrite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub id: BlobId,
    pub base: BlobId,
    pub kind: TempKind,
    /// Whether the base id held content when the sweep ran.
    pub base_exists: bool,
}

/// Orphaned temporaries found in both stores.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub objects: Vec<Orphan>,
    pub datastreams: Vec<Orphan>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.objects.is_empty() && self.datastreams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len() + self.datastreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_clean()
    }
}

/// What a rebuild changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Base ids brought back from their `/old` backup.
    pub restored: Vec<BlobId>,
    /// Temporaries deleted.
    pub removed: Vec<BlobId>,
}

impl RebuildReport {
    pub fn merge(&mut self, other: RebuildReport) {
        self.restored.extend(other.restored);
        self.removed.extend(other.removed);
    }
}

/// Every temporary in the store whose base is a valid mapped id.
pub(crate) fn find_orphans(
    conn: &mut dyn BlobConnection,
    mapper: &KeyMapper,
) -> StoreResult<Vec<Orphan>> {
    let prefix = mapper.internal_prefix().to_string();
    let temporaries: Vec<(BlobId, BlobId, TempKind)> = conn
        .list(Some(prefix.as_str()))?
        .filter_map(|r| match r {
            Ok(id) => mapper
                .temporary(&id)
                .map(|(base, kind)| Ok((id, base, kind))),
            Err(e) => Some(Err(e)),
        })
        .collect::<StoreResult<_>>()?;

    let mut orphans = Vec::with_capacity(temporaries.len());
    for (id, base, kind) in temporaries {
        let base_exists = conn.exists(&base)?;
        orphans.push(Orphan {
            id,
            base,
            kind,
            base_exists,
        });
    }
    Ok(orphans)
}

/// Re-check orphans found earlier: drop those that are gone and refresh
/// `base_exists` for the rest.
pub(crate) fn refresh(
    conn: &mut dyn BlobConnection,
    orphans: Vec<Orphan>,
) -> StoreResult<Vec<Orphan>> {
    let mut current = Vec::with_capacity(orphans.len());
    for mut orphan in orphans {
        if conn.exists(&orphan.id)? {
            orphan.base_exists = conn.exists(&orphan.base)?;
            current.push(orphan);
        }
    }
    Ok(current)
}

/// Resolve orphans: drop staging blobs, drop backups whose base exists and
/// restore backups whose base is gone.
pub(crate) fn reconcile(
    conn: &mut dyn BlobConnection,
    orphans: &[Orphan],
) -> StoreResult<RebuildReport> {
    let mut report = RebuildReport::default();
    for orphan in orphans {
        if !conn.exists(&orphan.id)? {
            continue;
        }
        let restore = orphan.kind == TempKind::Backup && !conn.exists(&orphan.base)?;
        if restore {
            conn.rename(&orphan.id, &orphan.base)?;
            report.restored.push(orphan.base.clone());
            continue;
        }
        match conn.delete(&orphan.id) {
            Ok(()) => report.removed.push(orphan.id.clone()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}
