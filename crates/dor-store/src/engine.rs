use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use dor_types::Hints;
use tracing::{debug, info};

use crate::blob::{BlobConnection, BlobId, BlobStore};
use crate::config::{BackendConfig, StorageConfig};
use crate::error::{StoreError, StoreResult};
use crate::fs::FsBlobStore;
use crate::idlock::IdLocks;
use crate::keymap::KeyMapper;
use crate::memory::MemoryBlobStore;
use crate::overwrite::{
    find_orphans, reconcile, refresh, safe_overwrite, AuditReport, Orphan, RebuildReport,
};
use crate::stream::{BlobReader, KeyIter};
use crate::traits::LowlevelStorage;

/// One blob store plus the key mapper that addresses it.
///
/// Every operation opens its own connection and releases it before
/// returning, except [`retrieve`](Self::retrieve) and [`list`](Self::list),
/// which hand the connection to the returned reader or iterator.
///
/// Mutations of one key are serialized; reads and other keys are not.
pub struct StoreScope {
    name: &'static str,
    store: Arc<dyn BlobStore>,
    mapper: KeyMapper,
    locks: IdLocks,
}

/// Run `op` on a fresh connection and close it on every path.
fn with_connection<T>(
    store: &dyn BlobStore,
    hints: &Hints,
    op: impl FnOnce(&mut dyn BlobConnection) -> StoreResult<T>,
) -> StoreResult<T> {
    let mut conn = store.open(hints)?;
    let result = op(conn.as_mut());
    conn.close();
    result
}

impl StoreScope {
    pub fn new(name: &'static str, store: Arc<dyn BlobStore>, mapper: KeyMapper) -> Self {
        Self {
            name,
            store,
            mapper,
            locks: IdLocks::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mapper(&self) -> &KeyMapper {
        &self.mapper
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Store new content under `key`. `AlreadyExists` leaves the current
    /// content untouched.
    pub fn add(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64> {
        let id = self.mapper.to_internal(key)?;
        let _guard = self.locks.lock(&id)?;
        let size = with_connection(self.store.as_ref(), hints, |conn| {
            if conn.exists(&id)? {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                });
            }
            conn.write(&id, content, false, hints).map_err(|e| match e {
                StoreError::AlreadyExists { .. } => StoreError::AlreadyExists {
                    key: key.to_string(),
                },
                other => other,
            })
        })?;
        debug!(store = self.name, key, size, "blob added");
        Ok(size)
    }

    /// Replace the content under an existing `key`.
    ///
    /// Stores without atomic overwrite go through the staged
    /// `/new` + `/old` protocol.
    pub fn replace(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64> {
        let id = self.mapper.to_internal(key)?;
        let atomic = self.store.atomic_overwrite();
        let _guard = self.locks.lock(&id)?;
        let size = with_connection(self.store.as_ref(), hints, |conn| {
            if !conn.exists(&id)? {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                });
            }
            if atomic {
                conn.write(&id, content, true, hints)
            } else {
                safe_overwrite(conn, key, &id, content, hints)
            }
        })?;
        debug!(store = self.name, key, size, atomic, "blob replaced");
        Ok(size)
    }

    pub fn remove(&self, key: &str) -> StoreResult<()> {
        let id = self.mapper.to_internal(key)?;
        let _guard = self.locks.lock(&id)?;
        with_connection(self.store.as_ref(), &Hints::new(), |conn| {
            conn.delete(&id).map_err(|e| match e {
                StoreError::NotFound { .. } => StoreError::NotFound {
                    key: key.to_string(),
                },
                other => other,
            })
        })?;
        debug!(store = self.name, key, "blob removed");
        Ok(())
    }

    /// Open the content under `key`. The reader owns its connection.
    pub fn retrieve(&self, key: &str) -> StoreResult<BlobReader> {
        let id = self.mapper.to_internal(key)?;
        let mut conn = self.store.open(&Hints::new())?;
        match conn.open_reader(&id) {
            Ok(inner) => Ok(BlobReader::new(key, inner, conn)),
            Err(e) => {
                conn.close();
                Err(match e {
                    StoreError::NotFound { .. } => StoreError::NotFound {
                        key: key.to_string(),
                    },
                    other => other,
                })
            }
        }
    }

    pub fn size(&self, key: &str) -> StoreResult<u64> {
        let id = self.mapper.to_internal(key)?;
        with_connection(self.store.as_ref(), &Hints::new(), |conn| {
            conn.size(&id).map_err(|e| match e {
                StoreError::NotFound { .. } => StoreError::NotFound {
                    key: key.to_string(),
                },
                other => other,
            })
        })
    }

    pub fn exists(&self, key: &str) -> StoreResult<bool> {
        let id = self.mapper.to_internal(key)?;
        with_connection(self.store.as_ref(), &Hints::new(), |conn| conn.exists(&id))
    }

    /// Every stored key.
    pub fn list(&self) -> StoreResult<KeyIter> {
        self.list_filtered(None)
    }

    /// Stored keys starting with `partial`.
    ///
    /// A flat layout narrows the backend listing; a hashed one scans every
    /// id and filters after inverse mapping.
    pub fn list_prefix(&self, partial: &str) -> StoreResult<KeyIter> {
        self.list_filtered(Some(partial))
    }

    fn list_filtered(&self, partial: Option<&str>) -> StoreResult<KeyIter> {
        let id_prefix = match partial {
            Some(p) => self
                .mapper
                .prefix_for(p)
                .unwrap_or_else(|| self.mapper.internal_prefix().to_string()),
            None => self.mapper.internal_prefix().to_string(),
        };
        let mut conn = self.store.open(&Hints::new())?;
        match conn.list(Some(&id_prefix)) {
            Ok(ids) => Ok(KeyIter::new(
                ids,
                conn,
                self.mapper.clone(),
                partial.map(str::to_string),
            )),
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }

    /// Orphaned safe-overwrite temporaries in this store.
    ///
    /// Each base key is re-examined under its lock, so the temporaries of a
    /// replace in progress are not reported.
    pub fn audit(&self) -> StoreResult<Vec<Orphan>> {
        with_connection(self.store.as_ref(), &Hints::new(), |conn| {
            let mut settled = Vec::new();
            for (base, group) in by_base(find_orphans(conn, &self.mapper)?) {
                let _guard = self.locks.lock(&base)?;
                settled.extend(refresh(conn, group)?);
            }
            Ok(settled)
        })
    }

    /// Find and resolve orphaned temporaries, one base key at a time under
    /// that key's lock.
    pub fn rebuild(&self) -> StoreResult<RebuildReport> {
        with_connection(self.store.as_ref(), &Hints::new(), |conn| {
            let mut report = RebuildReport::default();
            for (base, group) in by_base(find_orphans(conn, &self.mapper)?) {
                let _guard = self.locks.lock(&base)?;
                report.merge(reconcile(conn, &group)?);
            }
            Ok(report)
        })
    }
}

fn by_base(orphans: Vec<Orphan>) -> BTreeMap<BlobId, Vec<Orphan>> {
    let mut groups: BTreeMap<BlobId, Vec<Orphan>> = BTreeMap::new();
    for orphan in orphans {
        groups.entry(orphan.base.clone()).or_default().push(orphan);
    }
    groups
}

impl std::fmt::Debug for StoreScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreScope")
            .field("name", &self.name)
            .field("store", &self.store.describe())
            .field("mapper", &self.mapper)
            .finish()
    }
}

/// The low-level storage engine: an object store and a datastream store.
#[derive(Debug)]
pub struct BlobStorageEngine {
    objects: StoreScope,
    datastreams: StoreScope,
}

impl BlobStorageEngine {
    pub fn new(objects: StoreScope, datastreams: StoreScope) -> Self {
        Self {
            objects,
            datastreams,
        }
    }

    /// Build both stores and mappers from configuration.
    ///
    /// Invalid hash-path patterns fail here with
    /// [`StoreError::Configuration`].
    pub fn from_config(config: &StorageConfig) -> StoreResult<Self> {
        let object_mapper = KeyMapper::new(&config.internal_prefix, &config.object_pattern)?;
        let datastream_mapper =
            KeyMapper::new(&config.internal_prefix, &config.datastream_pattern)?;

        let (objects, datastreams): (Arc<dyn BlobStore>, Arc<dyn BlobStore>) =
            match &config.backend {
                BackendConfig::Memory { atomic_overwrite } => {
                    let make = || -> Arc<dyn BlobStore> {
                        if *atomic_overwrite {
                            Arc::new(MemoryBlobStore::with_atomic_overwrite())
                        } else {
                            Arc::new(MemoryBlobStore::new())
                        }
                    };
                    (make(), make())
                }
                BackendConfig::Filesystem {
                    objects_dir,
                    datastreams_dir,
                } => (
                    Arc::new(FsBlobStore::open_dir(objects_dir, &config.internal_prefix)?),
                    Arc::new(FsBlobStore::open_dir(
                        datastreams_dir,
                        &config.internal_prefix,
                    )?),
                ),
            };

        info!(
            objects = %objects.describe(),
            datastreams = %datastreams.describe(),
            object_pattern = %config.object_pattern,
            datastream_pattern = %config.datastream_pattern,
            "storage engine configured"
        );
        Ok(Self::new(
            StoreScope::new("objects", objects, object_mapper),
            StoreScope::new("datastreams", datastreams, datastream_mapper),
        ))
    }

    pub fn objects(&self) -> &StoreScope {
        &self.objects
    }

    pub fn datastreams(&self) -> &StoreScope {
        &self.datastreams
    }
}

impl LowlevelStorage for BlobStorageEngine {
    fn add_object(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64> {
        self.objects.add(key, content, hints)
    }

    fn add_datastream(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64> {
        self.datastreams.add(key, content, hints)
    }

    fn replace_object(&self, key: &str, content: &mut dyn Read, hints: &Hints) -> StoreResult<u64> {
        self.objects.replace(key, content, hints)
    }

    fn replace_datastream(
        &self,
        key: &str,
        content: &mut dyn Read,
        hints: &Hints,
    ) -> StoreResult<u64> {
        self.datastreams.replace(key, content, hints)
    }

    fn retrieve_object(&self, key: &str) -> StoreResult<BlobReader> {
        self.objects.retrieve(key)
    }

    fn retrieve_datastream(&self, key: &str) -> StoreResult<BlobReader> {
        self.datastreams.retrieve(key)
    }

    fn remove_object(&self, key: &str) -> StoreResult<()> {
        self.objects.remove(key)
    }

    fn remove_datastream(&self, key: &str) -> StoreResult<()> {
        self.datastreams.remove(key)
    }

    fn list_objects(&self) -> StoreResult<KeyIter> {
        self.objects.list()
    }

    fn list_datastreams(&self) -> StoreResult<KeyIter> {
        self.datastreams.list()
    }

    fn list_datastreams_with_prefix(&self, prefix: &str) -> StoreResult<KeyIter> {
        self.datastreams.list_prefix(prefix)
    }

    fn object_size(&self, key: &str) -> StoreResult<u64> {
        self.objects.size(key)
    }

    fn datastream_size(&self, key: &str) -> StoreResult<u64> {
        self.datastreams.size(key)
    }

    fn object_exists(&self, key: &str) -> StoreResult<bool> {
        self.objects.exists(key)
    }

    fn datastream_exists(&self, key: &str) -> StoreResult<bool> {
        self.datastreams.exists(key)
    }

    fn audit(&self) -> StoreResult<AuditReport> {
        let report = AuditReport {
            objects: self.objects.audit()?,
            datastreams: self.datastreams.audit()?,
        };
        info!(orphans = report.len(), "storage audit finished");
        Ok(report)
    }

    fn rebuild(&self) -> StoreResult<RebuildReport> {
        let mut report = self.objects.rebuild()?;
        report.merge(self.datastreams.rebuild()?);
        info!(
            restored = report.restored.len(),
            removed = report.removed.len(),
            "storage rebuild finished"
        );
        Ok(report)
    }
}
