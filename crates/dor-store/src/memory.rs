use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use dor_types::Hints;

use crate::blob::{BlobConnection, BlobId, BlobIdIter, BlobStore};
use crate::error::{StoreError, StoreResult};

/// In-memory, map-based blob store.
///
/// Intended for tests and embedding. Blobs are held as [`Bytes`] behind an
/// `RwLock`; a reader gets a cheap snapshot of the value current when it
/// opened, so it never observes a half-written replacement.
///
/// By default the store does not claim atomic overwrite, which makes the
/// storage engine run its safe-overwrite protocol against it.
pub struct MemoryBlobStore {
    shared: Arc<Shared>,
    atomic_overwrite: bool,
}

struct Shared {
    blobs: RwLock<BTreeMap<BlobId, Bytes>>,
    open_connections: AtomicUsize,
    last_hints: Mutex<Option<Hints>>,
}

impl MemoryBlobStore {
    /// Create a new empty store without atomic overwrite.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                blobs: RwLock::new(BTreeMap::new()),
                open_connections: AtomicUsize::new(0),
                last_hints: Mutex::new(None),
            }),
            atomic_overwrite: false,
        }
    }

    /// Create a new empty store that reports atomic overwrite.
    pub fn with_atomic_overwrite() -> Self {
        Self {
            atomic_overwrite: true,
            ..Self::new()
        }
    }

    /// Number of blobs currently stored, temporaries included.
    pub fn len(&self) -> usize {
        self.shared.blobs.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted list of every blob id in the store.
    pub fn ids(&self) -> Vec<BlobId> {
        self.shared
            .blobs
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Hints passed to the most recent [`BlobStore::open`].
    pub fn last_hints(&self) -> Option<Hints> {
        self.shared.last_hints.lock().ok().and_then(|h| h.clone())
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("blob_count", &self.len())
            .field("open_connections", &self.open_connections())
            .field("atomic_overwrite", &self.atomic_overwrite)
            .finish()
    }
}

impl BlobStore for MemoryBlobStore {
    fn open(&self, hints: &Hints) -> StoreResult<Box<dyn BlobConnection>> {
        if let Ok(mut last) = self.shared.last_hints.lock() {
            *last = Some(hints.clone());
        }
        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    fn atomic_overwrite(&self) -> bool {
        self.atomic_overwrite
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Connection to a [`MemoryBlobStore`].
pub struct MemoryConnection {
    shared: Arc<Shared>,
    closed: bool,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("blob map lock poisoned".into())
}

impl MemoryConnection {
    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn get(&self, id: &BlobId) -> StoreResult<Bytes> {
        self.check_open()?;
        let blobs = self.shared.blobs.read().map_err(poisoned)?;
        blobs.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            key: id.to_string(),
        })
    }
}

impl BlobConnection for MemoryConnection {
    fn exists(&mut self, id: &BlobId) -> StoreResult<bool> {
        self.check_open()?;
        let blobs = self.shared.blobs.read().map_err(poisoned)?;
        Ok(blobs.contains_key(id))
    }

    fn size(&mut self, id: &BlobId) -> StoreResult<u64> {
        Ok(self.get(id)?.len() as u64)
    }

    fn open_reader(&mut self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.get(id)?)))
    }

    fn write(
        &mut self,
        id: &BlobId,
        content: &mut dyn Read,
        overwrite: bool,
        _hints: &Hints,
    ) -> StoreResult<u64> {
        self.check_open()?;
        if !overwrite && self.exists(id)? {
            return Err(StoreError::AlreadyExists {
                key: id.to_string(),
            });
        }

        // Buffer the whole blob first; it only becomes visible once complete.
        let mut buf = Vec::new();
        content.read_to_end(&mut buf)?;
        let size = buf.len() as u64;

        let mut blobs = self.shared.blobs.write().map_err(poisoned)?;
        if !overwrite && blobs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                key: id.to_string(),
            });
        }
        blobs.insert(id.clone(), Bytes::from(buf));
        Ok(size)
    }

    fn delete(&mut self, id: &BlobId) -> StoreResult<()> {
        self.check_open()?;
        let mut blobs = self.shared.blobs.write().map_err(poisoned)?;
        blobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                key: id.to_string(),
            })
    }

    fn rename(&mut self, from: &BlobId, to: &BlobId) -> StoreResult<()> {
        self.check_open()?;
        let mut blobs = self.shared.blobs.write().map_err(poisoned)?;
        if blobs.contains_key(to) {
            return Err(StoreError::AlreadyExists {
                key: to.to_string(),
            });
        }
        let data = blobs.remove(from).ok_or_else(|| StoreError::NotFound {
            key: from.to_string(),
        })?;
        blobs.insert(to.clone(), data);
        Ok(())
    }

    fn list(&mut self, prefix: Option<&str>) -> StoreResult<BlobIdIter> {
        self.check_open()?;
        let blobs = self.shared.blobs.read().map_err(poisoned)?;
        let ids: Vec<BlobId> = match prefix {
            Some(p) => blobs
                .range(BlobId::new(p)..)
                .map(|(id, _)| id)
                .take_while(|id| id.as_str().starts_with(p))
                .cloned()
                .collect(),
            None => blobs.keys().cloned().collect(),
        };
        Ok(Box::new(ids.into_iter().map(Ok)))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}
