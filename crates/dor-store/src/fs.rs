//! Filesystem blob store.
//!
//! An internal id `file:1f/7a/urn%3Aexample1` lives at
//! `<root>/1f/7a/urn%3Aexample1`. Writes land in a hidden temporary file in
//! the destination directory and are renamed into place, so an overwrite is
//! atomic and the engine never needs the `/new` + `/old` protocol here.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use dor_types::Hints;
use tracing::debug;
use walkdir::WalkDir;

use crate::blob::{BlobConnection, BlobId, BlobIdIter, BlobStore};
use crate::error::{StoreError, StoreResult};

/// File-name prefix of in-flight temporary files. Never listed.
const TEMP_PREFIX: &str = ".dor-";

/// Attempts made by [`retry_in_dir`] before giving up.
const DIR_RACE_ATTEMPTS: usize = 8;

/// Create `dir` and run `op` in it, starting over while `op` fails with
/// `NotFound`.
///
/// Deletes prune empty directories, so a directory created for a write can
/// vanish before the file inside it exists.
pub fn retry_in_dir<T>(dir: &Path, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempt = 1;
    loop {
        let result = match fs::create_dir_all(dir) {
            Ok(()) => op(),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempt < DIR_RACE_ATTEMPTS => {
                debug!(dir = %dir.display(), attempt, "directory vanished, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Blob store rooted at a directory.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    id_prefix: String,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// `id_prefix` is the internal-id prefix of the key mapper feeding this
    /// store; it is stripped to get the relative path.
    pub fn open_dir(root: impl AsRef<Path>, id_prefix: &str) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            id_prefix: id_prefix.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for FsBlobStore {
    fn open(&self, _hints: &Hints) -> StoreResult<Box<dyn BlobConnection>> {
        Ok(Box::new(FsConnection {
            store: self.clone(),
            closed: false,
        }))
    }

    fn atomic_overwrite(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// Connection to an [`FsBlobStore`].
pub struct FsConnection {
    store: FsBlobStore,
    closed: bool,
}

fn map_io(id: &BlobId, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound {
            key: id.to_string(),
        },
        io::ErrorKind::AlreadyExists => StoreError::AlreadyExists {
            key: id.to_string(),
        },
        _ => StoreError::Io(err),
    }
}

impl FsConnection {
    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Resolve an internal id to a path below the root.
    fn path_of(&self, id: &BlobId) -> StoreResult<PathBuf> {
        let invalid = |reason: &str| StoreError::InvalidKey {
            key: id.to_string(),
            reason: reason.to_string(),
        };
        let rel = id
            .as_str()
            .strip_prefix(self.store.id_prefix.as_str())
            .ok_or_else(|| invalid("id does not belong to this store"))?;

        let mut path = self.store.root.clone();
        for segment in rel.split('/') {
            let valid = matches!(
                Path::new(segment).components().next(),
                Some(Component::Normal(_))
            ) && Path::new(segment).components().count() == 1
                && !segment.starts_with(TEMP_PREFIX);
            if segment.is_empty() || !valid {
                return Err(invalid("id is not a relative path of plain segments"));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn require_file(&self, id: &BlobId) -> StoreResult<PathBuf> {
        let path = self.path_of(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound {
                key: id.to_string(),
            });
        }
        Ok(path)
    }

    /// Remove empty directories from `dir` upwards, stopping at the root.
    fn prune_empty_dirs(&self, mut dir: Option<&Path>) {
        while let Some(d) = dir {
            if d == self.store.root || !d.starts_with(&self.store.root) {
                break;
            }
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

impl BlobConnection for FsConnection {
    fn exists(&mut self, id: &BlobId) -> StoreResult<bool> {
        self.check_open()?;
        Ok(self.path_of(id)?.is_file())
    }

    fn size(&mut self, id: &BlobId) -> StoreResult<u64> {
        self.check_open()?;
        let path = self.require_file(id)?;
        Ok(fs::metadata(path).map_err(|e| map_io(id, e))?.len())
    }

    fn open_reader(&mut self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>> {
        self.check_open()?;
        let path = self.require_file(id)?;
        let file = File::open(path).map_err(|e| map_io(id, e))?;
        Ok(Box::new(file))
    }

    fn write(
        &mut self,
        id: &BlobId,
        content: &mut dyn Read,
        overwrite: bool,
        _hints: &Hints,
    ) -> StoreResult<u64> {
        self.check_open()?;
        let path = self.path_of(id)?;
        if !overwrite && path.exists() {
            return Err(StoreError::AlreadyExists {
                key: id.to_string(),
            });
        }
        let parent = path.parent().ok_or_else(|| StoreError::InvalidKey {
            key: id.to_string(),
            reason: "id has no parent directory".into(),
        })?;
        // Once the temp file exists its directory is no longer empty.
        let mut temp = retry_in_dir(parent, || {
            tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(parent)
        })?;
        let size = io::copy(content, &mut temp)?;
        temp.flush()?;
        temp.as_file().sync_all()?;

        let persisted = if overwrite {
            temp.persist(&path)
        } else {
            temp.persist_noclobber(&path)
        };
        // A failed persist drops the temp file, which removes it.
        persisted.map_err(|e| map_io(id, e.error))?;

        debug!(path = %path.display(), size, "blob file written");
        Ok(size)
    }

    fn delete(&mut self, id: &BlobId) -> StoreResult<()> {
        self.check_open()?;
        let path = self.require_file(id)?;
        fs::remove_file(&path).map_err(|e| map_io(id, e))?;
        self.prune_empty_dirs(path.parent());
        Ok(())
    }

    fn rename(&mut self, from: &BlobId, to: &BlobId) -> StoreResult<()> {
        self.check_open()?;
        let src = self.require_file(from)?;
        let dst = self.path_of(to)?;
        let parent = dst.parent().ok_or_else(|| StoreError::InvalidKey {
            key: to.to_string(),
            reason: "id has no parent directory".into(),
        })?;
        // Link then unlink: the link fails if `to` exists, so nothing is
        // clobbered.
        retry_in_dir(parent, || fs::hard_link(&src, &dst)).map_err(|e| {
            let blamed = if src.is_file() { to } else { from };
            map_io(blamed, e)
        })?;
        fs::remove_file(&src).map_err(|e| map_io(from, e))?;
        self.prune_empty_dirs(src.parent());
        Ok(())
    }

    fn list(&mut self, prefix: Option<&str>) -> StoreResult<BlobIdIter> {
        self.check_open()?;
        let root = self.store.root.clone();
        let id_prefix = self.store.id_prefix.clone();
        let filter = prefix.map(str::to_string);

        let iter = WalkDir::new(root.clone())
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(StoreError::Io(io::Error::from(e)))),
                };
                if !entry.file_type().is_file()
                    || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
                {
                    return None;
                }
                let rel = entry.path().strip_prefix(&root).ok()?;
                let segments: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                let id = format!("{id_prefix}{}", segments.join("/"));
                match &filter {
                    Some(p) if !id.starts_with(p.as_str()) => None,
                    _ => Some(Ok(BlobId::new(id))),
                }
            });
        Ok(Box::new(iter))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
