//! File-backed identifier registry.
//!
//! Each registered identifier is a small JSON marker file. Markers are laid
//! out with a [`KeyMapper`], so `demo:1` with pattern `##/##` lives at
//! `<root>/3c/91/demo%3A1.json`. A marker is written to a temporary file and
//! linked into place without replacing an existing one; that exclusive
//! create is the registry's unique constraint.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use dor_store::fs::retry_in_dir;
use dor_store::{BlobId, KeyMapper};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{RegistryError, Result};
use crate::traits::{check_token, IdentifierRegistry};
use crate::types::RegistryRecord;

const MARKER_EXT: &str = ".json";

/// A filesystem implementation of [`IdentifierRegistry`].
#[derive(Clone, Debug)]
pub struct FsRegistry {
    root: PathBuf,
    mapper: KeyMapper,
}

impl FsRegistry {
    /// Open (creating if needed) a registry rooted at `root`.
    pub fn open(root: impl AsRef<Path>, pattern: &str) -> Result<Self> {
        let mapper = KeyMapper::new("", pattern)
            .map_err(|e| RegistryError::Configuration(e.to_string()))?;
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, mapper })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker_path(&self, token: &str) -> Result<PathBuf> {
        check_token(token)?;
        let id = self
            .mapper
            .to_internal(token)
            .map_err(|e| RegistryError::InvalidArgument(e.to_string()))?;
        let mut path = self.root.clone();
        for segment in id.as_str().split('/') {
            path.push(segment);
        }
        path.set_extension(&MARKER_EXT[1..]);
        Ok(path)
    }

    fn token_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let id = rel.strip_suffix(MARKER_EXT)?;
        self.mapper.to_external(&BlobId::new(id)).ok()
    }

    fn prune_empty_dirs(&self, mut dir: Option<&Path>) {
        while let Some(d) = dir {
            if d == self.root || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

impl IdentifierRegistry for FsRegistry {
    fn contains(&self, token: &str) -> Result<bool> {
        Ok(self.marker_path(token)?.is_file())
    }

    fn insert(&self, token: &str) -> Result<RegistryRecord> {
        let path = self.marker_path(token)?;
        let already = || RegistryError::AlreadyExists {
            token: token.to_string(),
        };
        if path.exists() {
            return Err(already());
        }
        let parent = path
            .parent()
            .ok_or_else(|| RegistryError::InvalidArgument(token.to_string()))?;
        let record = RegistryRecord::now(token);
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| RegistryError::Serialization(e.to_string()))?;

        // A concurrent remove may prune `parent` until the temp file exists.
        let mut temp =
            retry_in_dir(parent, || tempfile::Builder::new().prefix(".reg-").tempfile_in(parent))?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                already()
            } else {
                RegistryError::Io(e.error)
            }
        })?;

        debug!(token, path = %path.display(), "identifier registered");
        Ok(record)
    }

    fn remove(&self, token: &str) -> Result<()> {
        let path = self.marker_path(token)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_dirs(path.parent());
                debug!(token, "identifier unregistered");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RegistryError::NotFound {
                token: token.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, token: &str) -> Result<Option<RegistryRecord>> {
        let path = self.marker_path(token)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::Serialization(e.to_string()))?;
        Ok(Some(record))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                if let Some(token) = self.token_of(entry.path()) {
                    tokens.push(token);
                }
            }
        }
        tokens.sort();
        Ok(tokens)
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}
