//! Repository configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! [storage]
//! object_pattern = "##/##"
//! datastream_pattern = "##/##"
//!
//! [storage.backend]
//! kind = "filesystem"
//! objects_dir = "/srv/dor/objects"
//! datastreams_dir = "/srv/dor/datastreams"
//!
//! [registry]
//! kind = "filesystem"
//! dir = "/srv/dor/registry"
//! ```
//!
//! `DOR_OBJECT_PATTERN` and `DOR_DATASTREAM_PATTERN` override the patterns.

use std::path::{Path, PathBuf};

use dor_store::config::DEFAULT_PATTERN;
use dor_store::{BackendConfig, StorageConfig};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

pub const ENV_OBJECT_PATTERN: &str = "DOR_OBJECT_PATTERN";
pub const ENV_DATASTREAM_PATTERN: &str = "DOR_DATASTREAM_PATTERN";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
}

/// `[registry]`: where identifier registrations live.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegistryConfig {
    #[default]
    Memory,
    Filesystem {
        dir: PathBuf,
        #[serde(default = "default_pattern")]
        pattern: String,
    },
}

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

impl RepositoryConfig {
    /// Load a TOML file and apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse TOML without looking at the environment.
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// A filesystem layout under one root directory:
    /// `objects/`, `datastreams/` and `registry/`.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            storage: StorageConfig {
                backend: BackendConfig::Filesystem {
                    objects_dir: root.join("objects"),
                    datastreams_dir: root.join("datastreams"),
                },
                ..StorageConfig::default()
            },
            registry: RegistryConfig::Filesystem {
                dir: root.join("registry"),
                pattern: default_pattern(),
            },
        }
    }

    /// Apply pattern overrides from `lookup` (normally the environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(pattern) = lookup(ENV_OBJECT_PATTERN) {
            self.storage.object_pattern = pattern;
        }
        if let Some(pattern) = lookup(ENV_DATASTREAM_PATTERN) {
            self.storage.datastream_pattern = pattern;
        }
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }
}
