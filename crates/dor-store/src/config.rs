use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Internal-id prefix used when none is configured.
pub const DEFAULT_INTERNAL_PREFIX: &str = "file:";

/// Hash-path pattern used when none is configured.
pub const DEFAULT_PATTERN: &str = "##/##";

/// `[storage]` section of the repository configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub internal_prefix: String,
    pub object_pattern: String,
    pub datastream_pattern: String,
    pub backend: BackendConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            internal_prefix: DEFAULT_INTERNAL_PREFIX.to_string(),
            object_pattern: DEFAULT_PATTERN.to_string(),
            datastream_pattern: DEFAULT_PATTERN.to_string(),
            backend: BackendConfig::default(),
        }
    }
}

/// `[storage.backend]`: which blob store backs both scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory {
        #[serde(default)]
        atomic_overwrite: bool,
    },
    Filesystem {
        objects_dir: PathBuf,
        datastreams_dir: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory {
            atomic_overwrite: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.internal_prefix, "file:");
        assert_eq!(config.object_pattern, "##/##");
        assert_eq!(
            config.backend,
            BackendConfig::Memory {
                atomic_overwrite: false
            }
        );
    }

    #[test]
    fn parse_filesystem_backend() {
        let config: StorageConfig = toml::from_str(
            r###"
            object_pattern = "##/##/##"
            datastream_pattern = ""

            [backend]
            kind = "filesystem"
            objects_dir = "/srv/dor/objects"
            datastreams_dir = "/srv/dor/datastreams"
            "###,
        )
        .unwrap();

        assert_eq!(config.internal_prefix, "file:");
        assert_eq!(config.object_pattern, "##/##/##");
        assert_eq!(config.datastream_pattern, "");
        assert_eq!(
            config.backend,
            BackendConfig::Filesystem {
                objects_dir: "/srv/dor/objects".into(),
                datastreams_dir: "/srv/dor/datastreams".into(),
            }
        );
    }

    #[test]
    fn parse_memory_backend() {
        let config: StorageConfig = toml::from_str(
            r#"
            [backend]
            kind = "memory"
            atomic_overwrite = true
            "#,
        )
        .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Memory {
                atomic_overwrite: true
            }
        );
    }

    #[test]
    fn unknown_backend_rejected() {
        let result: Result<StorageConfig, _> = toml::from_str(
            r#"
            [backend]
            kind = "s3"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn json_roundtrip() {
        let config = StorageConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
