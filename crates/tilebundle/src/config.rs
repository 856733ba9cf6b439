//! Configuration for the tile cache

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of block pairs kept open at once.
pub const DEFAULT_MAX_OPEN_BUNDLES: usize = 256;

/// Configuration for a tile cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Tile-set root holding the `Lxx` level directories
    pub root: PathBuf,

    /// Maximum number of bundle/bundlx pairs held open
    pub max_open_bundles: usize,

    /// Create the root directory if it does not exist
    pub create_root: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./tiles"),
            max_open_bundles: DEFAULT_MAX_OPEN_BUNDLES,
            create_root: true,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration for the tile set at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            StorageError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the tile-set root
    #[must_use]
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    /// Set how many block pairs may be open at once
    #[must_use]
    pub const fn with_max_open_bundles(mut self, count: usize) -> Self {
        self.max_open_bundles = count;
        self
    }

    /// Enable or disable creating a missing root
    #[must_use]
    pub const fn with_create_root(mut self, create: bool) -> Self {
        self.create_root = create;
        self
    }

    /// Check the configuration for values the cache cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_open_bundles == 0 {
            return Err(StorageError::Config(
                "max_open_bundles must be at least 1".to_string(),
            ));
        }
        if self.root.as_os_str().is_empty() {
            return Err(StorageError::Config("root must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::new("/srv/tiles");
        assert_eq!(config.root, PathBuf::from("/srv/tiles"));
        assert_eq!(config.max_open_bundles, DEFAULT_MAX_OPEN_BUNDLES);
        assert!(config.create_root);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::default()
            .with_root("/data")
            .with_max_open_bundles(8)
            .with_create_root(false);
        assert_eq!(config.root, PathBuf::from("/data"));
        assert_eq!(config.max_open_bundles, 8);
        assert!(!config.create_root);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = CacheConfig::new("/data").with_max_open_bundles(0);
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{ "root": "/srv/basemap", "max_open_bundles": 32 }"#)
            .expect("write");

        let config = CacheConfig::from_json_file(&path).expect("load");
        assert_eq!(config.root, PathBuf::from("/srv/basemap"));
        assert_eq!(config.max_open_bundles, 32);
        assert!(config.create_root);
    }

    #[test]
    fn test_json_file_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").expect("write");

        assert!(matches!(
            CacheConfig::from_json_file(&path),
            Err(StorageError::Config(_))
        ));
    }
}
