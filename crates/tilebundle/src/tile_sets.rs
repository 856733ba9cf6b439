//! Named tile sets under one base directory.
//!
//! Each tile set is a subdirectory of the base path with its own `Lxx`
//! tree. All sets share a single [`BundleRegistry`], so the open-file bound
//! applies to the process as a whole rather than per set.

use crate::cache::TileCache;
use crate::config::CacheConfig;
use crate::registry::{BundleRegistry, RegistryStats};
use crate::{Result, StorageError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Tile sets sharing one bundle registry.
#[derive(Debug)]
pub struct TileSets {
    config: CacheConfig,
    registry: Arc<BundleRegistry>,
    sets: DashMap<String, Arc<TileCache>>,
}

impl TileSets {
    /// Create the manager. `config.root` is the base directory holding one
    /// subdirectory per tile set.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the base directory
    /// cannot be created
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        if !config.root.exists() && config.create_root {
            info!("Creating tile-set base directory: {}", config.root.display());
            std::fs::create_dir_all(&config.root)?;
        }
        let registry = Arc::new(BundleRegistry::new(config.max_open_bundles)?);

        Ok(Self {
            config,
            registry,
            sets: DashMap::new(),
        })
    }

    /// Open a tile set by name, creating its directory on first use.
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a single path component or the
    /// directory cannot be opened
    pub fn open_tile_set(&self, name: &str) -> Result<Arc<TileCache>> {
        if let Some(cache) = self.sets.get(name) {
            return Ok(Arc::clone(cache.value()));
        }
        validate_name(name)?;

        let entry = self.sets.entry(name.to_string());
        let cache = match entry {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let config = self.config.clone().with_root(self.config.root.join(name));
                let cache = Arc::new(TileCache::with_registry(&config, Arc::clone(&self.registry))?);
                vacant.insert(Arc::clone(&cache));
                cache
            }
        };
        Ok(cache)
    }

    /// Names of all currently open tile sets, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Base directory of all tile sets.
    pub fn base_path(&self) -> &Path {
        &self.config.root
    }

    /// Directory a tile set named `name` lives in.
    pub fn tile_set_path(&self, name: &str) -> PathBuf {
        self.config.root.join(name)
    }

    /// Counters of the shared registry.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Flush and close all open bundle pairs of every tile set.
    pub fn close(&self) -> Result<()> {
        self.registry.sync_all()?;
        self.registry.close_all();
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let single_component = {
        let mut components = Path::new(name).components();
        matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        )
    };
    if name.is_empty() || !single_component || name.contains(['/', '\\']) {
        return Err(StorageError::Config(format!(
            "invalid tile set name {name:?}"
        )));
    }
    Ok(())
}
