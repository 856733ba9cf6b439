//! Bundled raster tile storage.
//!
//! Tiles addressed by `(row, col, level)` are grouped into 128×128 blocks.
//! Each block is persisted as a pair of files that sit next to each other
//! under the tile-set root:
//!
//! - **`.bundlx`**: fixed-size index with one 5-byte offset per tile slot
//! - **`.bundle`**: 60-byte header, 64 KiB zero pseudo-index, then an
//!   append-only run of size-prefixed tile records
//!
//! Locating a tile costs one index read plus one data read. Writing a tile
//! appends its record to the bundle and then points the index slot at it.
//!
//! # Storage Layout
//!
//! ```text
//! <root>/L03/R0000C0128.bundle
//! <root>/L03/R0000C0128.bundlx
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tilebundle::{CacheConfig, TileCache, TileCoordinate};
//!
//! # fn example() -> tilebundle::Result<()> {
//! let cache = TileCache::open(CacheConfig::new("/srv/tiles/basemap"))?;
//!
//! let coord = TileCoordinate::new(5, 5, 3);
//! cache.write_tile(coord, &[0xAA, 0xBB])?;
//! assert_eq!(cache.read_tile(coord)?, Some(vec![0xAA, 0xBB]));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Coordinate to block/file mapping
pub mod addressing;

// Index file (.bundlx)
pub mod index;

// Data file (.bundle)
pub mod storage;

// Bounded registry of open bundle pairs
pub mod registry;

// Tile read/write orchestration
pub mod cache;

// Configuration
pub mod config;

// Named tile sets sharing one registry
mod tile_sets;

mod io;

pub use addressing::{BlockKey, BundlePaths, TileCoordinate};
pub use cache::TileCache;
pub use config::CacheConfig;
pub use index::{BundleIndex, TilePosition};
pub use registry::{BundleRegistry, RegistryStats};
pub use storage::{BundleHeader, BundleStore};
pub use tile_sets::TileSets;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bundle or bundlx contents do not match the expected layout.
    #[error("Corrupt bundle: {0}")]
    CorruptBundle(String),

    /// The bundle cannot address any more data with 32-bit offsets.
    #[error("Bundle full: {0}")]
    BundleFull(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Library version; also reported by the `tilebundle` binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of tile rows (and columns) in one block.
pub const BLOCK_SIZE: u32 = 128;

/// Number of tile slots in one block.
pub const SLOTS_PER_BLOCK: usize = (BLOCK_SIZE * BLOCK_SIZE) as usize;

/// Data file extension.
pub const BUNDLE_EXTENSION: &str = "bundle";

/// Index file extension.
pub const BUNDLX_EXTENSION: &str = "bundlx";
