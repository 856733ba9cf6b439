//! Tile coordinate to block and file name mapping.
//!
//! A block covers 128 rows by 128 columns of one zoom level. Its files are
//! named after the block's top-left corner:
//!
//! | Part | Format | Example for (row 5, col 130, level 3) |
//! |------|--------|------|
//! | Directory | `L{level:02}` | `L03` |
//! | Base name | `R{row_base:04}C{col_base:04}` | `R0000C0128` |
//!
//! Everything here is pure arithmetic; no I/O happens.

use crate::{BLOCK_SIZE, BUNDLE_EXTENSION, BUNDLX_EXTENSION};
use std::fmt;
use std::path::{Path, PathBuf};

/// Global tile coordinate as supplied by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    /// Tile row.
    pub row: u32,
    /// Tile column.
    pub col: u32,
    /// Zoom level.
    pub level: u32,
}

impl TileCoordinate {
    /// Create a coordinate from its parts.
    pub const fn new(row: u32, col: u32, level: u32) -> Self {
        Self { row, col, level }
    }

    /// Block that owns this tile.
    pub const fn block(&self) -> BlockKey {
        BlockKey::of(*self)
    }

    /// Position of the tile inside its block as `(row, col)`, each `< 128`.
    pub const fn slot(&self) -> (u32, u32) {
        (self.row % BLOCK_SIZE, self.col % BLOCK_SIZE)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/R{}/C{}", self.level, self.row, self.col)
    }
}

/// Identity of a 128×128 block: zoom level plus aligned top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    /// Zoom level.
    pub level: u32,
    /// First row of the block (multiple of 128).
    pub row_base: u32,
    /// First column of the block (multiple of 128).
    pub col_base: u32,
}

impl BlockKey {
    /// Block containing `coord`.
    pub const fn of(coord: TileCoordinate) -> Self {
        let (row_base, col_base) = block_of(coord.row, coord.col);
        Self {
            level: coord.level,
            row_base,
            col_base,
        }
    }

    /// Last row covered by the block.
    pub const fn row_end(&self) -> u32 {
        self.row_base + (BLOCK_SIZE - 1)
    }

    /// Last column covered by the block.
    pub const fn col_end(&self) -> u32 {
        self.col_base + (BLOCK_SIZE - 1)
    }

    /// Level directory name, e.g. `L03`.
    pub fn level_dir(&self) -> String {
        format!("L{:02}", self.level)
    }

    /// File stem shared by the bundle and bundlx, e.g. `R0000C0128`.
    pub fn base_name(&self) -> String {
        format!("R{:04}C{:04}", self.row_base, self.col_base)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.level_dir(), self.base_name())
    }
}

/// Aligned `(row_base, col_base)` of the block holding `(row, col)`.
pub const fn block_of(row: u32, col: u32) -> (u32, u32) {
    (
        (row / BLOCK_SIZE) * BLOCK_SIZE,
        (col / BLOCK_SIZE) * BLOCK_SIZE,
    )
}

/// On-disk locations of one block's file pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundlePaths {
    block: BlockKey,
    dir: PathBuf,
    base: PathBuf,
}

impl BundlePaths {
    /// Resolve the file pair for `block` under a tile-set `root`.
    pub fn resolve(root: &Path, block: BlockKey) -> Self {
        let dir = root.join(block.level_dir());
        let base = dir.join(block.base_name());
        Self { block, dir, base }
    }

    /// Resolve the file pair holding `coord`.
    pub fn for_tile(root: &Path, coord: TileCoordinate) -> Self {
        Self::resolve(root, coord.block())
    }

    /// Block these paths belong to.
    pub const fn block(&self) -> BlockKey {
        self.block
    }

    /// Level directory containing both files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path without extension; the registry keys open pairs by it.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Data file path.
    pub fn bundle(&self) -> PathBuf {
        self.base.with_extension(BUNDLE_EXTENSION)
    }

    /// Index file path.
    pub fn bundlx(&self) -> PathBuf {
        self.base.with_extension(BUNDLX_EXTENSION)
    }

    /// Whether both files are present.
    pub fn exists(&self) -> bool {
        self.bundle().is_file() && self.bundlx().is_file()
    }
}
