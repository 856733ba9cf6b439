//! Tile reads and writes over bundle pairs.
//!
//! A [`TileCache`] serves one tile-set root. It resolves each coordinate to
//! its block, fetches the block's pair from the shared [`BundleRegistry`]
//! and performs the index/data round trip under the block's lock.
//!
//! Writes append the tile data before touching the index. If the process
//! dies between the two, the slot still holds its previous value and the
//! new tile simply reads as missing.

use crate::addressing::{BlockKey, BundlePaths, TileCoordinate};
use crate::config::CacheConfig;
use crate::index::TilePosition;
use crate::registry::{BundleRegistry, RegistryStats};
use crate::storage::BundleHeader;
use crate::{Result, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Tile cache rooted at one tile-set directory.
#[derive(Debug)]
pub struct TileCache {
    root: PathBuf,
    registry: Arc<BundleRegistry>,
}

impl TileCache {
    /// Open a cache with its own registry sized from `config`.
    ///
    /// Blocks open in any other cache of this process are shared with it,
    /// so caches opened twice on one root still serialize writes per block.
    pub fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(BundleRegistry::new(config.max_open_bundles)?);
        Self::with_registry(&config, registry)
    }

    /// Open a cache that shares `registry` with other tile sets.
    ///
    /// `config.max_open_bundles` is ignored; the registry's capacity applies.
    pub fn with_registry(config: &CacheConfig, registry: Arc<BundleRegistry>) -> Result<Self> {
        if !config.root.exists() {
            if !config.create_root {
                return Err(StorageError::Config(format!(
                    "tile-set root {} does not exist",
                    config.root.display()
                )));
            }
            info!("Creating tile-set root {}", config.root.display());
            std::fs::create_dir_all(&config.root)?;
        }
        if !config.root.is_dir() {
            return Err(StorageError::Config(format!(
                "tile-set root {} is not a directory",
                config.root.display()
            )));
        }

        // Registry keys must be absolute so every cache agrees on them
        let root = std::fs::canonicalize(&config.root)?;
        info!("Opened tile cache at {}", root.display());

        Ok(Self { root, registry })
    }

    /// Canonical tile-set root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registry backing this cache.
    pub const fn registry(&self) -> &Arc<BundleRegistry> {
        &self.registry
    }

    /// File pair holding `coord`.
    pub fn paths(&self, coord: TileCoordinate) -> BundlePaths {
        BundlePaths::for_tile(&self.root, coord)
    }

    /// Read one tile. `None` means no tile is stored at `coord`.
    pub fn read_tile(&self, coord: TileCoordinate) -> Result<Option<Vec<u8>>> {
        let paths = self.paths(coord);
        let Some(bundle) = self.registry.get(&paths)? else {
            trace!("No bundle for {coord}");
            return Ok(None);
        };
        let pair = bundle.read();

        let offset = match pair.index().tile_position(coord.row, coord.col)? {
            TilePosition::Empty => return Ok(None),
            TilePosition::At(offset) => offset,
        };

        let data = pair.store().tile_image(offset)?;
        if data.is_empty() {
            return Ok(None);
        }
        trace!("Read {} bytes for {coord}", data.len());
        Ok(Some(data))
    }

    /// Whether a non-empty tile is stored at `coord`.
    pub fn has_tile(&self, coord: TileCoordinate) -> Result<bool> {
        Ok(self.read_tile(coord)?.is_some())
    }

    /// Store one tile, replacing any previous tile at `coord`.
    ///
    /// Returns the offset of the new record in the block's bundle. The old
    /// record stays in the file; bundles only grow.
    pub fn write_tile(&self, coord: TileCoordinate, data: &[u8]) -> Result<u64> {
        let paths = self.paths(coord);
        let bundle = self.registry.get_or_create(&paths)?;
        let mut pair = bundle.write();
        let (index, store) = pair.parts_mut();

        let offset = store.insert_data(data)?;
        index.insert_data(coord.row, coord.col, offset)?;

        debug!("Wrote {} bytes for {coord} at offset {offset}", data.len());
        Ok(offset)
    }

    /// Header of the block's bundle, or `None` if the block has no files.
    pub fn block_header(&self, block: BlockKey) -> Result<Option<BundleHeader>> {
        let paths = BundlePaths::resolve(&self.root, block);
        let Some(bundle) = self.registry.get(&paths)? else {
            return Ok(None);
        };
        let header = bundle.read().store().header().clone();
        Ok(Some(header))
    }

    /// Coordinates of every tile written into `block`, with record offsets.
    pub fn block_tiles(&self, block: BlockKey) -> Result<Vec<(TileCoordinate, u64)>> {
        let paths = BundlePaths::resolve(&self.root, block);
        let Some(bundle) = self.registry.get(&paths)? else {
            return Ok(Vec::new());
        };
        let positions = bundle.read().index().positions()?;

        Ok(positions
            .into_iter()
            .map(|((row, col), offset)| {
                (
                    TileCoordinate::new(block.row_base + row, block.col_base + col, block.level),
                    offset,
                )
            })
            .collect())
    }

    /// Registry counters.
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Flush every open pair in the registry to disk.
    pub fn flush(&self) -> Result<()> {
        self.registry.sync_all()
    }

    /// Flush, then close every open pair in the registry.
    ///
    /// The registry may be shared; other caches on it lose their open
    /// handles too and reopen them on next access.
    pub fn close(&self) -> Result<()> {
        self.registry.sync_all()?;
        self.registry.close_all();
        Ok(())
    }
}

#[cfg(feature = "async")]
impl TileCache {
    /// [`read_tile`](Self::read_tile) on the blocking thread pool.
    pub async fn read_tile_async(self: &Arc<Self>, coord: TileCoordinate) -> Result<Option<Vec<u8>>> {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.read_tile(coord))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }

    /// [`write_tile`](Self::write_tile) on the blocking thread pool.
    pub async fn write_tile_async(self: &Arc<Self>, coord: TileCoordinate, data: Vec<u8>) -> Result<u64> {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.write_tile(coord, &data))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::PSEUDO_INDEX_END;
    use pretty_assertions::assert_eq;

    fn open_cache(dir: &tempfile::TempDir) -> TileCache {
        TileCache::open(CacheConfig::new(dir.path()).with_max_open_bundles(4)).expect("open cache")
    }

    #[test]
    fn test_round_trip_example_tile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let coord = TileCoordinate::new(5, 5, 3);

        cache.write_tile(coord, &[0xAA, 0xBB]).expect("write");
        assert_eq!(cache.read_tile(coord).expect("read"), Some(vec![0xAA, 0xBB]));

        let paths = cache.paths(coord);
        assert!(paths.bundle().ends_with("L03/R0000C0000.bundle"));
        assert!(paths.bundle().is_file());
        assert!(paths.bundlx().is_file());
    }

    #[test]
    fn test_missing_block_reads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);

        assert_eq!(cache.read_tile(TileCoordinate::new(1, 2, 7)).expect("read"), None);
        assert!(!dir.path().join("L07").exists());
        assert_eq!(cache.block_header(TileCoordinate::new(1, 2, 7).block()).expect("header"), None);
    }

    #[test]
    fn test_unwritten_slot_reads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);

        cache.write_tile(TileCoordinate::new(0, 0, 2), b"a").expect("write");
        assert_eq!(cache.read_tile(TileCoordinate::new(0, 1, 2)).expect("read"), None);
        assert_eq!(cache.read_tile(TileCoordinate::new(127, 127, 2)).expect("read"), None);
        assert!(!cache.has_tile(TileCoordinate::new(3, 3, 2)).expect("has"));
        assert!(cache.has_tile(TileCoordinate::new(0, 0, 2)).expect("has"));
    }

    #[test]
    fn test_same_block_two_tiles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let a = TileCoordinate::new(0, 0, 1);
        let b = TileCoordinate::new(1, 1, 1);

        cache.write_tile(a, b"first").expect("write a");
        let count_after_a = cache
            .block_header(a.block())
            .expect("header")
            .expect("exists")
            .non_null_count;
        cache.write_tile(b, b"second").expect("write b");
        let count_after_b = cache
            .block_header(a.block())
            .expect("header")
            .expect("exists")
            .non_null_count;

        assert!(count_after_b > count_after_a);
        assert_eq!(cache.read_tile(a).expect("read"), Some(b"first".to_vec()));
        assert_eq!(cache.read_tile(b).expect("read"), Some(b"second".to_vec()));
    }

    #[test]
    fn test_file_size_header_after_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let tiles: Vec<(TileCoordinate, Vec<u8>)> = (0..10u32)
            .map(|i| (TileCoordinate::new(i, i * 3, 4), vec![i as u8; (i * 17 + 1) as usize]))
            .collect();

        for (coord, data) in &tiles {
            cache.write_tile(*coord, data).expect("write");
        }

        let expected = PSEUDO_INDEX_END + tiles.iter().map(|(_, d)| 4 + d.len() as u64).sum::<u64>();
        let header = cache
            .block_header(tiles[0].0.block())
            .expect("header")
            .expect("exists");
        assert_eq!(u64::from(header.file_size), expected);
        assert_eq!(header.max_tile_size, 9 * 17 + 1);
        assert_eq!(header.non_null_count, 40);

        let on_disk = std::fs::metadata(cache.paths(tiles[0].0).bundle()).expect("meta").len();
        assert_eq!(on_disk, expected);
    }

    #[test]
    fn test_extent_header_matches_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let coord = TileCoordinate::new(300, 700, 9);

        cache.write_tile(coord, b"x").expect("write");
        let header = cache.block_header(coord.block()).expect("header").expect("exists");
        assert_eq!((header.row_start, header.row_end), (256, 383));
        assert_eq!((header.col_start, header.col_end), (640, 767));
    }

    #[test]
    fn test_overwrite_returns_latest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let coord = TileCoordinate::new(10, 20, 5);

        let first = cache.write_tile(coord, b"old").expect("write");
        let second = cache.write_tile(coord, b"newer").expect("write");
        assert!(second > first);
        assert_eq!(cache.read_tile(coord).expect("read"), Some(b"newer".to_vec()));
    }

    #[test]
    fn test_empty_payload_reads_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let coord = TileCoordinate::new(1, 1, 1);

        cache.write_tile(coord, &[]).expect("write");
        assert_eq!(cache.read_tile(coord).expect("read"), None);
    }

    #[test]
    fn test_block_tiles_lists_written_coordinates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let a = TileCoordinate::new(130, 260, 6);
        let b = TileCoordinate::new(200, 300, 6);

        let off_a = cache.write_tile(a, b"a").expect("write");
        let off_b = cache.write_tile(b, b"b").expect("write");

        let mut tiles = cache.block_tiles(a.block()).expect("tiles");
        tiles.sort_by_key(|(_, offset)| *offset);
        assert_eq!(tiles, vec![(a, off_a), (b, off_b)]);
    }

    #[test]
    fn test_root_must_exist_when_not_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CacheConfig::new(dir.path().join("missing")).with_create_root(false);
        assert!(matches!(TileCache::open(config), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_survives_eviction_and_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TileCache::open(CacheConfig::new(dir.path()).with_max_open_bundles(1))
            .expect("open cache");
        let a = TileCoordinate::new(0, 0, 1);
        let b = TileCoordinate::new(128, 0, 1);

        cache.write_tile(a, b"a").expect("write");
        cache.write_tile(b, b"b").expect("write");
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.read_tile(a).expect("read"), Some(b"a".to_vec()));

        cache.close().expect("close");
        assert_eq!(cache.stats().open, 0);
        assert_eq!(cache.read_tile(b).expect("read"), Some(b"b".to_vec()));
    }

    #[test]
    fn test_two_caches_on_one_root_share_blocks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = open_cache(&dir);
        let second = open_cache(&dir);
        let (a, b, c) = (
            TileCoordinate::new(0, 0, 1),
            TileCoordinate::new(0, 1, 1),
            TileCoordinate::new(0, 2, 1),
        );

        first.write_tile(a, b"AAAA").expect("write a");
        assert_eq!(second.read_tile(a).expect("read a"), Some(b"AAAA".to_vec()));
        let offset_b = first.write_tile(b, b"BBBBBBBB").expect("write b");
        let offset_c = second.write_tile(c, b"CC").expect("write c");

        assert_eq!(offset_c, offset_b + 4 + 8);
        assert_eq!(first.read_tile(b).expect("read b"), Some(b"BBBBBBBB".to_vec()));
        assert_eq!(first.read_tile(c).expect("read c"), Some(b"CC".to_vec()));

        let header = second.block_header(a.block()).expect("header").expect("exists");
        assert_eq!(header.non_null_count, 12);
        let on_disk = std::fs::metadata(first.paths(a).bundle()).expect("meta").len();
        assert_eq!(u64::from(header.file_size), on_disk);
    }

    #[test]
    fn test_flush_and_close_keep_tiles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = open_cache(&dir);
        let coord = TileCoordinate::new(12, 34, 5);

        cache.write_tile(coord, b"durable").expect("write");
        cache.flush().expect("flush");
        assert_eq!(cache.stats().open, 1);

        cache.close().expect("close");
        assert_eq!(cache.stats().open, 0);
        assert_eq!(cache.read_tile(coord).expect("read"), Some(b"durable".to_vec()));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(open_cache(&dir));
        let coord = TileCoordinate::new(9, 9, 9);

        cache
            .write_tile_async(coord, vec![1, 2, 3])
            .await
            .expect("write");
        assert_eq!(
            cache.read_tile_async(coord).await.expect("read"),
            Some(vec![1, 2, 3])
        );
    }
}
