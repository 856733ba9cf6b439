//! Bounded registry of open bundle pairs.
//!
//! Every block that has been touched recently keeps its `.bundle` and
//! `.bundlx` handles open here, keyed by the absolute base path of the pair.
//! The registry holds at most `capacity` pairs; the least recently used
//! pair is dropped (closing both files) when a new one is opened.
//!
//! Each pair sits behind its own [`RwLock`]. Readers of a block share it,
//! a writer holds it exclusively. Blocks never share a lock.
//!
//! Open pairs are also published in a process-wide table of weak handles.
//! Any registry looking up a block path first reuses a pair that is still
//! alive anywhere in the process, so two registries (or two caches on the
//! same root) never hold two handles with two locks for one block. A pair
//! evicted while an operation still holds it is found the same way.
//!
//! The registry mutex only guards LRU bookkeeping. Opening or creating
//! files happens under a per-block guard, so a cold block never stalls
//! lookups of other blocks.

use crate::addressing::BundlePaths;
use crate::index::BundleIndex;
use crate::storage::BundleStore;
use crate::{Result, StorageError};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info};

/// Open index and data handles of one block.
#[derive(Debug)]
pub struct BundlePair {
    paths: BundlePaths,
    index: BundleIndex,
    store: BundleStore,
}

/// Shared, lockable bundle pair as handed out by the registry.
pub type SharedBundle = Arc<RwLock<BundlePair>>;

impl BundlePair {
    /// Open both files of an existing block.
    pub fn open(paths: &BundlePaths) -> Result<Self> {
        let store = BundleStore::open(&paths.bundle())?;
        let index = BundleIndex::open(&paths.bundlx())?;
        Ok(Self {
            paths: paths.clone(),
            index,
            store,
        })
    }

    /// Open both files, creating whichever is missing.
    ///
    /// Returns the pair and whether anything was created.
    pub fn open_or_create(paths: &BundlePaths) -> Result<(Self, bool)> {
        std::fs::create_dir_all(paths.dir())?;
        let block = paths.block();
        let mut created = false;

        let bundle_path = paths.bundle();
        let store = if bundle_path.is_file() {
            BundleStore::open(&bundle_path)?
        } else {
            created = true;
            BundleStore::create_new(&bundle_path, block.row_base, block.col_base)?
        };

        let bundlx_path = paths.bundlx();
        let index = if bundlx_path.is_file() {
            BundleIndex::open(&bundlx_path)?
        } else {
            created = true;
            BundleIndex::create_new(&bundlx_path)?
        };

        Ok((
            Self {
                paths: paths.clone(),
                index,
                store,
            },
            created,
        ))
    }

    /// Paths of the pair.
    pub const fn paths(&self) -> &BundlePaths {
        &self.paths
    }

    /// Index handle.
    pub const fn index(&self) -> &BundleIndex {
        &self.index
    }

    /// Data handle.
    pub const fn store(&self) -> &BundleStore {
        &self.store
    }

    /// Both handles, mutably.
    pub fn parts_mut(&mut self) -> (&mut BundleIndex, &mut BundleStore) {
        (&mut self.index, &mut self.store)
    }

    /// Flush both files to disk, data first.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()?;
        self.index.sync()
    }
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Lookups served by an already open pair.
    pub hits: u64,
    /// Lookups that had to open or create a pair.
    pub misses: u64,
    /// Pairs created on disk.
    pub created: u64,
    /// Pairs dropped to stay within capacity.
    pub evictions: u64,
    /// Pairs currently held open.
    pub open: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    created: AtomicU64,
    evictions: AtomicU64,
}

/// Process-wide view of open blocks, shared by every registry.
#[derive(Debug, Default)]
struct BlockTable {
    /// Every pair still alive somewhere in the process.
    live: DashMap<PathBuf, Weak<RwLock<BundlePair>>>,
    /// One guard per block while its files are being opened or created.
    opening: DashMap<PathBuf, Arc<Mutex<()>>>,
}

static BLOCK_TABLE: OnceLock<BlockTable> = OnceLock::new();

fn block_table() -> &'static BlockTable {
    BLOCK_TABLE.get_or_init(BlockTable::default)
}

impl BlockTable {
    fn find(&self, key: &Path) -> Option<SharedBundle> {
        let found = self.live.get(key).and_then(|weak| weak.upgrade());
        if found.is_none() {
            self.live.remove_if(key, |_, weak| weak.strong_count() == 0);
        }
        found
    }

    fn publish(&self, key: &Path, bundle: &SharedBundle) {
        self.live.insert(key.to_path_buf(), Arc::downgrade(bundle));
    }

    fn open_guard(&self, key: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.opening.entry(key.to_path_buf()).or_default().value())
    }

    fn release_guard(&self, key: &Path, guard: Arc<Mutex<()>>) {
        drop(guard);
        // Only the table's own handle left means nobody else is waiting
        self.opening
            .remove_if(key, |_, held| Arc::strong_count(held) == 1);
    }
}

/// Bounded LRU of open bundle pairs.
pub struct BundleRegistry {
    open: Mutex<LruCache<PathBuf, SharedBundle>>,
    counters: Counters,
}

impl BundleRegistry {
    /// Create a registry holding at most `capacity` open pairs.
    ///
    /// Keys are the paths given to lookups. Use absolute, canonical paths so
    /// every registry in the process agrees on a block's identity.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            StorageError::Config("bundle registry capacity must be at least 1".to_string())
        })?;
        info!("Bundle registry holds up to {} open blocks", capacity);

        Ok(Self {
            open: Mutex::new(LruCache::new(capacity)),
            counters: Counters::default(),
        })
    }

    /// Pair for an existing block, or `None` if either file is missing.
    pub fn get(&self, paths: &BundlePaths) -> Result<Option<SharedBundle>> {
        let key = paths.base();
        if let Some(bundle) = self.lookup(key) {
            return Ok(Some(bundle));
        }

        let table = block_table();
        let guard = table.open_guard(key);
        let result = {
            let _opening = guard.lock();
            self.open_locked(key, || {
                if !paths.exists() {
                    return Ok(None);
                }
                Ok(Some(BundlePair::open(paths)?))
            })
        };
        table.release_guard(key, guard);
        result
    }

    /// Pair for a block, creating its files on first use.
    ///
    /// Creation runs under the block's guard, so two writers racing on a
    /// new block create it once and a concurrent reader never sees a
    /// half-created pair.
    pub fn get_or_create(&self, paths: &BundlePaths) -> Result<SharedBundle> {
        let key = paths.base();
        if let Some(bundle) = self.lookup(key) {
            return Ok(bundle);
        }

        let table = block_table();
        let guard = table.open_guard(key);
        let result = {
            let _opening = guard.lock();
            self.open_locked(key, || {
                let (pair, created) = BundlePair::open_or_create(paths)?;
                if created {
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    info!("Initialized block {}", paths.block());
                }
                Ok(Some(pair))
            })
        };
        table.release_guard(key, guard);

        result?.ok_or_else(|| {
            StorageError::CorruptBundle(format!("block {} vanished while opening", paths.block()))
        })
    }

    /// Open path, run while holding the block's guard.
    fn open_locked<F>(&self, key: &Path, open: F) -> Result<Option<SharedBundle>>
    where
        F: FnOnce() -> Result<Option<BundlePair>>,
    {
        // Another thread or registry may have won the race
        if let Some(bundle) = self.lookup(key) {
            return Ok(Some(bundle));
        }
        let Some(pair) = open()? else {
            return Ok(None);
        };

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let bundle = Arc::new(RwLock::new(pair));
        block_table().publish(key, &bundle);
        self.insert(key, &bundle);
        Ok(Some(bundle))
    }

    fn lookup(&self, key: &Path) -> Option<SharedBundle> {
        if let Some(bundle) = self.open.lock().get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(bundle));
        }

        // Alive elsewhere: evicted but still borrowed, or held by another registry
        let found = block_table().find(key)?;
        debug!("Reusing live block {}", key.display());
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.insert(key, &found);
        Some(found)
    }

    fn insert(&self, key: &Path, bundle: &SharedBundle) {
        let evicted = self.open.lock().push(key.to_path_buf(), Arc::clone(bundle));
        let Some((evicted_key, evicted)) = evicted else {
            return;
        };
        if evicted_key.as_path() == key {
            // Same key re-inserted, nothing left the cache
            return;
        }
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);

        if Arc::strong_count(&evicted) == 1 {
            debug!("Closing block {}", evicted_key.display());
        } else {
            debug!(
                "Evicted block {} is still in use, closing when released",
                evicted_key.display()
            );
        }
        drop(evicted);
        block_table()
            .live
            .remove_if(&evicted_key, |_, weak| weak.strong_count() == 0);
    }

    /// Flush every open pair to disk.
    pub fn sync_all(&self) -> Result<()> {
        let bundles: Vec<SharedBundle> = self
            .open
            .lock()
            .iter()
            .map(|(_, bundle)| Arc::clone(bundle))
            .collect();

        for bundle in &bundles {
            bundle.read().sync()?;
        }
        debug!("Synced {} open blocks", bundles.len());
        Ok(())
    }

    /// Drop every open pair. Pairs still borrowed close when released.
    pub fn close_all(&self) {
        let count = {
            let mut open = self.open.lock();
            let count = open.len();
            open.clear();
            count
        };
        block_table().live.retain(|_, weak| weak.strong_count() > 0);
        info!("Closed {} open blocks", count);
    }

    /// Number of pairs currently held open.
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    /// Whether no pair is held open.
    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }

    /// Maximum number of pairs held open.
    pub fn capacity(&self) -> usize {
        self.open.lock().cap().get()
    }

    /// Whether the block at `paths` is currently held open.
    pub fn contains(&self, paths: &BundlePaths) -> bool {
        self.open.lock().contains(paths.base())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            created: self.counters.created.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            open: self.len(),
        }
    }
}

impl std::fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleRegistry")
            .field("open", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
