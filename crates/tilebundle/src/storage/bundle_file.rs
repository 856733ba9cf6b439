//! Append-only bundle file handle.

use super::bundle_header::{FILE_SIZE_OFFSET, MAX_TILE_SIZE_OFFSET, NON_NULL_COUNT_OFFSET};
use super::{BUNDLE_HEADER_SIZE, BundleHeader, PSEUDO_INDEX_END, PSEUDO_INDEX_SIZE, RECORD_PREFIX_SIZE};
use crate::io::{create_atomic, open_read_write, read_exact_at, write_all_at};
use crate::{Result, StorageError};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Open handle on one block's `.bundle`.
///
/// Reads take `&self` and use positional I/O, so any number of readers may
/// share the handle. Inserts take `&mut self`.
#[derive(Debug)]
pub struct BundleStore {
    path: PathBuf,
    file: File,
    header: BundleHeader,
    /// Real end of file; the next record goes here.
    len: u64,
}

impl BundleStore {
    /// Write an empty bundle for the block at `(row_base, col_base)` and open it.
    pub fn create_new(path: &Path, row_base: u32, col_base: u32) -> Result<Self> {
        let header = BundleHeader::new(row_base, col_base);

        let mut contents = Vec::with_capacity(PSEUDO_INDEX_END as usize);
        contents.extend_from_slice(&header.to_bytes()?);
        contents.resize(BUNDLE_HEADER_SIZE + PSEUDO_INDEX_SIZE, 0);

        create_atomic(path, &contents)?;
        debug!(
            "Created bundle {} for rows {}..={} cols {}..={}",
            path.display(),
            header.row_start,
            header.row_end,
            header.col_start,
            header.col_end
        );
        Self::open(path)
    }

    /// Open an existing bundle and validate its header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_read_write(path)?;

        let len = file.metadata()?.len();
        if len < PSEUDO_INDEX_END {
            return Err(StorageError::CorruptBundle(format!(
                "{}: {len} bytes is shorter than an empty bundle",
                path.display()
            )));
        }

        let mut raw = [0u8; BUNDLE_HEADER_SIZE];
        read_exact_at(&file, &mut raw, 0)?;
        let header = BundleHeader::from_bytes(&raw)
            .map_err(|e| StorageError::CorruptBundle(format!("{}: {e}", path.display())))?;

        // An interrupted insert can leave the header ahead of the data
        if u64::from(header.file_size) != len {
            warn!(
                "{}: header records {} bytes but file has {len}",
                path.display(),
                header.file_size
            );
        }

        debug!("Opened bundle {} ({len} bytes)", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            len,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current header values.
    pub const fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// Current file length in bytes.
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether no tile record has been appended yet.
    pub const fn is_empty(&self) -> bool {
        self.len <= PSEUDO_INDEX_END
    }

    /// Read the tile record starting at `offset`.
    ///
    /// A zero size prefix, which is what every pseudo-index offset yields,
    /// returns an empty vector.
    pub fn tile_image(&self, offset: u64) -> Result<Vec<u8>> {
        if offset + RECORD_PREFIX_SIZE > self.len {
            return Err(StorageError::CorruptBundle(format!(
                "{}: record offset {offset} beyond end of file ({})",
                self.path.display(),
                self.len
            )));
        }

        let mut prefix = [0u8; RECORD_PREFIX_SIZE as usize];
        read_exact_at(&self.file, &mut prefix, offset)?;
        let size = u32::from_le_bytes(prefix);
        if size == 0 {
            return Ok(Vec::new());
        }

        let start = offset + RECORD_PREFIX_SIZE;
        if start + u64::from(size) > self.len {
            return Err(StorageError::CorruptBundle(format!(
                "{}: record at {offset} claims {size} bytes past end of file",
                self.path.display()
            )));
        }

        let mut data = vec![0u8; size as usize];
        read_exact_at(&self.file, &mut data, start)?;
        Ok(data)
    }

    /// Append a tile record and return its offset.
    ///
    /// The header counters are updated in place first, then the record is
    /// written at end of file.
    pub fn insert_data(&mut self, data: &[u8]) -> Result<u64> {
        let size = u32::try_from(data.len()).map_err(|_| {
            StorageError::BundleFull(format!("tile of {} bytes is too large", data.len()))
        })?;

        let offset = self.len;
        let new_len = offset + RECORD_PREFIX_SIZE + u64::from(size);
        let file_size = u32::try_from(new_len).map_err(|_| {
            StorageError::BundleFull(format!(
                "{}: appending {size} bytes would exceed 4 GiB",
                self.path.display()
            ))
        })?;

        let mut header = self.header.clone();
        header.max_tile_size = header.max_tile_size.max(size);
        header.non_null_count = BundleHeader::next_non_null_count(header.non_null_count);
        header.file_size = file_size;

        write_all_at(&self.file, &header.max_tile_size.to_le_bytes(), MAX_TILE_SIZE_OFFSET)?;
        write_all_at(&self.file, &header.non_null_count.to_le_bytes(), NON_NULL_COUNT_OFFSET)?;
        write_all_at(&self.file, &header.file_size.to_le_bytes(), FILE_SIZE_OFFSET)?;
        self.header = header;

        let mut record = Vec::with_capacity(RECORD_PREFIX_SIZE as usize + data.len());
        record.extend_from_slice(&size.to_le_bytes());
        record.extend_from_slice(data);
        write_all_at(&self.file, &record, offset)?;
        self.len = new_len;

        trace!(
            "Appended {size} bytes to {} at offset {offset}",
            self.path.display()
        );
        Ok(offset)
    }

    /// Flush file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
