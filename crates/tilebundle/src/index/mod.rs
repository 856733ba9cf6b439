//! Index file (.bundlx) management
//!
//! The bundlx holds one 5-byte little-endian offset per tile slot of its
//! block. Offsets point at the size prefix of a tile record in the paired
//! `.bundle`.
//!
//! Layout (81952 bytes total):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 16   | Header magic |
//! | 0x10   | 81920 | 128×128 slots, 5 bytes each, column-major |
//! | 0x14010 | 16  | Footer magic |
//!
//! Slot `(row, col)` lives at byte `16 + (col * 128 + row) * 5`.
//!
//! A freshly created index points slot `n` at `60 + n * 4`, which lands in
//! the bundle's zero-filled pseudo-index. Such offsets decode to
//! [`TilePosition::Empty`] here so the magic value never leaks further.

use crate::io::{create_atomic, open_read_write, read_exact_at, write_all_at};
use crate::storage::{BUNDLE_HEADER_SIZE, PSEUDO_INDEX_END};
use crate::{BLOCK_SIZE, Result, SLOTS_PER_BLOCK, StorageError};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Bundlx header bytes.
pub const BUNDLX_HEADER: [u8; 16] = [
    0x03, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00,
];

/// Bundlx footer bytes.
pub const BUNDLX_FOOTER: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Width of one slot in bytes.
pub const SLOT_WIDTH: usize = 5;

/// Size of the slot table.
pub const SLOT_TABLE_SIZE: usize = SLOTS_PER_BLOCK * SLOT_WIDTH;

/// Total size of a bundlx file.
pub const BUNDLX_FILE_SIZE: u64 = (BUNDLX_HEADER.len() + SLOT_TABLE_SIZE + BUNDLX_FOOTER.len()) as u64;

/// Where a tile's record lives in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePosition {
    /// The slot was never written.
    Empty,
    /// Byte offset of the record's size prefix in the bundle.
    At(u64),
}

impl TilePosition {
    /// Offset of the record, if any.
    pub const fn offset(self) -> Option<u64> {
        match self {
            Self::Empty => None,
            Self::At(offset) => Some(offset),
        }
    }

    /// Interpret a raw slot value.
    ///
    /// Offsets into the pseudo-index are the default sentinel. Offsets into
    /// the 60-byte bundle header can never be produced by a writer.
    pub fn from_raw(raw: u64) -> Result<Self> {
        if raw < BUNDLE_HEADER_SIZE as u64 {
            return Err(StorageError::CorruptBundle(format!(
                "slot offset {raw} points into the bundle header"
            )));
        }
        if raw < PSEUDO_INDEX_END {
            Ok(Self::Empty)
        } else {
            Ok(Self::At(raw))
        }
    }
}

/// Byte position of slot `(row, col)` in the bundlx. Both are taken mod 128.
pub const fn slot_position(row: u32, col: u32) -> u64 {
    let row = (row % BLOCK_SIZE) as u64;
    let col = (col % BLOCK_SIZE) as u64;
    BUNDLX_HEADER.len() as u64 + (col * BLOCK_SIZE as u64 + row) * SLOT_WIDTH as u64
}

/// Decode a 5-byte little-endian slot.
///
/// Bundles address at most 4 GiB, so a non-zero high byte means the slot
/// is damaged.
pub fn decode_slot(bytes: [u8; SLOT_WIDTH]) -> Result<u64> {
    let value = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

    if bytes[4] != 0 {
        return Err(StorageError::CorruptBundle(format!(
            "slot offset {value:#x} exceeds the 32-bit bundle range"
        )));
    }
    Ok(value)
}

/// Encode an offset as a 5-byte little-endian slot.
pub fn encode_slot(offset: u64) -> Result<[u8; SLOT_WIDTH]> {
    let offset = u32::try_from(offset).map_err(|_| {
        StorageError::BundleFull(format!("offset {offset:#x} does not fit in 32 bits"))
    })?;
    let le = offset.to_le_bytes();
    Ok([le[0], le[1], le[2], le[3], 0])
}

/// Contents of a new bundlx: header, default sentinel per slot, footer.
fn initial_contents() -> Vec<u8> {
    let mut buf = Vec::with_capacity(BUNDLX_FILE_SIZE as usize);
    buf.extend_from_slice(&BUNDLX_HEADER);
    for n in 0..SLOTS_PER_BLOCK as u64 {
        let sentinel = BUNDLE_HEADER_SIZE as u64 + n * 4;
        buf.extend_from_slice(&sentinel.to_le_bytes()[..SLOT_WIDTH]);
    }
    buf.extend_from_slice(&BUNDLX_FOOTER);
    buf
}

/// Open handle on one block's bundlx.
#[derive(Debug)]
pub struct BundleIndex {
    path: PathBuf,
    file: File,
}

impl BundleIndex {
    /// Write a fresh bundlx at `path`, replacing anything there, and open it.
    pub fn create_new(path: &Path) -> Result<Self> {
        create_atomic(path, &initial_contents())?;
        debug!("Created bundle index {}", path.display());
        Self::open(path)
    }

    /// Open an existing bundlx, checking its size, header and footer.
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_read_write(path)?;

        let len = file.metadata()?.len();
        if len != BUNDLX_FILE_SIZE {
            return Err(StorageError::CorruptBundle(format!(
                "{}: expected {BUNDLX_FILE_SIZE} bytes, found {len}",
                path.display()
            )));
        }

        let mut header = [0u8; 16];
        read_exact_at(&file, &mut header, 0)?;
        let mut footer = [0u8; 16];
        read_exact_at(&file, &mut footer, BUNDLX_FILE_SIZE - 16)?;

        if header != BUNDLX_HEADER || footer != BUNDLX_FOOTER {
            return Err(StorageError::CorruptBundle(format!(
                "{}: bad bundlx header or footer",
                path.display()
            )));
        }

        debug!("Opened bundle index {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw slot value for `(row, col)`.
    pub fn raw_slot(&self, row: u32, col: u32) -> Result<u64> {
        let mut bytes = [0u8; SLOT_WIDTH];
        read_exact_at(&self.file, &mut bytes, slot_position(row, col))?;
        decode_slot(bytes)
    }

    /// Locate the record for `(row, col)`.
    pub fn tile_position(&self, row: u32, col: u32) -> Result<TilePosition> {
        TilePosition::from_raw(self.raw_slot(row, col)?)
    }

    /// Point slot `(row, col)` at `offset`.
    pub fn insert_data(&mut self, row: u32, col: u32, offset: u64) -> Result<()> {
        let bytes = encode_slot(offset)?;
        write_all_at(&self.file, &bytes, slot_position(row, col))?;
        trace!(
            "Slot ({}, {}) of {} -> {offset}",
            row % BLOCK_SIZE,
            col % BLOCK_SIZE,
            self.path.display()
        );
        Ok(())
    }

    /// Flush slot writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// All written slots as `((row, col), offset)`, block-relative.
    ///
    /// Reads the whole slot table in one go.
    pub fn positions(&self) -> Result<Vec<((u32, u32), u64)>> {
        let mut table = vec![0u8; SLOT_TABLE_SIZE];
        read_exact_at(&self.file, &mut table, BUNDLX_HEADER.len() as u64)?;

        let mut found = Vec::new();
        for (n, chunk) in table.chunks_exact(SLOT_WIDTH).enumerate() {
            let mut bytes = [0u8; SLOT_WIDTH];
            bytes.copy_from_slice(chunk);
            if let TilePosition::At(offset) = TilePosition::from_raw(decode_slot(bytes)?)? {
                let n = n as u32;
                found.push(((n % BLOCK_SIZE, n / BLOCK_SIZE), offset));
            }
        }
        Ok(found)
    }
}
