//! 60-byte bundle header.
//!
//! Layout (all integers little-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 8    | Magic `03 00 00 00 00 40 00 00` |
//! | 0x08   | 4    | Largest tile written so far |
//! | 0x0C   | 4    | Magic `5` |
//! | 0x10   | 4    | Non-null tile counter (steps of 4) |
//! | 0x14   | 4    | Reserved |
//! | 0x18   | 4    | Total file size |
//! | 0x1C   | 4    | Reserved |
//! | 0x20   | 12   | Magic `0x28`, `0`, `0x10` |
//! | 0x2C   | 4    | First row of the block |
//! | 0x30   | 4    | Last row of the block |
//! | 0x34   | 4    | First column of the block |
//! | 0x38   | 4    | Last column of the block |

use super::{BUNDLE_HEADER_SIZE, PSEUDO_INDEX_END};
use crate::{BLOCK_SIZE, Result, StorageError};
use binrw::{BinRead, BinWrite, binrw};
use std::io::Cursor;

/// Offset of the max tile size field.
pub const MAX_TILE_SIZE_OFFSET: u64 = 0x08;

/// Offset of the non-null tile counter.
pub const NON_NULL_COUNT_OFFSET: u64 = 0x10;

/// Offset of the file size field.
pub const FILE_SIZE_OFFSET: u64 = 0x18;

/// Ceiling of the non-null tile counter.
pub const MAX_NON_NULL_COUNT: u32 = u32::MAX & !3;

/// Parsed bundle header. Magic fields are checked on read and written back
/// verbatim, so only the variable fields are kept.
#[binrw]
#[brw(little, magic = b"\x03\x00\x00\x00\x00\x40\x00\x00")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleHeader {
    /// Size in bytes of the largest tile ever inserted.
    pub max_tile_size: u32,

    #[br(temp, assert(record_width == 5, "unexpected record width {}", record_width))]
    #[bw(calc = 5)]
    record_width: u32,

    /// Non-null tile counter, rounded up to the next multiple of 4 on
    /// every insert. Kept as-is for compatibility with existing caches.
    pub non_null_count: u32,

    #[br(temp)]
    #[bw(calc = 0)]
    reserved_a: u32,

    /// Total file size in bytes.
    pub file_size: u32,

    #[br(temp)]
    #[bw(calc = 0)]
    reserved_b: u32,

    #[br(temp, assert(marker_a == 0x28, "unexpected marker {:#x}", marker_a))]
    #[bw(calc = 0x28)]
    marker_a: u32,

    #[br(temp, assert(marker_b == 0, "unexpected marker {:#x}", marker_b))]
    #[bw(calc = 0)]
    marker_b: u32,

    #[br(temp, assert(marker_c == 0x10, "unexpected marker {:#x}", marker_c))]
    #[bw(calc = 0x10)]
    marker_c: u32,

    /// First row covered by the bundle.
    pub row_start: u32,
    /// Last row covered by the bundle.
    pub row_end: u32,
    /// First column covered by the bundle.
    pub col_start: u32,
    /// Last column covered by the bundle.
    pub col_end: u32,
}

impl BundleHeader {
    /// Header of an empty bundle for the block starting at `(row_base, col_base)`.
    pub const fn new(row_base: u32, col_base: u32) -> Self {
        Self {
            max_tile_size: 0,
            non_null_count: 0,
            file_size: PSEUDO_INDEX_END as u32,
            row_start: row_base,
            row_end: row_base.saturating_add(BLOCK_SIZE - 1),
            col_start: col_base,
            col_end: col_base.saturating_add(BLOCK_SIZE - 1),
        }
    }

    /// Serialize the header to its 60 on-disk bytes.
    pub fn to_bytes(&self) -> Result<[u8; BUNDLE_HEADER_SIZE]> {
        let mut cursor = Cursor::new([0u8; BUNDLE_HEADER_SIZE]);
        self.write(&mut cursor)
            .map_err(|e| StorageError::CorruptBundle(format!("failed to encode header: {e}")))?;
        Ok(cursor.into_inner())
    }

    /// Parse a header. Short input or wrong magic is corruption.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < BUNDLE_HEADER_SIZE {
            return Err(StorageError::CorruptBundle(format!(
                "bundle header truncated: {} bytes",
                data.len()
            )));
        }
        Self::read(&mut Cursor::new(&data[..BUNDLE_HEADER_SIZE]))
            .map_err(|e| StorageError::CorruptBundle(format!("bad bundle header: {e}")))
    }

    /// Counter value after one more insert.
    ///
    /// Stops at the largest multiple of 4 that fits in a `u32`.
    pub const fn next_non_null_count(count: u32) -> u32 {
        let next = (count / 4).saturating_add(1).saturating_mul(4);
        if next > MAX_NON_NULL_COUNT {
            MAX_NON_NULL_COUNT
        } else {
            next
        }
    }
}
