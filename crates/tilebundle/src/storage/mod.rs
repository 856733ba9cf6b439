//! Bundle data file (.bundle) management.
//!
//! A bundle starts with a 60-byte header, followed by a 64 KiB zero-filled
//! pseudo-index, followed by tile records appended in write order:
//!
//! ```text
//! [0x00000] BundleHeader (60 bytes)
//! [0x0003C] pseudo-index, 128*128*4 zero bytes
//! [0x1003C] [u32 size][size bytes] ...
//! ```
//!
//! Unwritten index slots point into the pseudo-index, where every read
//! yields a zero size prefix.

pub mod bundle_file;
pub mod bundle_header;

pub use bundle_file::BundleStore;
pub use bundle_header::BundleHeader;

use crate::SLOTS_PER_BLOCK;

/// Size of the fixed bundle header in bytes.
pub const BUNDLE_HEADER_SIZE: usize = 60;

/// Size of the zero-filled pseudo-index in bytes.
pub const PSEUDO_INDEX_SIZE: usize = SLOTS_PER_BLOCK * 4;

/// Offset of the first tile record; also the size of an empty bundle.
pub const PSEUDO_INDEX_END: u64 = (BUNDLE_HEADER_SIZE + PSEUDO_INDEX_SIZE) as u64;

/// Size of the length prefix in front of every tile record.
pub const RECORD_PREFIX_SIZE: u64 = 4;
