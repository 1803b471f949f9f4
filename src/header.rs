//! Store header and the fixed on-disk layout
//!
//! Every field on disk is a packed, native-endian `i32`. The regions follow each other
//! with no padding:
//!
//! ```text
//! offset 0        Header            20 bytes
//! offset 20       Metadata table    1024 x 84 bytes
//! offset 86036    Free-block table  1024 x 12 bytes
//! offset 98324    Data region       remainder of the store
//! ```

use crate::error::{FsError, Result};
use serde::Serialize;

pub const MAGIC: u32 = 0xDEAD_BEEF;
pub const VERSION: i32 = 1;

/// Number of metadata slots
pub const MAX_FILES: usize = 1024;

/// Number of free-block slots
pub const MAX_FREE_BLOCKS: usize = 1024;

pub const HEADER_SIZE: usize = 20;
pub const METADATA_SIZE: usize = 84;
pub const FREE_BLOCK_SIZE: usize = 12;

pub const METADATA_TABLE_OFFSET: u64 = HEADER_SIZE as u64;
pub const FREE_TABLE_OFFSET: u64 = METADATA_TABLE_OFFSET + (MAX_FILES * METADATA_SIZE) as u64;

/// First byte of the data region
pub const DATA_OFFSET: u64 = FREE_TABLE_OFFSET + (MAX_FREE_BLOCKS * FREE_BLOCK_SIZE) as u64;

/// Offsets are stored as `i32`, which caps the addressable store.
pub const MAX_STORE_SIZE: u64 = i32::MAX as u64;

/// End-of-list / empty-list marker for free-block indices
pub(crate) const NO_INDEX: i32 = -1;

/// Byte offset of a metadata slot
pub fn metadata_offset(slot: usize) -> u64 {
    METADATA_TABLE_OFFSET + (slot * METADATA_SIZE) as u64
}

/// Byte offset of a free-block slot
pub fn free_block_offset(slot: usize) -> u64 {
    FREE_TABLE_OFFSET + (slot * FREE_BLOCK_SIZE) as u64
}

pub(crate) fn get_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_ne_bytes(raw)
}

pub(crate) fn put_i32(bytes: &mut [u8], offset: usize, value: i32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Decode a field that must not be negative
pub(crate) fn non_negative(field: &str, raw: i32) -> Result<u32> {
    u32::try_from(raw).map_err(|_| FsError::Corrupted(format!("{} is negative ({})", field, raw)))
}

/// Decode a free-block index, mapping the -1 sentinel to `None`
pub(crate) fn decode_index(field: &str, raw: i32) -> Result<Option<usize>> {
    match raw {
        NO_INDEX => Ok(None),
        i if i >= 0 && (i as usize) < MAX_FREE_BLOCKS => Ok(Some(i as usize)),
        i => Err(FsError::Corrupted(format!(
            "{} out of range: {} (table has {} slots)",
            field, i, MAX_FREE_BLOCKS
        ))),
    }
}

pub(crate) fn encode_index(index: Option<usize>) -> i32 {
    index.map_or(NO_INDEX, |i| i as i32)
}

/// Store header (offset 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Magic number: 0xDEADBEEF
    pub magic: u32,

    /// Format version
    pub version: i32,

    /// Number of live files
    pub file_count: u32,

    /// Bump-allocation cursor from the pre-free-list format.
    /// Only read once, to seed the free list at format time.
    pub legacy_cursor: u32,

    /// Slot index of the first free block (`None` = empty list)
    pub free_list_head: Option<usize>,
}

impl Header {
    /// Header for a freshly formatted store
    pub fn new() -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            file_count: 0,
            legacy_cursor: DATA_OFFSET as u32,
            free_list_head: None,
        }
    }

    /// Validate the header magic and version
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(FsError::InvalidMagic(self.magic));
        }

        if self.version != VERSION {
            return Err(FsError::UnsupportedVersion(self.version));
        }

        Ok(())
    }

    /// Serialize header to its packed on-disk form
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_ne_bytes());
        put_i32(&mut bytes, 4, self.version);
        put_i32(&mut bytes, 8, self.file_count as i32);
        put_i32(&mut bytes, 12, self.legacy_cursor as i32);
        put_i32(&mut bytes, 16, encode_index(self.free_list_head));
        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FsError::StoreIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);

        let header = Header {
            magic: u32::from_ne_bytes(magic),
            version: get_i32(bytes, 4),
            file_count: 0,
            legacy_cursor: 0,
            free_list_head: None,
        };
        // Identify the store before trusting any other field
        header.validate()?;

        Ok(Header {
            file_count: non_negative("file count", get_i32(bytes, 8))?,
            legacy_cursor: non_negative("legacy cursor", get_i32(bytes, 12))?,
            free_list_head: decode_index("free-list head", get_i32(bytes, 16))?,
            ..header
        })
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
