//! Metadata table entries

use crate::error::Result;
use crate::header::{get_i32, non_negative, put_i32, METADATA_SIZE};
use crate::validation::FileName;
use serde::Serialize;

/// Size of the NUL-terminated name buffer
pub const NAME_LEN: usize = 64;

/// Type tag written for every file created through the API
pub const TYPE_REGULAR: i32 = 1;

/// Chain field value for entries without a continuation extent
pub const NO_CHAIN: i32 = -1;

/// One slot of the metadata table
///
/// A slot whose name starts with a NUL byte is unused. The type and permission tags
/// are carried through unchanged and never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataEntry {
    /// NUL-terminated file name
    pub name: [u8; NAME_LEN],

    pub type_tag: i32,

    pub permission: i32,

    /// Logical file size in bytes
    pub size: u32,

    /// Absolute offset of the file's extent; `None` until the first write.
    /// Stored on disk as 0, which can never be a real extent (offset 0 is the header).
    pub extent_start: Option<u32>,

    /// Reserved for multi-extent chaining, unused
    pub chain: i32,
}

impl MetadataEntry {
    /// An unused (all-zero) slot
    pub const EMPTY: MetadataEntry = MetadataEntry {
        name: [0; NAME_LEN],
        type_tag: 0,
        permission: 0,
        size: 0,
        extent_start: None,
        chain: 0,
    };

    /// Fresh entry for a newly created file
    pub fn new(name: &FileName) -> Self {
        let mut buffer = [0u8; NAME_LEN];
        buffer[..name.as_bytes().len()].copy_from_slice(name.as_bytes());

        MetadataEntry {
            name: buffer,
            type_tag: TYPE_REGULAR,
            permission: 0,
            size: 0,
            extent_start: None,
            chain: NO_CHAIN,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.name[0] == 0
    }

    /// Name bytes up to the first NUL
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..end]
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn has_name(&self, name: &FileName) -> bool {
        !self.is_unused() && self.name_bytes() == name.as_bytes()
    }

    pub fn to_bytes(&self) -> [u8; METADATA_SIZE] {
        let mut bytes = [0u8; METADATA_SIZE];
        bytes[..NAME_LEN].copy_from_slice(&self.name);
        put_i32(&mut bytes, NAME_LEN, self.type_tag);
        put_i32(&mut bytes, NAME_LEN + 4, self.permission);
        put_i32(&mut bytes, NAME_LEN + 8, self.size as i32);
        put_i32(&mut bytes, NAME_LEN + 12, self.extent_start.unwrap_or(0) as i32);
        put_i32(&mut bytes, NAME_LEN + 16, self.chain);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&bytes[..NAME_LEN]);

        let extent_start = match non_negative("extent start", get_i32(bytes, NAME_LEN + 12))? {
            0 => None,
            offset => Some(offset),
        };

        Ok(MetadataEntry {
            name,
            type_tag: get_i32(bytes, NAME_LEN),
            permission: get_i32(bytes, NAME_LEN + 4),
            size: non_negative("file size", get_i32(bytes, NAME_LEN + 8))?,
            extent_start,
            chain: get_i32(bytes, NAME_LEN + 16),
        })
    }
}

impl Default for MetadataEntry {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Read-only view of a live file, for listings and stats
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
    /// Metadata slot index
    pub slot: usize,
    pub name: String,
    pub size: u32,
    pub extent_start: Option<u32>,
}

impl FileStats {
    pub fn from_entry(slot: usize, entry: &MetadataEntry) -> Self {
        FileStats {
            slot,
            name: entry.name_lossy(),
            size: entry.size,
            extent_start: entry.extent_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;

    #[test]
    fn test_new_entry() {
        let name = FileName::new("report.txt").unwrap();
        let entry = MetadataEntry::new(&name);

        assert!(!entry.is_unused());
        assert!(entry.has_name(&name));
        assert_eq!(entry.name_lossy(), "report.txt");
        assert_eq!(entry.type_tag, TYPE_REGULAR);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.extent_start, None);
        assert_eq!(entry.chain, NO_CHAIN);
    }

    #[test]
    fn test_empty_entry_is_all_zero() {
        assert!(MetadataEntry::EMPTY.is_unused());
        assert!(MetadataEntry::EMPTY.to_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_prefix_is_not_a_match() {
        let entry = MetadataEntry::new(&FileName::new("abc").unwrap());
        assert!(!entry.has_name(&FileName::new("ab").unwrap()));
        assert!(!entry.has_name(&FileName::new("abcd").unwrap()));
    }

    #[test]
    fn test_byte_layout() {
        let mut entry = MetadataEntry::new(&FileName::new("a").unwrap());
        entry.size = 5;
        entry.extent_start = Some(98_324);

        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), METADATA_SIZE);
        assert_eq!(bytes[0], b'a');
        assert_eq!(bytes[1], 0);
        assert_eq!(get_i32(&bytes, 64), TYPE_REGULAR);
        assert_eq!(get_i32(&bytes, 72), 5);
        assert_eq!(get_i32(&bytes, 76), 98_324);
        assert_eq!(get_i32(&bytes, 80), -1);

        assert_eq!(MetadataEntry::from_bytes(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_zero_offset_decodes_as_unallocated() {
        let entry = MetadataEntry::new(&FileName::new("a").unwrap());
        let decoded = MetadataEntry::from_bytes(&entry.to_bytes()).unwrap();
        assert_eq!(decoded.extent_start, None);
    }

    #[test]
    fn test_negative_size_is_corruption() {
        let mut bytes = MetadataEntry::new(&FileName::new("a").unwrap()).to_bytes();
        put_i32(&mut bytes, 72, -4);
        assert!(matches!(
            MetadataEntry::from_bytes(&bytes),
            Err(FsError::Corrupted(_))
        ));
    }
}
