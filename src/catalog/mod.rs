//! Metadata table manager
//!
//! The table is a fixed array of [`MAX_FILES`] slots right after the header. Lookups are
//! linear scans; removed slots are zeroed and become reusable immediately (no compaction).

pub mod metadata;

pub use metadata::{FileStats, MetadataEntry};

use crate::error::{FsError, Result};
use crate::header::MAX_FILES;
use crate::io::{BackingStore, Store};
use crate::validation::FileName;
use tracing::debug;

/// Metadata table operations over a borrowed store
pub struct Catalog<'a, B: BackingStore> {
    store: &'a mut Store<B>,
}

impl<'a, B: BackingStore> Catalog<'a, B> {
    pub fn new(store: &'a mut Store<B>) -> Self {
        Catalog { store }
    }

    /// Slot of the first used entry named `name`
    pub fn find_by_name(&mut self, name: &FileName) -> Result<usize> {
        for slot in 0..MAX_FILES {
            if self.store.read_metadata(slot)?.has_name(name) {
                return Ok(slot);
            }
        }
        Err(FsError::NotFound(name.to_string()))
    }

    /// First slot with an empty name
    pub fn find_free_slot(&mut self) -> Result<usize> {
        for slot in 0..MAX_FILES {
            if self.store.read_metadata(slot)?.is_unused() {
                return Ok(slot);
            }
        }
        Err(FsError::TableFull)
    }

    /// Claim a free slot for `name` and bump the header's file count
    ///
    /// Does not check for an existing entry with the same name; callers look up first.
    pub fn create(&mut self, name: &FileName) -> Result<usize> {
        let slot = self.find_free_slot()?;
        self.store.write_metadata(slot, &MetadataEntry::new(name))?;

        let mut header = self.store.read_header()?;
        header.file_count += 1;
        self.store.write_header(&header)?;

        debug!("Created '{}' in metadata slot {}", name, slot);
        Ok(slot)
    }

    pub fn get(&mut self, slot: usize) -> Result<MetadataEntry> {
        self.store.read_metadata(slot)
    }

    pub fn update(&mut self, slot: usize, entry: &MetadataEntry) -> Result<()> {
        self.store.write_metadata(slot, entry)
    }

    /// Zero a slot and decrement the header's file count
    ///
    /// Releasing the file's extent is the caller's job.
    pub fn remove(&mut self, slot: usize) -> Result<()> {
        self.store.write_metadata(slot, &MetadataEntry::EMPTY)?;

        let mut header = self.store.read_header()?;
        header.file_count = header.file_count.saturating_sub(1);
        self.store.write_header(&header)?;

        debug!("Cleared metadata slot {}", slot);
        Ok(())
    }

    /// All used slots, in slot order
    pub fn list(&mut self) -> Result<Vec<FileStats>> {
        let mut files = Vec::new();
        for slot in 0..MAX_FILES {
            let entry = self.store.read_metadata(slot)?;
            if !entry.is_unused() {
                files.push(FileStats::from_entry(slot, &entry));
            }
        }
        Ok(files)
    }
}
