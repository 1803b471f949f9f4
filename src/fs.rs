//! File data path
//!
//! [`Filesystem`] owns the store and implements open/read/write/shrink/remove on top of
//! the metadata table ([`Catalog`]) and the free list ([`FreeList`]). Every operation
//! re-reads the state it needs from the store; nothing is cached between calls.

use crate::allocator::{FreeBlock, FreeList, SpaceAllocator};
use crate::catalog::{Catalog, FileStats, MetadataEntry};
use crate::config::{validate_store_size, FsConfig, OverflowPolicy};
use crate::error::{FsError, Result};
use crate::header::{Header, DATA_OFFSET, METADATA_TABLE_OFFSET};
use crate::io::{BackingStore, FileStore, Store};
use crate::stats::FsStats;
use crate::validation::FileName;
use std::io::ErrorKind;
use tracing::{debug, info, warn};

const COPY_CHUNK: usize = 4096;

/// Handle returned by [`Filesystem::open_file`]
///
/// Handles are plain values: several may refer to the same file and nothing tracks
/// them. A handle whose file was removed through another handle reports `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    slot: usize,
    open: bool,
}

impl FileHandle {
    /// Metadata slot this handle refers to
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// A formatted store and the operations on it
pub struct Filesystem<B: BackingStore> {
    store: Store<B>,
    overflow: OverflowPolicy,
}

impl Filesystem<FileStore> {
    /// Open (or create) the disk image described by `config`
    ///
    /// A missing image, or one whose header does not identify a valid store, is
    /// recreated at `config.store_size` when `format_if_invalid` is set.
    pub fn from_config(config: &FsConfig) -> Result<Self> {
        config.validate()?;
        let path = &config.store_path;

        let fs = if path.exists() {
            let mut store = Store::new(FileStore::open(path)?);
            match Self::check_header(&mut store) {
                Ok(()) => {
                    info!("Opened store {:?} ({} bytes)", path, store.size());
                    Filesystem {
                        store,
                        overflow: OverflowPolicy::default(),
                    }
                }
                Err(e) if config.format_if_invalid && is_uninitialized(&e) => {
                    warn!("Store {:?} is not valid ({}), reinitializing", path, e);
                    drop(store);
                    Self::format(FileStore::create(path, config.store_size)?)?
                }
                Err(e) => return Err(e),
            }
        } else if config.format_if_invalid {
            info!(
                "Store {:?} not found, creating {} bytes",
                path, config.store_size
            );
            Self::format(FileStore::create(path, config.store_size)?)?
        } else {
            return Err(FsError::NotFound(path.display().to_string()));
        };

        Ok(fs.with_overflow_policy(config.write_overflow))
    }
}

impl<B: BackingStore> Filesystem<B> {
    /// Initialize a store: header, zeroed tables, one free block spanning the data region
    pub fn format(backend: B) -> Result<Self> {
        validate_store_size(backend.size())?;
        let mut store = Store::new(backend);

        store.write_header(&Header::new())?;
        store.zero_range(METADATA_TABLE_OFFSET, DATA_OFFSET - METADATA_TABLE_OFFSET)?;
        FreeList::new(&mut store).init()?;
        store.sync()?;

        info!(
            "Formatted store: {} bytes, data region {} bytes",
            store.size(),
            store.size() - DATA_OFFSET
        );

        Ok(Filesystem {
            store,
            overflow: OverflowPolicy::default(),
        })
    }

    /// Attach to an already formatted store
    pub fn open(backend: B) -> Result<Self> {
        let mut store = Store::new(backend);
        Self::check_header(&mut store)?;
        debug!("Attached to store ({} bytes)", store.size());

        Ok(Filesystem {
            store,
            overflow: OverflowPolicy::default(),
        })
    }

    /// Attach to the store, formatting it first if its header does not validate
    pub fn open_or_format(backend: B) -> Result<Self> {
        let mut store = Store::new(backend);
        match Self::check_header(&mut store) {
            Ok(()) => Ok(Filesystem {
                store,
                overflow: OverflowPolicy::default(),
            }),
            Err(e) if is_uninitialized(&e) => {
                warn!("Store is not initialized ({}), formatting", e);
                Self::format(store.into_backend())
            }
            Err(e) => Err(e),
        }
    }

    fn check_header(store: &mut Store<B>) -> Result<()> {
        store.read_header()?;
        validate_store_size(store.size())
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn backend(&self) -> &B {
        self.store.backend()
    }

    pub fn into_backend(self) -> B {
        self.store.into_backend()
    }

    /// Sync all writes to the backing store
    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }

    /// Direct access to the free list, for diagnostics and tests
    pub fn allocator(&mut self) -> FreeList<'_, B> {
        FreeList::new(&mut self.store)
    }

    /// Open `name`, creating an empty file when it does not exist and `create` is set
    pub fn open_file(&mut self, name: &str, create: bool) -> Result<FileHandle> {
        let name = FileName::new(name)?;
        let mut catalog = Catalog::new(&mut self.store);

        let slot = match catalog.find_by_name(&name) {
            Ok(slot) => slot,
            Err(FsError::NotFound(_)) if create => catalog.create(&name)?,
            Err(e) => return Err(e),
        };

        debug!("Opened '{}' (slot {})", name, slot);
        Ok(FileHandle { slot, open: true })
    }

    /// Mark the handle closed. Closing twice is harmless.
    pub fn close_file(&mut self, handle: &mut FileHandle) {
        handle.open = false;
    }

    /// Metadata entry behind an open handle
    fn entry_for(&mut self, handle: &FileHandle) -> Result<MetadataEntry> {
        if !handle.open {
            return Err(FsError::NotOpen);
        }

        let entry = Catalog::new(&mut self.store).get(handle.slot)?;
        if entry.is_unused() {
            return Err(FsError::NotFound(format!("slot {}", handle.slot)));
        }
        Ok(entry)
    }

    /// Read up to `len` bytes at `pos`
    ///
    /// Reading at or past the end yields an empty buffer; a read that runs past the end
    /// is clamped to the file size.
    pub fn read(&mut self, handle: &FileHandle, pos: u32, len: u32) -> Result<Vec<u8>> {
        let entry = self.entry_for(handle)?;
        if pos >= entry.size {
            return Ok(Vec::new());
        }

        let len = len.min(entry.size - pos);
        let extent = entry.extent_start.ok_or_else(|| {
            FsError::Corrupted(format!(
                "slot {} has {} bytes but no extent",
                handle.slot, entry.size
            ))
        })?;

        let mut buffer = vec![0u8; len as usize];
        self.store.read_data(extent as u64 + pos as u64, &mut buffer)?;

        debug!("Read {} bytes at {} from slot {}", len, pos, handle.slot);
        Ok(buffer)
    }

    /// Write `data` at `pos`, growing the logical size as needed
    ///
    /// Returns the number of bytes written. An empty write changes nothing.
    pub fn write(&mut self, handle: &FileHandle, pos: u32, data: &[u8]) -> Result<usize> {
        let mut entry = self.entry_for(handle)?;
        if data.is_empty() {
            return Ok(0);
        }

        let len = u32::try_from(data.len()).map_err(|_| FsError::InvalidSize {
            requested: u32::MAX,
            current: entry.size,
        })?;
        let end = pos.checked_add(len).ok_or(FsError::InvalidSize {
            requested: u32::MAX,
            current: entry.size,
        })?;

        match self.overflow {
            OverflowPolicy::Relocate => {
                if entry.extent_start.is_none() || end > entry.size {
                    self.relocate(handle.slot, &mut entry, end)?;
                }
            }
            OverflowPolicy::Legacy => {
                // Capacity is fixed by the first write; later growth is logical only
                if entry.extent_start.is_none() {
                    entry.extent_start = Some(FreeList::new(&mut self.store).allocate(len)?);
                }
                entry.size = entry.size.max(end);
                Catalog::new(&mut self.store).update(handle.slot, &entry)?;
            }
        }

        let extent = entry.extent_start.ok_or_else(|| {
            FsError::Corrupted(format!("slot {} has no extent after write", handle.slot))
        })?;
        self.store.write_data(extent as u64 + pos as u64, data)?;

        debug!("Wrote {} bytes at {} to slot {}", len, pos, handle.slot);
        Ok(data.len())
    }

    /// Move the file into a fresh extent of `new_size` bytes
    ///
    /// Old content is copied, the remainder of the new extent is zeroed, the metadata is
    /// persisted, and only then is the old extent released. If any step before the
    /// metadata write fails, the new extent goes back to the free list and the file is
    /// left as it was.
    fn relocate(&mut self, slot: usize, entry: &mut MetadataEntry, new_size: u32) -> Result<()> {
        let old_extent = entry.extent_start;
        let old_size = entry.size;

        let new_extent = FreeList::new(&mut self.store).allocate(new_size)?;

        let mut moved = *entry;
        moved.extent_start = Some(new_extent);
        moved.size = new_size;

        let filled = self
            .fill_extent(old_extent, old_size, new_extent, new_size)
            .and_then(|()| Catalog::new(&mut self.store).update(slot, &moved));
        if let Err(e) = filled {
            if let Err(undo) = FreeList::new(&mut self.store).free(new_extent, new_size) {
                warn!(
                    "Could not release extent {} (+{}) after failed relocation: {}",
                    new_extent, new_size, undo
                );
            }
            return Err(e);
        }
        *entry = moved;

        if let Some(old) = old_extent {
            match FreeList::new(&mut self.store).free(old, old_size) {
                // The file already lives in its new extent; the old bytes stay leaked
                Ok(()) | Err(FsError::FreeListFull { .. }) => {}
                Err(e) => return Err(e),
            }
            debug!(
                "Relocated slot {} from {} (+{}) to {} (+{})",
                slot, old, old_size, new_extent, new_size
            );
        }
        Ok(())
    }

    /// Copy `old_size` bytes into the new extent and zero the rest of it
    fn fill_extent(
        &mut self,
        old_extent: Option<u32>,
        old_size: u32,
        new_extent: u32,
        new_size: u32,
    ) -> Result<()> {
        let mut copied = 0u32;
        if let Some(old) = old_extent {
            let mut buffer = [0u8; COPY_CHUNK];
            while copied < old_size {
                let chunk = (old_size - copied).min(COPY_CHUNK as u32) as usize;
                self.store
                    .read_data(old as u64 + copied as u64, &mut buffer[..chunk])?;
                self.store
                    .write_data(new_extent as u64 + copied as u64, &buffer[..chunk])?;
                copied += chunk as u32;
            }
        }
        self.store.zero_range(
            new_extent as u64 + copied as u64,
            (new_size - copied) as u64,
        )
    }

    /// Truncate to `new_size`, returning the tail of the extent to the free list
    ///
    /// Only shrinks: growth happens through [`write`](Self::write). Shrinking to zero
    /// releases the extent entirely.
    pub fn shrink(&mut self, handle: &FileHandle, new_size: u32) -> Result<()> {
        let mut entry = self.entry_for(handle)?;
        if new_size > entry.size {
            return Err(FsError::InvalidSize {
                requested: new_size,
                current: entry.size,
            });
        }
        if new_size == entry.size {
            return Ok(());
        }

        if let Some(extent) = entry.extent_start {
            FreeList::new(&mut self.store).free(extent + new_size, entry.size - new_size)?;
        }

        debug!(
            "Shrunk slot {} from {} to {} bytes",
            handle.slot, entry.size, new_size
        );
        entry.size = new_size;
        if new_size == 0 {
            entry.extent_start = None;
        }
        Catalog::new(&mut self.store).update(handle.slot, &entry)
    }

    /// Delete the file: release its extent, clear its slot, close the handle
    ///
    /// If the extent cannot be released the file is left in place and the error returned.
    pub fn remove(&mut self, handle: &mut FileHandle) -> Result<()> {
        let entry = self.entry_for(handle)?;

        if let Some(extent) = entry.extent_start {
            FreeList::new(&mut self.store).free(extent, entry.size)?;
        }
        Catalog::new(&mut self.store).remove(handle.slot)?;
        handle.open = false;

        debug!("Removed '{}' (slot {})", entry.name_lossy(), handle.slot);
        Ok(())
    }

    /// Header snapshot
    pub fn header(&mut self) -> Result<Header> {
        self.store.read_header()
    }

    /// Raw metadata slot snapshot
    pub fn metadata(&mut self, slot: usize) -> Result<MetadataEntry> {
        Catalog::new(&mut self.store).get(slot)
    }

    pub fn file_stats(&mut self, handle: &FileHandle) -> Result<FileStats> {
        let entry = self.entry_for(handle)?;
        Ok(FileStats::from_entry(handle.slot, &entry))
    }

    /// Live files in slot order
    pub fn list_files(&mut self) -> Result<Vec<FileStats>> {
        Catalog::new(&mut self.store).list()
    }

    /// Free list in list order
    pub fn free_blocks(&mut self) -> Result<Vec<FreeBlock>> {
        FreeList::new(&mut self.store).blocks()
    }

    pub fn stats(&mut self) -> Result<FsStats> {
        let header = self.store.read_header()?;
        let store_size = self.store.size();
        let mut list = FreeList::new(&mut self.store);
        let blocks = list.blocks()?;
        let fragmentation = list.fragmentation_score()?;

        Ok(FsStats::new(header.file_count, store_size, &blocks, fragmentation))
    }
}

/// Header checks that mean "not a store yet" rather than a hard failure
fn is_uninitialized(error: &FsError) -> bool {
    match error {
        FsError::InvalidMagic(_) | FsError::UnsupportedVersion(_) => true,
        FsError::InvalidStoreSize { .. } => true,
        FsError::StoreIo(e) => e.kind() == ErrorKind::UnexpectedEof,
        _ => false,
    }
}
