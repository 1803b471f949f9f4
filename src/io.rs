//! Positional I/O over the backing store
//!
//! [`BackingStore`] is the raw byte-range seam (a disk image file, or memory in tests).
//! [`Store`] layers the fixed layout on top of it: typed access to the header, the
//! metadata slots, the free-block slots and the data region.

use crate::allocator::FreeBlock;
use crate::catalog::MetadataEntry;
use crate::error::{FsError, Result};
use crate::header::{
    free_block_offset, metadata_offset, Header, FREE_BLOCK_SIZE, HEADER_SIZE, MAX_FILES,
    MAX_FREE_BLOCKS, METADATA_SIZE,
};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const ZERO_CHUNK: usize = 4096;

/// Fixed-size, byte-addressable storage
///
/// Reads and writes never grow the store: a range that runs past [`size`](Self::size)
/// fails with an I/O error, as does a short read or write.
pub trait BackingStore {
    /// Fill `buf` from the bytes starting at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `data` starting at `offset`
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Total size of the store in bytes
    fn size(&self) -> u64;

    /// Flush written bytes to durable storage
    fn sync(&mut self) -> Result<()>;
}

fn check_bounds(offset: u64, len: usize, size: u64, kind: ErrorKind) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(FsError::StoreIo(std::io::Error::new(
            kind,
            format!(
                "range [{}, +{}) exceeds store size {}",
                offset, len, size
            ),
        ))),
    }
}

/// Disk-image backed store
pub struct FileStore {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileStore {
    /// Create (or truncate) an image of exactly `size` bytes, zero-filled
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;

        Ok(FileStore {
            file,
            path: path.as_ref().to_path_buf(),
            size,
        })
    }

    /// Open an existing image read-write
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(FileStore {
            file,
            path: path.as_ref().to_path_buf(),
            size,
        })
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size, ErrorKind::UnexpectedEof)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.size, ErrorKind::WriteZero)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    bytes: Vec<u8>,
}

impl MemStore {
    /// Zero-filled store of `size` bytes
    pub fn new(size: usize) -> Self {
        MemStore {
            bytes: vec![0u8; size],
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        MemStore { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl BackingStore for MemStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size(), ErrorKind::UnexpectedEof)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.size(), ErrorKind::WriteZero)?;
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Typed region access over a backing store
///
/// Nothing is cached: every call goes to the backend.
pub struct Store<B: BackingStore> {
    backend: B,
}

impl<B: BackingStore> Store<B> {
    pub fn new(backend: B) -> Self {
        Store { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn size(&self) -> u64 {
        self.backend.size()
    }

    /// Read and validate the header
    pub fn read_header(&mut self) -> Result<Header> {
        let mut buffer = [0u8; HEADER_SIZE];
        self.backend.read_at(0, &mut buffer)?;
        Header::from_bytes(&buffer)
    }

    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.backend.write_at(0, &header.to_bytes())
    }

    pub fn read_metadata(&mut self, slot: usize) -> Result<MetadataEntry> {
        check_slot("metadata", slot, MAX_FILES)?;
        let mut buffer = [0u8; METADATA_SIZE];
        self.backend.read_at(metadata_offset(slot), &mut buffer)?;
        MetadataEntry::from_bytes(&buffer)
    }

    pub fn write_metadata(&mut self, slot: usize, entry: &MetadataEntry) -> Result<()> {
        check_slot("metadata", slot, MAX_FILES)?;
        self.backend
            .write_at(metadata_offset(slot), &entry.to_bytes())
    }

    pub fn read_free_block(&mut self, slot: usize) -> Result<FreeBlock> {
        check_slot("free-block", slot, MAX_FREE_BLOCKS)?;
        let mut buffer = [0u8; FREE_BLOCK_SIZE];
        self.backend.read_at(free_block_offset(slot), &mut buffer)?;
        FreeBlock::from_bytes(&buffer)
    }

    pub fn write_free_block(&mut self, slot: usize, block: &FreeBlock) -> Result<()> {
        check_slot("free-block", slot, MAX_FREE_BLOCKS)?;
        self.backend
            .write_at(free_block_offset(slot), &block.to_bytes())
    }

    pub fn read_data(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.backend.read_at(offset, buf)
    }

    pub fn write_data(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.backend.write_at(offset, data)
    }

    /// Zero `len` bytes starting at `offset`, in 4KB chunks
    pub fn zero_range(&mut self, offset: u64, len: u64) -> Result<()> {
        let zeros = [0u8; ZERO_CHUNK];
        let mut written = 0u64;
        while written < len {
            let chunk = (len - written).min(ZERO_CHUNK as u64) as usize;
            self.backend.write_at(offset + written, &zeros[..chunk])?;
            written += chunk as u64;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.backend.sync()
    }
}

fn check_slot(table: &str, slot: usize, slots: usize) -> Result<()> {
    if slot >= slots {
        return Err(FsError::Corrupted(format!(
            "{} slot {} out of range (table has {} slots)",
            table, slot, slots
        )));
    }
    Ok(())
}
