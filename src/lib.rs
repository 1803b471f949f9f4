//! # flatfs - Flat Single-Image Filesystem
//!
//! `flatfs` stores a flat namespace of files inside one fixed-size disk image:
//!
//! - **Fixed layout**: a header, a 1024-slot metadata table and a 1024-slot free-block
//!   table, followed by the data region
//! - **Contiguous extents**: every file lives in one byte range of the data region
//! - **Free-list allocator**: first-fit allocation over a sorted, coalescing list threaded
//!   through the free-block table
//! - **Stateless operations**: every call re-reads what it needs from the image
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flatfs::{FsBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! // Opens filesys.db, creating a 1 MiB image if needed
//! let mut fs = FsBuilder::new().path("filesys.db").build()?;
//!
//! let handle = fs.open_file("notes.txt", true)?;
//! fs.write(&handle, 0, b"Hello, World!")?;
//!
//! let content = fs.read(&handle, 0, 5)?;
//! assert_eq!(content, b"Hello");
//!
//! println!("{}", fs.stats()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## In-memory stores
//!
//! ```rust
//! use flatfs::{Filesystem, MemStore, DATA_OFFSET};
//!
//! # fn main() -> flatfs::Result<()> {
//! let mut fs = Filesystem::format(MemStore::new(DATA_OFFSET as usize + 4096))?;
//! let mut handle = fs.open_file("scratch", true)?;
//! fs.write(&handle, 0, b"temporary")?;
//! fs.remove(&mut handle)?;
//! assert_eq!(fs.stats()?.free_bytes, 4096);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fs;
pub mod header;
pub mod io;
pub mod shell;
pub mod stats;
pub mod sync;
pub mod validation;

pub use allocator::{FreeBlock, FreeList, SpaceAllocator};
pub use catalog::{FileStats, MetadataEntry};
pub use config::{FsConfig, OverflowPolicy};
pub use error::{FsError, Result};
pub use fs::{FileHandle, Filesystem};
pub use header::{Header, DATA_OFFSET, MAX_FILES, MAX_FREE_BLOCKS};
pub use io::{BackingStore, FileStore, MemStore};
pub use stats::FsStats;
pub use sync::SharedFilesystem;
pub use validation::FileName;

use std::path::PathBuf;
use tracing::info;

/// Builder for opening a disk image with custom configuration
///
/// # Examples
///
/// ```rust,no_run
/// use flatfs::{FsBuilder, OverflowPolicy};
///
/// # fn main() -> flatfs::Result<()> {
/// let fs = FsBuilder::new()
///     .path("/data/disk.img")
///     .size(16 * 1024 * 1024)
///     .overflow_policy(OverflowPolicy::Legacy)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct FsBuilder {
    config: FsConfig,
}

impl FsBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        FsBuilder {
            config: FsConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: FsConfig) -> Self {
        FsBuilder { config }
    }

    /// Path of the disk image
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.store_path = path.into();
        self
    }

    /// Size used when the image has to be created
    pub fn size(mut self, size: u64) -> Self {
        self.config.store_size = size;
        self
    }

    /// Fail instead of recreating a missing or invalid image
    pub fn require_existing(mut self) -> Self {
        self.config.format_if_invalid = false;
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.write_overflow = policy;
        self
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Open (or create) the image
    pub fn build(self) -> Result<Filesystem<FileStore>> {
        info!(
            "Opening store {:?} (overflow policy {:?})",
            self.config.store_path, self.config.write_overflow
        );
        Filesystem::from_config(&self.config)
    }
}

impl Default for FsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
