//! Store-wide statistics

use crate::allocator::FreeBlock;
use crate::header::DATA_OFFSET;
use serde::Serialize;
use std::fmt;

/// Snapshot of space usage
///
/// `used_bytes` counts everything that is not on the free list, including the header and
/// both fixed tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FsStats {
    pub file_count: u32,
    pub store_size: u64,
    pub data_region_size: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub free_block_count: usize,
    pub largest_free_block: u32,
    /// 0.0 when all free space is one block
    pub fragmentation: f64,
}

impl FsStats {
    pub fn new(file_count: u32, store_size: u64, blocks: &[FreeBlock], fragmentation: f64) -> Self {
        let free_bytes: u64 = blocks.iter().map(|b| b.size as u64).sum();

        FsStats {
            file_count,
            store_size,
            data_region_size: store_size.saturating_sub(DATA_OFFSET),
            free_bytes,
            used_bytes: store_size.saturating_sub(free_bytes),
            free_block_count: blocks.len(),
            largest_free_block: blocks.iter().map(|b| b.size).max().unwrap_or(0),
            fragmentation,
        }
    }
}

impl fmt::Display for FsStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files:              {}", self.file_count)?;
        writeln!(f, "Store size:         {} bytes", self.store_size)?;
        writeln!(f, "Data region:        {} bytes", self.data_region_size)?;
        writeln!(f, "Used:               {} bytes", self.used_bytes)?;
        writeln!(f, "Free:               {} bytes", self.free_bytes)?;
        writeln!(
            f,
            "Free blocks:        {} (largest {} bytes)",
            self.free_block_count, self.largest_free_block
        )?;
        write!(f, "Fragmentation:      {:.3}", self.fragmentation)
    }
}
