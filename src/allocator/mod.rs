//! Space allocation for the data region
//!
//! Free space is tracked as a singly linked list of [`FreeBlock`]s threaded through the
//! fixed free-block table, kept sorted by start offset and coalesced after every free.
//! Allocation is first-fit.

pub mod free_list;

pub use free_list::{FreeBlock, FreeList};

use crate::error::Result;

/// Space allocator trait
///
/// Hands out byte extents of the data region by absolute store offset.
pub trait SpaceAllocator {
    /// Allocate `size` contiguous bytes and return the extent's start offset
    fn allocate(&mut self, size: u32) -> Result<u32>;

    /// Return `[start, start + size)` to the free pool
    fn free(&mut self, start: u32, size: u32) -> Result<()>;

    /// Total free bytes
    fn free_bytes(&mut self) -> Result<u64>;

    /// Fragmentation score (0.0 = all free space contiguous, higher = more fragmented)
    fn fragmentation_score(&mut self) -> Result<f64>;
}
