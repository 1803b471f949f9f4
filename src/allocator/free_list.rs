//! First-fit free list embedded in the free-block table
//!
//! Invariants maintained across every public operation:
//! - the list reachable from the header's head is sorted strictly ascending by start
//! - no two listed blocks overlap
//! - after a free, no two consecutive blocks touch (`a.end() < b.start`)
//! - every listed block has a non-zero size; size 0 marks an unused table slot

use super::SpaceAllocator;
use crate::error::{FsError, Result};
use crate::header::{
    decode_index, encode_index, get_i32, non_negative, put_i32, DATA_OFFSET, FREE_BLOCK_SIZE,
    MAX_FREE_BLOCKS,
};
use crate::io::{BackingStore, Store};
use serde::Serialize;
use tracing::{debug, warn};

/// A free byte range of the data region, linked to the next one by table index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeBlock {
    /// Absolute store offset
    pub start: u32,
    /// Length in bytes (0 = unused slot)
    pub size: u32,
    /// Table index of the next block in the list
    pub next: Option<usize>,
}

impl FreeBlock {
    /// An unused slot. Encoded as all zeros on disk.
    pub const EMPTY: FreeBlock = FreeBlock {
        start: 0,
        size: 0,
        next: None,
    };

    pub fn new(start: u32, size: u32) -> Self {
        FreeBlock {
            start,
            size,
            next: None,
        }
    }

    pub fn is_unused(&self) -> bool {
        self.size == 0
    }

    /// One past the last byte of the block
    pub fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    /// Check if this block contains an absolute offset
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start as u64 && offset < self.end()
    }

    /// Check if `other` begins exactly where this block ends
    pub fn is_adjacent_to(&self, other: &FreeBlock) -> bool {
        self.end() == other.start as u64
    }

    /// Check if this block shares any byte with `[start, start + len)`
    pub fn overlaps(&self, start: u64, len: u64) -> bool {
        len > 0 && start < self.end() && (self.start as u64) < start + len
    }

    pub fn to_bytes(&self) -> [u8; FREE_BLOCK_SIZE] {
        let mut bytes = [0u8; FREE_BLOCK_SIZE];
        if self.is_unused() {
            return bytes;
        }
        put_i32(&mut bytes, 0, self.start as i32);
        put_i32(&mut bytes, 4, self.size as i32);
        put_i32(&mut bytes, 8, encode_index(self.next));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let size = non_negative("free block size", get_i32(bytes, 4))?;
        if size == 0 {
            // Other fields of an unused slot carry no meaning
            return Ok(FreeBlock::EMPTY);
        }

        Ok(FreeBlock {
            start: non_negative("free block start", get_i32(bytes, 0))?,
            size,
            next: decode_index("free block next", get_i32(bytes, 8))?,
        })
    }
}

/// Guards list walks against a corrupted (cyclic) next chain
struct WalkGuard {
    steps: usize,
    limit: usize,
}

impl WalkGuard {
    fn new(limit: usize) -> Self {
        WalkGuard { steps: 0, limit }
    }

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limit {
            return Err(FsError::Corrupted(
                "free list is longer than the free-block table (cycle?)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Free-list operations over a borrowed store
///
/// Holds no state of its own: the head lives in the header and the nodes live in the
/// free-block table, and both are re-read on every call.
pub struct FreeList<'a, B: BackingStore> {
    store: &'a mut Store<B>,
}

impl<'a, B: BackingStore> FreeList<'a, B> {
    pub fn new(store: &'a mut Store<B>) -> Self {
        FreeList { store }
    }

    /// Seed the list with one block from the header's legacy cursor to the end of the store
    ///
    /// Used once, when the store is formatted. Assumes a zeroed free-block table.
    pub fn init(&mut self) -> Result<()> {
        let mut header = self.store.read_header()?;
        let start = header.legacy_cursor;
        let size = self.store.size().saturating_sub(start as u64);

        if size == 0 {
            header.free_list_head = None;
            return self.store.write_header(&header);
        }

        let size = u32::try_from(size).map_err(|_| FsError::InvalidRegion {
            start,
            size: u32::MAX,
        })?;

        self.store.write_free_block(0, &FreeBlock::new(start, size))?;
        header.free_list_head = Some(0);
        self.store.write_header(&header)?;

        debug!("Seeded free list with {} bytes at offset {}", size, start);
        Ok(())
    }

    /// Snapshot of the list in list order
    pub fn blocks(&mut self) -> Result<Vec<FreeBlock>> {
        let header = self.store.read_header()?;
        let mut guard = WalkGuard::new(MAX_FREE_BLOCKS);
        let mut blocks = Vec::new();

        let mut cursor = header.free_list_head;
        while let Some(index) = cursor {
            guard.step()?;
            let block = self.store.read_free_block(index)?;
            cursor = block.next;
            blocks.push(block);
        }

        Ok(blocks)
    }

    /// Merge touching neighbours in one forward pass
    ///
    /// After a merge the same node is examined again, since it may now touch its new
    /// successor. Returns the number of merges performed.
    pub fn coalesce(&mut self) -> Result<usize> {
        let header = self.store.read_header()?;
        // Every iteration either merges (shortening the list) or advances
        let mut guard = WalkGuard::new(2 * MAX_FREE_BLOCKS);
        let mut merged = 0;

        let mut cursor = header.free_list_head;
        while let Some(index) = cursor {
            guard.step()?;
            let mut node = self.store.read_free_block(index)?;
            let Some(next_index) = node.next else {
                break;
            };
            let next = self.store.read_free_block(next_index)?;

            if node.is_adjacent_to(&next) {
                node.size += next.size;
                node.next = next.next;
                self.store.write_free_block(index, &node)?;
                self.store.write_free_block(next_index, &FreeBlock::EMPTY)?;
                merged += 1;
                continue;
            }

            cursor = node.next;
        }

        if merged > 0 {
            debug!("Coalesced {} free block pair(s)", merged);
        }
        Ok(merged)
    }

    fn find_empty_slot(&mut self) -> Result<Option<usize>> {
        for slot in 0..MAX_FREE_BLOCKS {
            if self.store.read_free_block(slot)?.is_unused() {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn check_region(&self, start: u32, size: u32) -> Result<()> {
        let end = start as u64 + size as u64;
        if (start as u64) < DATA_OFFSET || end > self.store.size() {
            return Err(FsError::InvalidRegion { start, size });
        }
        Ok(())
    }
}

impl<B: BackingStore> SpaceAllocator for FreeList<'_, B> {
    /// First fit, carving from the front of the chosen block
    ///
    /// On failure the list is left untouched.
    fn allocate(&mut self, size: u32) -> Result<u32> {
        if size == 0 {
            return Err(FsError::InvalidSize {
                requested: 0,
                current: 0,
            });
        }

        let mut header = self.store.read_header()?;
        let mut guard = WalkGuard::new(MAX_FREE_BLOCKS);
        let mut prev: Option<(usize, FreeBlock)> = None;

        let mut cursor = header.free_list_head;
        while let Some(index) = cursor {
            guard.step()?;
            let mut block = self.store.read_free_block(index)?;

            if block.size < size {
                cursor = block.next;
                prev = Some((index, block));
                continue;
            }

            let start = block.start;
            if block.size == size {
                // Exact fit: unlink the node and recycle its slot
                match prev {
                    Some((prev_index, mut prev_block)) => {
                        prev_block.next = block.next;
                        self.store.write_free_block(prev_index, &prev_block)?;
                    }
                    None => {
                        header.free_list_head = block.next;
                        self.store.write_header(&header)?;
                    }
                }
                self.store.write_free_block(index, &FreeBlock::EMPTY)?;
            } else {
                // Start only moves forward, so the list stays sorted
                block.start += size;
                block.size -= size;
                self.store.write_free_block(index, &block)?;
            }

            debug!("Allocated {} bytes at offset {} (slot {})", size, start, index);
            return Ok(start);
        }

        debug!("No free block of {} bytes", size);
        Err(FsError::OutOfSpace { requested: size })
    }

    /// Sorted insert followed by one coalescing pass
    ///
    /// If the free-block table has no empty slot the range is leaked: it stays out of the
    /// list until a later coalesce frees a slot and the caller retries.
    fn free(&mut self, start: u32, size: u32) -> Result<()> {
        self.check_region(start, size)?;
        if size == 0 {
            return Ok(());
        }

        let Some(slot) = self.find_empty_slot()? else {
            warn!(
                "Free-block table full, leaking {} bytes at offset {}",
                size, start
            );
            return Err(FsError::FreeListFull { start, size });
        };

        let mut header = self.store.read_header()?;
        let mut guard = WalkGuard::new(MAX_FREE_BLOCKS);
        let mut prev: Option<(usize, FreeBlock)> = None;

        let mut cursor = header.free_list_head;
        while let Some(index) = cursor {
            guard.step()?;
            let block = self.store.read_free_block(index)?;
            if block.start > start {
                break;
            }
            cursor = block.next;
            prev = Some((index, block));
        }

        // The new node is fully written before anything links to it
        self.store.write_free_block(slot, &FreeBlock::EMPTY)?;
        self.store.write_free_block(
            slot,
            &FreeBlock {
                start,
                size,
                next: cursor,
            },
        )?;

        match prev {
            Some((prev_index, mut prev_block)) => {
                prev_block.next = Some(slot);
                self.store.write_free_block(prev_index, &prev_block)?;
            }
            None => {
                header.free_list_head = Some(slot);
                self.store.write_header(&header)?;
            }
        }

        debug!("Freed {} bytes at offset {} (slot {})", size, start, slot);
        self.coalesce()?;
        Ok(())
    }

    fn free_bytes(&mut self) -> Result<u64> {
        Ok(self.blocks()?.iter().map(|b| b.size as u64).sum())
    }

    fn fragmentation_score(&mut self) -> Result<f64> {
        let blocks = self.blocks()?;
        let free: u64 = blocks.iter().map(|b| b.size as u64).sum();

        if free == 0 || blocks.is_empty() {
            return Ok(0.0);
        }

        // 1 block = 0.0; every free byte its own block = 1.0
        Ok((blocks.len() as f64 - 1.0) / (free as f64).max(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::io::MemStore;

    const D: u32 = DATA_OFFSET as u32;

    fn store_with_data(len: usize) -> Store<MemStore> {
        let mut store = Store::new(MemStore::new(DATA_OFFSET as usize + len));
        store.write_header(&Header::new()).unwrap();
        FreeList::new(&mut store).init().unwrap();
        store
    }

    fn spans(store: &mut Store<MemStore>) -> Vec<(u32, u32)> {
        FreeList::new(store)
            .blocks()
            .unwrap()
            .iter()
            .map(|b| (b.start, b.size))
            .collect()
    }

    #[test]
    fn test_free_block_geometry() {
        let a = FreeBlock::new(10, 10);
        let b = FreeBlock::new(20, 5);

        assert!(a.contains(10));
        assert!(a.contains(19));
        assert!(!a.contains(20));
        assert!(a.is_adjacent_to(&b));
        assert!(!b.is_adjacent_to(&a));
        assert!(a.overlaps(15, 10));
        assert!(!a.overlaps(20, 10));
        assert!(!a.overlaps(12, 0));
    }

    #[test]
    fn test_unused_slot_encodes_as_zeros() {
        assert!(FreeBlock::EMPTY.to_bytes().iter().all(|&b| b == 0));

        let mut bytes = [0u8; FREE_BLOCK_SIZE];
        put_i32(&mut bytes, 0, 1234);
        put_i32(&mut bytes, 8, 99_999);
        assert_eq!(FreeBlock::from_bytes(&bytes).unwrap(), FreeBlock::EMPTY);
    }

    #[test]
    fn test_init_spans_data_region() {
        let mut store = store_with_data(100);
        assert_eq!(spans(&mut store), vec![(D, 100)]);
        assert_eq!(store.read_header().unwrap().free_list_head, Some(0));
    }

    #[test]
    fn test_allocate_carves_from_front() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        assert_eq!(list.allocate(10).unwrap(), D);
        assert_eq!(list.allocate(20).unwrap(), D + 10);
        assert_eq!(spans(&mut store), vec![(D + 30, 70)]);
    }

    #[test]
    fn test_exact_fit_unlinks_head() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        assert_eq!(list.allocate(100).unwrap(), D);
        assert!(list.blocks().unwrap().is_empty());
        assert_eq!(store.read_header().unwrap().free_list_head, None);
        assert!(store.read_free_block(0).unwrap().is_unused());
    }

    #[test]
    fn test_exact_fit_unlinks_middle_node() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        let a = list.allocate(5).unwrap();
        let _b = list.allocate(10).unwrap();
        let c = list.allocate(10).unwrap();
        let _d = list.allocate(10).unwrap();
        list.free(a, 5).unwrap();
        list.free(c, 10).unwrap();
        // [a:5] -> [c:10] -> [tail:65]

        assert_eq!(list.allocate(10).unwrap(), c);
        assert_eq!(spans(&mut store), vec![(D, 5), (D + 35, 65)]);
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        let a = list.allocate(30).unwrap();
        let _b = list.allocate(10).unwrap();
        let c = list.allocate(15).unwrap();
        let _d = list.allocate(10).unwrap();
        list.free(a, 30).unwrap();
        list.free(c, 15).unwrap();

        // The 15-byte hole would be the best fit; first fit takes the 30-byte one
        assert_eq!(list.allocate(15).unwrap(), a);
    }

    #[test]
    fn test_out_of_space_leaves_list_unchanged() {
        let mut store = store_with_data(100);
        FreeList::new(&mut store).allocate(60).unwrap();
        let before = spans(&mut store);

        let result = FreeList::new(&mut store).allocate(41);
        assert!(matches!(result, Err(FsError::OutOfSpace { requested: 41 })));
        assert_eq!(spans(&mut store), before);
    }

    #[test]
    fn test_zero_sized_allocation_rejected() {
        let mut store = store_with_data(100);
        assert!(matches!(
            FreeList::new(&mut store).allocate(0),
            Err(FsError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_free_outside_data_region() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        assert!(matches!(
            list.free(0, 10),
            Err(FsError::InvalidRegion { start: 0, size: 10 })
        ));
        assert!(matches!(
            list.free(D - 1, 10),
            Err(FsError::InvalidRegion { .. })
        ));
        assert!(matches!(
            list.free(D + 95, 10),
            Err(FsError::InvalidRegion { .. })
        ));
        assert_eq!(spans(&mut store), vec![(D, 100)]);
    }

    #[test]
    fn test_free_coalesces_both_neighbours() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        let a = list.allocate(10).unwrap();
        let b = list.allocate(10).unwrap();
        let c = list.allocate(10).unwrap();

        list.free(b, 10).unwrap();
        assert_eq!(list.blocks().unwrap().len(), 2);

        list.free(a, 10).unwrap();
        assert_eq!(spans(&mut store), vec![(D, 20), (D + 30, 70)]);

        let mut list = FreeList::new(&mut store);
        list.free(c, 10).unwrap();
        assert_eq!(spans(&mut store), vec![(D, 100)]);
    }

    #[test]
    fn test_free_before_head() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);

        let a = list.allocate(10).unwrap();
        let _b = list.allocate(10).unwrap();
        list.free(a, 5).unwrap();

        assert_eq!(spans(&mut store), vec![(D, 5), (D + 20, 80)]);
        let head = store.read_header().unwrap().free_list_head.unwrap();
        assert_eq!(store.read_free_block(head).unwrap().start, D);
    }

    #[test]
    fn test_coalesce_reexamines_merged_node() {
        let mut store = store_with_data(30);
        // Three touching blocks linked by hand: slot 2 -> slot 5 -> slot 1
        store.write_free_block(0, &FreeBlock::EMPTY).unwrap();
        store
            .write_free_block(2, &FreeBlock { start: D, size: 10, next: Some(5) })
            .unwrap();
        store
            .write_free_block(5, &FreeBlock { start: D + 10, size: 10, next: Some(1) })
            .unwrap();
        store
            .write_free_block(1, &FreeBlock { start: D + 20, size: 10, next: None })
            .unwrap();
        let mut header = store.read_header().unwrap();
        header.free_list_head = Some(2);
        store.write_header(&header).unwrap();

        assert_eq!(FreeList::new(&mut store).coalesce().unwrap(), 2);
        assert_eq!(spans(&mut store), vec![(D, 30)]);
        assert!(store.read_free_block(5).unwrap().is_unused());
        assert!(store.read_free_block(1).unwrap().is_unused());
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut store = store_with_data(30);
        store
            .write_free_block(0, &FreeBlock { start: D, size: 10, next: Some(0) })
            .unwrap();

        assert!(matches!(
            FreeList::new(&mut store).blocks(),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn test_free_list_full_leaks_region() {
        let len = 2 * MAX_FREE_BLOCKS + 4;
        let mut store = store_with_data(len);
        let mut list = FreeList::new(&mut store);

        for _ in 0..len {
            list.allocate(1).unwrap();
        }
        assert!(list.blocks().unwrap().is_empty());

        // Every other byte: no two freed ranges touch
        for i in 0..MAX_FREE_BLOCKS {
            list.free(D + 2 * i as u32, 1).unwrap();
        }
        assert_eq!(list.blocks().unwrap().len(), MAX_FREE_BLOCKS);

        let leaked = D + 2 * MAX_FREE_BLOCKS as u32;
        assert!(matches!(
            list.free(leaked, 1),
            Err(FsError::FreeListFull { .. })
        ));
        // A range that would merge still needs a slot first
        assert!(matches!(
            list.free(D + 1, 1),
            Err(FsError::FreeListFull { .. })
        ));
        assert_eq!(list.free_bytes().unwrap(), MAX_FREE_BLOCKS as u64);
    }

    #[test]
    fn test_round_trip_restores_blocks() {
        let mut store = store_with_data(200);
        let mut list = FreeList::new(&mut store);
        let a = list.allocate(50).unwrap();
        let _b = list.allocate(20).unwrap();
        list.free(a, 50).unwrap();

        let before = list.blocks().unwrap();
        let offset = list.allocate(30).unwrap();
        list.free(offset, 30).unwrap();
        let after = list.blocks().unwrap();

        let as_spans = |v: &[FreeBlock]| v.iter().map(|b| (b.start, b.size)).collect::<Vec<_>>();
        assert_eq!(as_spans(&before), as_spans(&after));
    }

    #[test]
    fn test_fragmentation_score() {
        let mut store = store_with_data(100);
        let mut list = FreeList::new(&mut store);
        assert_eq!(list.fragmentation_score().unwrap(), 0.0);

        let a = list.allocate(10).unwrap();
        let _b = list.allocate(10).unwrap();
        list.free(a, 10).unwrap();

        assert!(list.fragmentation_score().unwrap() > 0.0);
        assert_eq!(list.free_bytes().unwrap(), 90);
    }
}
