//! First-fit block allocator for the kernel heap.
//!
//! The heap region is described by an out-of-band table of [`Block`]s kept
//! sorted by start address. The table always covers the whole region with no
//! gaps and no overlaps, so the sizes of all blocks add up to [`Heap::total`].
//! The allocator never writes bookkeeping into the heap memory itself, which
//! is what lets a process free its own stack right before switching away.

use core::fmt;
use core::ptr::{self, NonNull};

use log::{info, warn};

use super::config::{MAX_BLOCKS, MIN_ALLOCATION};

/// Splitting a block is only worth it when the remainder is larger than this
pub const BLOCK_OVERHEAD: usize = core::mem::size_of::<Block>();

/// Whether a block is handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// available to `allocate`
    Free,
    /// owned by a caller
    Used,
}

/// A contiguous range of the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// first address of the block
    pub start: usize,
    /// size in bytes
    pub size: usize,
    /// free or used
    pub state: BlockState,
}

impl Block {
    const EMPTY: Block = Block {
        start: 0,
        size: 0,
        state: BlockState::Free,
    };

    /// One past the last address of the block
    pub fn end(&self) -> usize {
        self.start + self.size
    }

    /// Is the block available?
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}

/// Heap failures, all of them recoverable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// no free block is large enough
    OutOfMemory,
    /// the address is not the start of a used block
    InvalidHandle,
    /// a size computation overflowed
    Overflow,
    /// the region passed to `init` is unusable
    InvalidRegion,
    /// `init` was called twice
    AlreadyInitialized,
    /// the heap was used before `init`
    Uninitialized,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory => write!(f, "out of memory"),
            HeapError::InvalidHandle => write!(f, "invalid heap handle"),
            HeapError::Overflow => write!(f, "allocation size overflow"),
            HeapError::InvalidRegion => write!(f, "invalid heap region"),
            HeapError::AlreadyInitialized => write!(f, "heap already initialized"),
            HeapError::Uninitialized => write!(f, "heap not initialized"),
        }
    }
}

#[inline]
const fn align_up(addr: usize, align: usize) -> Option<usize> {
    match addr.checked_add(align - 1) {
        Some(addr) => Some(addr & !(align - 1)),
        None => None,
    }
}

/// A heap managing one contiguous region with at most `N` blocks
pub struct Heap<const N: usize = MAX_BLOCKS> {
    blocks: [Block; N],
    len: usize,
    start: usize,
    size: usize,
    used: usize,
}

impl<const N: usize> Heap<N> {
    /// An uninitialized heap; every allocation fails until [`Heap::init`]
    pub const fn empty() -> Self {
        Heap {
            blocks: [Block::EMPTY; N],
            len: 0,
            start: 0,
            size: 0,
            used: 0,
        }
    }

    /// Take ownership of `heap_size` bytes starting at `heap_start` as one
    /// free block. The start is rounded up to the allocation granularity
    /// and the size trimmed to a whole number of granules.
    ///
    /// # Safety
    /// The region must be valid, writable memory that nothing else uses for
    /// as long as the heap lives.
    pub unsafe fn init(&mut self, heap_start: usize, heap_size: usize) -> Result<(), HeapError> {
        if self.len != 0 {
            return Err(HeapError::AlreadyInitialized);
        }
        if heap_start == 0 || N == 0 {
            return Err(HeapError::InvalidRegion);
        }

        let start = align_up(heap_start, MIN_ALLOCATION).ok_or(HeapError::Overflow)?;
        let size = heap_size.saturating_sub(start - heap_start) & !(MIN_ALLOCATION - 1);
        if size == 0 {
            return Err(HeapError::InvalidRegion);
        }
        start.checked_add(size).ok_or(HeapError::Overflow)?;

        self.blocks[0] = Block {
            start,
            size,
            state: BlockState::Free,
        };
        self.len = 1;
        self.start = start;
        self.size = size;
        self.used = 0;
        Ok(())
    }

    /// Has [`Heap::init`] succeeded?
    pub fn is_initialized(&self) -> bool {
        self.len != 0
    }

    /// Allocate `size` bytes, rounded up to a multiple of 4
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.allocate_aligned(size, MIN_ALLOCATION)
    }

    /// Allocate `size` bytes starting at a multiple of `align`.
    ///
    /// First fit in address order. When the fitting block does not start on
    /// the requested boundary the leading pad is split off as its own free
    /// block.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, HeapError> {
        if !self.is_initialized() {
            return Err(HeapError::Uninitialized);
        }
        debug_assert!(align.is_power_of_two());
        let align = align.max(MIN_ALLOCATION);
        // a zero-sized block would share its start with the next one
        let size = align_up(size.max(1), MIN_ALLOCATION).ok_or(HeapError::Overflow)?;

        let Some((mut index, pad)) = self.find_fit(size, align) else {
            warn!("heap: out of memory ({} bytes requested)", size);
            return Err(HeapError::OutOfMemory);
        };

        if pad > 0 {
            // find_fit only hands out a padded block when the table has room
            self.split(index, pad);
            index += 1;
        }
        if self.blocks[index].size > size + BLOCK_OVERHEAD {
            // table full: the caller gets the whole block
            self.split(index, size);
        }

        let block = &mut self.blocks[index];
        block.state = BlockState::Used;
        self.used += block.size;
        NonNull::new(block.start as *mut u8).ok_or(HeapError::InvalidRegion)
    }

    /// Release the block starting at `ptr` and merge it with free neighbours,
    /// the next one first.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let index = self.used_block(ptr)?;

        self.blocks[index].state = BlockState::Free;
        self.used -= self.blocks[index].size;

        if index + 1 < self.len && self.blocks[index + 1].is_free() {
            self.merge_with_next(index);
        }
        if index > 0 && self.blocks[index - 1].is_free() {
            self.merge_with_next(index - 1);
        }
        Ok(())
    }

    /// Allocate `count * size` zeroed bytes
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        let total = count.checked_mul(size).ok_or(HeapError::Overflow)?;
        let ptr = self.allocate(total)?;
        // the block lies inside the region handed to `init`
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Ok(ptr)
    }

    /// Grow or shrink an allocation.
    ///
    /// `None` allocates, a zero size frees and returns `None`. A block that
    /// is already large enough is returned unchanged. Otherwise the contents
    /// move to a new block; if that allocation fails the old block is left
    /// untouched and still owned by the caller.
    pub fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size).map(Some);
        };
        if new_size == 0 {
            self.free(ptr)?;
            return Ok(None);
        }

        let old_size = self.blocks[self.used_block(ptr)?].size;
        if old_size >= new_size {
            return Ok(Some(ptr));
        }

        let new = self.allocate(new_size)?;
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size.min(new_size)) };
        self.free(ptr)?;
        Ok(Some(new))
    }

    /// Size of the used block starting at `ptr`
    pub fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.find(ptr.as_ptr() as usize)
            .map(|index| self.blocks[index])
            .filter(|block| !block.is_free())
            .map(|block| block.size)
    }

    /// Total bytes managed
    pub fn total(&self) -> usize {
        self.size
    }

    /// Bytes in used blocks
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes in free blocks
    pub fn free_bytes(&self) -> usize {
        self.size - self.used
    }

    /// First address of the region
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of blocks currently tracked
    pub fn block_count(&self) -> usize {
        self.len
    }

    /// The block table in address order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks[..self.len]
    }

    /// Size of the largest free block
    pub fn largest_free_block(&self) -> usize {
        self.blocks()
            .iter()
            .filter(|block| block.is_free())
            .map(|block| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Dump totals and the block table to the log
    pub fn log_stats(&self) {
        info!("Memory statistics:");
        info!("  total: {} KB", self.total() / 1024);
        info!("  used:  {} KB", self.used() / 1024);
        info!("  free:  {} KB", self.free_bytes() / 1024);
        info!("Memory map ({} entries):", self.len);
        for block in self.blocks() {
            info!(
                "  {:#010x} - {:#010x}: {} ({} bytes)",
                block.start,
                block.end() - 1,
                if block.is_free() { "FREE" } else { "USED" },
                block.size
            );
        }
    }

    fn find(&self, addr: usize) -> Option<usize> {
        self.blocks()
            .binary_search_by_key(&addr, |block| block.start)
            .ok()
    }

    fn used_block(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let addr = ptr.as_ptr() as usize;
        match self.find(addr) {
            Some(index) if !self.blocks[index].is_free() => Ok(index),
            Some(_) => {
                warn!("heap: {:#x} is already free", addr);
                Err(HeapError::InvalidHandle)
            }
            None => {
                warn!("heap: invalid pointer {:#x}", addr);
                Err(HeapError::InvalidHandle)
            }
        }
    }

    fn find_fit(&self, size: usize, align: usize) -> Option<(usize, usize)> {
        let table_full = self.len == N;
        self.blocks().iter().enumerate().find_map(|(index, block)| {
            if !block.is_free() {
                return None;
            }
            let pad = align_up(block.start, align)? - block.start;
            if pad > 0 && table_full {
                return None;
            }
            (block.size >= pad.checked_add(size)?).then_some((index, pad))
        })
    }

    /// Cut `blocks[index]` after `head` bytes. The tail inherits the state.
    fn split(&mut self, index: usize, head: usize) -> bool {
        if self.len == N {
            return false;
        }
        let block = self.blocks[index];
        debug_assert!(head > 0 && head < block.size);

        self.blocks.copy_within(index + 1..self.len, index + 2);
        self.blocks[index + 1] = Block {
            start: block.start + head,
            size: block.size - head,
            state: block.state,
        };
        self.blocks[index].size = head;
        self.len += 1;
        true
    }

    fn merge_with_next(&mut self, index: usize) {
        self.blocks[index].size += self.blocks[index + 1].size;
        self.blocks.copy_within(index + 2..self.len, index + 1);
        self.len -= 1;
    }
}

impl<const N: usize> Default for Heap<N> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    struct Arena<const N: usize> {
        _memory: Vec<u64>,
        heap: Heap<N>,
    }

    fn arena<const N: usize>(bytes: usize) -> Arena<N> {
        let mut memory = vec![0u64; bytes / 8];
        let mut heap = Heap::empty();
        unsafe { heap.init(memory.as_mut_ptr() as usize, bytes).unwrap() };
        Arena {
            _memory: memory,
            heap,
        }
    }

    fn addr(ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize
    }

    #[test]
    fn first_fit_reuses_freed_block() {
        let mut arena = arena::<64>(1024);
        let heap = &mut arena.heap;

        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        assert!(addr(b) >= addr(a) + 100);

        heap.free(a).unwrap();
        let c = heap.allocate(50).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn sizes_round_up_to_four_bytes() {
        let mut arena = arena::<64>(1024);
        let heap = &mut arena.heap;

        let a = heap.allocate(5).unwrap();
        assert_eq!(heap.block_size(a), Some(8));
        let b = heap.allocate(0).unwrap();
        assert_eq!(heap.block_size(b), Some(4));
        assert_ne!(a, b);
    }

    #[test]
    fn small_remainder_is_not_split() {
        let mut arena = arena::<64>(128);
        let heap = &mut arena.heap;

        let a = heap.allocate(128 - BLOCK_OVERHEAD).unwrap();
        assert_eq!(heap.block_count(), 1);
        assert_eq!(heap.block_size(a), Some(128));
    }

    #[test]
    fn free_merges_forward_then_backward() {
        let mut arena = arena::<64>(1024);
        let heap = &mut arena.heap;

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();
        assert_eq!(heap.block_count(), 4);

        heap.free(a).unwrap();
        heap.free(c).unwrap();
        assert_eq!(heap.block_count(), 3);

        heap.free(b).unwrap();
        assert_eq!(heap.block_count(), 1);
        assert_eq!(heap.blocks()[0].size, 1024);
        assert!(heap.blocks()[0].is_free());
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn invalid_free_leaves_state_alone() {
        let mut arena = arena::<64>(1024);
        let heap = &mut arena.heap;

        let a = heap.allocate(100).unwrap();
        let before: Vec<Block> = heap.blocks().to_vec();

        let inside = NonNull::new(unsafe { a.as_ptr().add(4) }).unwrap();
        assert_eq!(heap.free(inside), Err(HeapError::InvalidHandle));
        assert_eq!(heap.blocks(), &before[..]);

        heap.free(a).unwrap();
        assert_eq!(heap.free(a), Err(HeapError::InvalidHandle));
    }

    #[test]
    fn out_of_memory_is_reported() {
        let mut arena = arena::<64>(256);
        let heap = &mut arena.heap;

        assert_eq!(heap.allocate(512), Err(HeapError::OutOfMemory));
        heap.allocate(200).unwrap();
        assert_eq!(heap.allocate(100), Err(HeapError::OutOfMemory));
    }

    #[test]
    fn uninitialized_heap_refuses_work() {
        let mut heap: Heap<8> = Heap::empty();
        assert_eq!(heap.allocate(8), Err(HeapError::Uninitialized));
        assert_eq!(unsafe { heap.init(0, 1024) }, Err(HeapError::InvalidRegion));
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut arena = arena::<8>(256);
        let start = arena.heap.start();
        assert_eq!(
            unsafe { arena.heap.init(start, 256) },
            Err(HeapError::AlreadyInitialized)
        );
    }

    #[test]
    fn full_table_hands_out_whole_blocks() {
        let mut arena = arena::<2>(1024);
        let heap = &mut arena.heap;

        let a = heap.allocate(100).unwrap();
        assert_eq!(heap.block_count(), 2);
        let b = heap.allocate(100).unwrap();
        assert_eq!(heap.block_count(), 2);
        assert_eq!(heap.block_size(a), Some(100));
        assert_eq!(heap.block_size(b), Some(1024 - 100));
        assert_eq!(heap.free_bytes(), 0);
    }

    #[test]
    fn aligned_allocation_splits_off_the_pad() {
        let mut arena = arena::<64>(4096);
        let heap = &mut arena.heap;

        heap.allocate(4).unwrap();
        let stack = heap.allocate_aligned(256, 64).unwrap();
        assert_eq!(addr(stack) % 64, 0);

        let pad = heap.blocks()[1];
        assert!(pad.is_free());
        assert_eq!(pad.end(), addr(stack));

        let total: usize = heap.blocks().iter().map(|block| block.size).sum();
        assert_eq!(total, 4096);
    }

    #[test]
    fn zero_allocate_clears_reused_memory() {
        let mut arena = arena::<64>(1024);
        let heap = &mut arena.heap;

        let dirty = heap.allocate(64).unwrap();
        unsafe { ptr::write_bytes(dirty.as_ptr(), 0xAA, 64) };
        heap.free(dirty).unwrap();

        let clean = heap.zero_allocate(16, 4).unwrap();
        assert_eq!(clean, dirty);
        let bytes = unsafe { core::slice::from_raw_parts(clean.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));

        assert_eq!(heap.zero_allocate(usize::MAX, 2), Err(HeapError::Overflow));
    }

    #[test]
    fn resize_moves_contents() {
        let mut arena = arena::<64>(1024);
        let heap = &mut arena.heap;

        let old = heap.allocate(8).unwrap();
        let guard = heap.allocate(8).unwrap();
        unsafe { ptr::copy_nonoverlapping(b"kernel!!".as_ptr(), old.as_ptr(), 8) };

        let new = heap.resize(Some(old), 64).unwrap().unwrap();
        assert_ne!(new, old);
        let bytes = unsafe { core::slice::from_raw_parts(new.as_ptr(), 8) };
        assert_eq!(bytes, b"kernel!!");
        assert_eq!(heap.block_size(old), None);

        assert_eq!(heap.resize(Some(new), 16).unwrap(), Some(new));
        assert_eq!(heap.resize(Some(guard), 0).unwrap(), None);
        assert_eq!(heap.block_size(guard), None);
        assert!(heap.resize(None, 16).unwrap().is_some());
    }

    #[test]
    fn failed_resize_keeps_the_old_block() {
        let mut arena = arena::<64>(256);
        let heap = &mut arena.heap;

        let old = heap.allocate(100).unwrap();
        unsafe { ptr::write_bytes(old.as_ptr(), 0x5A, 100) };

        assert_eq!(heap.resize(Some(old), 512), Err(HeapError::OutOfMemory));
        assert_eq!(heap.block_size(old), Some(100));
        let bytes = unsafe { core::slice::from_raw_parts(old.as_ptr(), 100) };
        assert!(bytes.iter().all(|&b| b == 0x5A));
    }
}
