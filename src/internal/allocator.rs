use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use spin::{Mutex, MutexGuard};

use super::config::MIN_ALLOCATION;
use super::cpu;
use super::heap::{Heap, HeapError};

/// A [`Heap`] behind a spin lock, usable as the global allocator.
///
/// Every access masks interrupts first, so an IRQ callback that allocates
/// cannot find the block table half-updated.
pub struct LockedHeap(Mutex<Heap>);

impl LockedHeap {
    /// An empty heap; call [`LockedHeap::init`] before allocating
    pub const fn empty() -> Self {
        LockedHeap(Mutex::new(Heap::empty()))
    }

    /// Hand the region to the heap
    ///
    /// # Safety
    /// Same contract as [`Heap::init`].
    pub unsafe fn init(&self, heap_start: usize, heap_size: usize) -> Result<(), HeapError> {
        cpu::without_interrupts(|| unsafe { self.0.lock().init(heap_start, heap_size) })
    }

    /// Lock the heap. Interrupts are not masked; use [`LockedHeap::with`]
    /// from code an IRQ could preempt.
    pub fn lock(&self) -> MutexGuard<'_, Heap> {
        self.0.lock()
    }

    /// Run `f` on the heap with interrupts masked
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        cpu::without_interrupts(|| f(&mut self.0.lock()))
    }

    /// `allocate` with interrupts masked
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.with(|heap| heap.allocate(size))
    }

    /// `free` with interrupts masked
    pub fn free(&self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        self.with(|heap| heap.free(ptr))
    }

    /// `zero_allocate` with interrupts masked
    pub fn zero_allocate(&self, count: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.with(|heap| heap.zero_allocate(count, size))
    }

    /// `resize` with interrupts masked
    pub fn resize(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        self.with(|heap| heap.resize(ptr, new_size))
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.with(|heap| heap.allocate_aligned(layout.size(), layout.align()))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            // an invalid handle is already logged by the heap
            let _ = self.free(ptr);
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > MIN_ALLOCATION || new_size == 0 {
            // resize only keeps the 4 byte guarantee
            let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
                return ptr::null_mut();
            };
            let new = unsafe { self.alloc(new_layout) };
            if !new.is_null() {
                unsafe {
                    ptr::copy_nonoverlapping(ptr, new, layout.size().min(new_size));
                    self.dealloc(ptr, layout);
                }
            }
            return new;
        }
        self.resize(NonNull::new(ptr), new_size)
            .ok()
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg(target_os = "none")]
pub use kernel_heap::{KERNEL_HEAP, init_heap};

#[cfg(target_os = "none")]
mod kernel_heap {
    use log::info;
    use x86_64::VirtAddr;
    use x86_64::structures::paging::{
        FrameAllocator, Mapper, Page, PageTableFlags, Size4KiB, mapper::MapToError,
    };

    use super::LockedHeap;
    use crate::internal::config::{HEAP_SIZE, HEAP_START};

    /// The kernel heap. Process stacks and every `alloc` collection come from here.
    #[global_allocator]
    pub static KERNEL_HEAP: LockedHeap = LockedHeap::empty();

    /// Map the heap pages and initialize the heap
    pub fn init_heap(
        mapper: &mut impl Mapper<Size4KiB>,
        frame_allocator: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), MapToError<Size4KiB>> {
        let page_range = {
            let heap_start = VirtAddr::new(HEAP_START as u64);
            let heap_end = heap_start + (HEAP_SIZE as u64 - 1);
            let start_page = Page::containing_address(heap_start);
            let end_page = Page::containing_address(heap_end);
            Page::range_inclusive(start_page, end_page)
        };

        for page in page_range {
            let frame = frame_allocator
                .allocate_frame()
                .ok_or(MapToError::FrameAllocationFailed)?;
            let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
            unsafe { mapper.map_to(page, frame, flags, frame_allocator)?.flush() };
        }

        // the pages were mapped just above and nothing else uses them
        if let Err(err) = unsafe { KERNEL_HEAP.init(HEAP_START, HEAP_SIZE) } {
            log::error!("heap: {}", err);
            return Err(MapToError::FrameAllocationFailed);
        }
        info!("heap: {} KB at {:#x}", HEAP_SIZE / 1024, HEAP_START);
        Ok(())
    }
}
