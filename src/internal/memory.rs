use core::sync::atomic::{AtomicUsize, Ordering};

use bootloader::bootinfo::{BootInfo, MemoryMap, MemoryRegionType};
use log::{debug, error};
use x86_64::structures::paging::{FrameAllocator, OffsetPageTable, PageTable, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

static ALLOCATED_FRAMES: AtomicUsize = AtomicUsize::new(0);

/// The active level 4 page table, reached through the physical memory mapping
///
/// # Safety
/// All physical memory must be mapped at `physical_memory_offset`, and the
/// returned reference must not be aliased.
unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    let (level_4_table_frame, _) = x86_64::registers::control::Cr3::read();

    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();

    unsafe { &mut *page_table_ptr }
}

unsafe fn init_page_table(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let level_4_table = unsafe { active_level_4_table(physical_memory_offset) };

    unsafe { OffsetPageTable::new(level_4_table, physical_memory_offset) }
}

/// A FrameAllocator that returns usable frames from the bootloader's memory map
pub struct BootInfoFrameAllocator {
    memory_map: &'static MemoryMap,
}

impl BootInfoFrameAllocator {
    /// Create a FrameAllocator from the passed memory map
    pub fn init(memory_map: &'static MemoryMap) -> Self {
        BootInfoFrameAllocator { memory_map }
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame> {
        let regions = self.memory_map.iter();
        let usable_regions = regions.filter(|r| r.region_type == MemoryRegionType::Usable);
        let addr_ranges = usable_regions.map(|r| r.range.start_addr()..r.range.end_addr());
        let frame_addresses = addr_ranges.flat_map(|r| r.step_by(4096));
        frame_addresses.map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let next = ALLOCATED_FRAMES.fetch_add(1, Ordering::SeqCst);
        self.usable_frames().nth(next)
    }
}

/// Map the kernel heap and hand it to the allocator. A heap that cannot be
/// mapped leaves the kernel without stacks, so this halts.
pub fn init(boot_info: &'static BootInfo) {
    debug!("Initializing memory");
    let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset);
    let mut mapper = unsafe { init_page_table(phys_mem_offset) };
    let mut frame_allocator = BootInfoFrameAllocator::init(&boot_info.memory_map);

    if let Err(err) = crate::internal::allocator::init_heap(&mut mapper, &mut frame_allocator) {
        error!("heap initialization failed: {:?}", err);
        crate::internal::cpu::hlt_loop();
    }
}
