//! The 256-entry interrupt vector table in its long-mode gate layout.

use core::fmt;

use bit_field::BitField;
use bitflags::bitflags;

/// Number of vectors the processor can deliver
pub const VECTOR_COUNT: usize = 256;

bitflags! {
    /// The type/attribute byte of a gate descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GateAttributes: u8 {
        /// the gate is valid
        const PRESENT = 0x80;
        /// callable from ring 3 (`int n` in user code)
        const RING3 = 0x60;
        /// 64-bit trap gate, interrupts stay enabled in the handler
        const TRAP_GATE = 0x0F;
        /// 64-bit interrupt gate, interrupts are cleared on entry
        const INTERRUPT_GATE = 0x0E;
    }
}

impl GateAttributes {
    /// Present ring 0 interrupt gate (0x8E)
    pub const KERNEL_INTERRUPT: GateAttributes =
        GateAttributes::PRESENT.union(GateAttributes::INTERRUPT_GATE);
}

/// One 16-byte vector table entry
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl GateDescriptor {
    /// A non-present gate; delivering its vector raises a fault
    pub const MISSING: GateDescriptor = GateDescriptor {
        offset_low: 0,
        selector: 0,
        ist: 0,
        type_attr: 0,
        offset_mid: 0,
        offset_high: 0,
        reserved: 0,
    };

    /// Gate to `handler` through code segment `selector`
    pub fn new(handler: u64, selector: u16, attributes: GateAttributes) -> Self {
        GateDescriptor {
            offset_low: handler.get_bits(0..16) as u16,
            selector,
            ist: 0,
            type_attr: attributes.bits(),
            offset_mid: handler.get_bits(16..32) as u16,
            offset_high: handler.get_bits(32..64) as u32,
            reserved: 0,
        }
    }

    /// Switch to interrupt stack `index` (1-based, 0 keeps the current stack)
    pub fn with_stack_index(mut self, index: u8) -> Self {
        self.ist.set_bits(0..3, index);
        self
    }

    /// Address of the handler
    pub fn handler_address(&self) -> u64 {
        let mut address = 0u64;
        address.set_bits(0..16, self.offset_low as u64);
        address.set_bits(16..32, self.offset_mid as u64);
        address.set_bits(32..64, self.offset_high as u64);
        address
    }

    /// Code segment selector
    pub fn selector(&self) -> u16 {
        self.selector
    }

    /// Interrupt stack index
    pub fn stack_index(&self) -> u8 {
        self.ist.get_bits(0..3)
    }

    /// Type/attribute byte
    pub fn attributes(&self) -> GateAttributes {
        GateAttributes::from_bits_retain(self.type_attr)
    }

    /// Is the present bit set?
    pub fn is_present(&self) -> bool {
        self.attributes().contains(GateAttributes::PRESENT)
    }
}

impl fmt::Debug for GateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateDescriptor")
            .field("handler", &format_args!("{:#x}", self.handler_address()))
            .field("selector", &self.selector)
            .field("ist", &self.stack_index())
            .field("type_attr", &format_args!("{:#04x}", self.type_attr))
            .finish()
    }
}

/// The vector table. Every entry starts out missing.
#[repr(C, align(16))]
pub struct VectorTable {
    entries: [GateDescriptor; VECTOR_COUNT],
}

impl VectorTable {
    /// A table of missing gates
    pub const fn new() -> Self {
        VectorTable {
            entries: [GateDescriptor::MISSING; VECTOR_COUNT],
        }
    }

    /// Write one entry. No validation beyond the bounds given by `u8`.
    pub fn set_gate(&mut self, vector: u8, handler: u64, selector: u16, attributes: GateAttributes) {
        self.entries[vector as usize] = GateDescriptor::new(handler, selector, attributes);
    }

    /// Mutable access to one entry, to adjust it after `set_gate`
    pub fn entry_mut(&mut self, vector: u8) -> &mut GateDescriptor {
        &mut self.entries[vector as usize]
    }

    /// Read one entry
    pub fn entry(&self, vector: u8) -> &GateDescriptor {
        &self.entries[vector as usize]
    }

    /// Reset every entry to missing
    pub fn clear(&mut self) {
        self.entries = [GateDescriptor::MISSING; VECTOR_COUNT];
    }

    /// Size of the table in bytes
    pub const fn byte_len(&self) -> usize {
        core::mem::size_of::<[GateDescriptor; VECTOR_COUNT]>()
    }

    /// Load the table into the processor with `lidt`
    #[cfg(target_os = "none")]
    pub fn load(&'static self) {
        use x86_64::VirtAddr;
        use x86_64::structures::DescriptorTablePointer;

        let pointer = DescriptorTablePointer {
            limit: (self.byte_len() - 1) as u16,
            base: VirtAddr::new(self.entries.as_ptr() as u64),
        };
        // the table is 'static, so it outlives its use by the processor
        unsafe { x86_64::instructions::tables::lidt(&pointer) };
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}
