use pic8259::ChainedPics;
use x86_64::instructions::port::Port;

use super::config::{PIC_1_OFFSET, PIC_2_OFFSET};
use super::irq::{Chip, InterruptController};

const PRIMARY_COMMAND: u16 = 0x20;
const SECONDARY_COMMAND: u16 = 0xA0;
const END_OF_INTERRUPT: u8 = 0x20;

/// The two cascaded 8259 chips of a PC
pub struct Pic8259 {
    pics: ChainedPics,
}

impl Pic8259 {
    /// Controller for the standard ports, remapped to the kernel's offsets
    /// once [`InterruptController::remap`] runs
    pub const fn new() -> Self {
        Pic8259 {
            // standard PC ports, and the offsets do not overlap the exceptions
            pics: unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) },
        }
    }
}

impl Default for Pic8259 {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController for Pic8259 {
    fn remap(&mut self, primary_offset: u8, secondary_offset: u8) {
        // ICW1..ICW4: edge triggered, cascade on line 2, 8086 mode.
        // The masks in place before the remap are restored by `initialize`.
        unsafe {
            self.pics = ChainedPics::new(primary_offset, secondary_offset);
            self.pics.initialize();
        }
    }

    fn end_of_interrupt(&mut self, chip: Chip) {
        let port = match chip {
            Chip::Primary => PRIMARY_COMMAND,
            Chip::Secondary => SECONDARY_COMMAND,
        };
        unsafe { Port::<u8>::new(port).write(END_OF_INTERRUPT) };
    }

    fn set_line_masked(&mut self, irq: u8, masked: bool) {
        if irq >= 16 {
            return;
        }
        unsafe {
            let mut masks = self.pics.read_masks();
            let (chip, bit) = ((irq / 8) as usize, irq % 8);
            if masked {
                masks[chip] |= 1 << bit;
            } else {
                masks[chip] &= !(1 << bit);
            }
            self.pics.write_masks(masks[0], masks[1]);
        }
    }
}
