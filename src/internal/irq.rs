//! Hardware IRQ callbacks and end-of-interrupt acknowledgement.
//!
//! The sixteen lines behind the cascaded PICs each hold at most one
//! callback. Dispatch runs the callback, if any, then acknowledges the
//! controller: the secondary chip first for lines 8 to 15, then always the
//! primary.

use alloc::boxed::Box;

use log::debug;

use super::config::IRQ_LINES;

/// Callback run when its IRQ line fires
pub type IrqHandler = Box<dyn FnMut() + Send>;

/// One of the two cascaded 8259 chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip {
    /// lines 0 to 7, and the cascade
    Primary,
    /// lines 8 to 15
    Secondary,
}

/// The operations dispatch needs from an interrupt controller
pub trait InterruptController {
    /// Move the lines to vectors `primary_offset..primary_offset + 8` and
    /// `secondary_offset..secondary_offset + 8`
    fn remap(&mut self, primary_offset: u8, secondary_offset: u8);

    /// Send the end-of-interrupt command to one chip
    fn end_of_interrupt(&mut self, chip: Chip);

    /// Mask or unmask one line
    fn set_line_masked(&mut self, irq: u8, masked: bool);
}

/// Acknowledge `irq`. Lines 8 and up are acknowledged on the secondary chip
/// before the primary, or the cascade stays stuck.
pub fn send_eoi<C: InterruptController + ?Sized>(controller: &mut C, irq: u8) {
    if irq >= 8 {
        controller.end_of_interrupt(Chip::Secondary);
    }
    controller.end_of_interrupt(Chip::Primary);
}

/// Callback table for the sixteen IRQ lines
pub struct IrqTable {
    handlers: [Option<IrqHandler>; IRQ_LINES],
}

impl IrqTable {
    /// Every line unhandled
    pub const fn new() -> Self {
        IrqTable {
            handlers: [const { None }; IRQ_LINES],
        }
    }

    /// Register `handler` for `irq`, replacing any previous one. Lines
    /// outside `0..16` are ignored.
    pub fn install_handler(&mut self, irq: u8, handler: IrqHandler) {
        let Some(slot) = self.handlers.get_mut(irq as usize) else {
            debug!("irq: ignoring handler for line {}", irq);
            return;
        };
        *slot = Some(handler);
        debug!("irq: handler installed on line {}", irq);
    }

    /// Remove the callback of `irq`, if any
    pub fn uninstall_handler(&mut self, irq: u8) -> Option<IrqHandler> {
        self.handlers.get_mut(irq as usize)?.take()
    }

    /// Does `irq` have a callback?
    pub fn is_handled(&self, irq: u8) -> bool {
        matches!(self.handlers.get(irq as usize), Some(Some(_)))
    }

    /// Run the callback of `irq`, if any
    pub fn run(&mut self, irq: u8) {
        if let Some(Some(handler)) = self.handlers.get_mut(irq as usize) {
            handler();
        }
    }

    /// Service one interrupt on `irq`: run its callback, then acknowledge
    pub fn dispatch<C: InterruptController + ?Sized>(&mut self, irq: u8, controller: &mut C) {
        self.run(irq);
        send_eoi(controller, irq);
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        eois: Vec<Chip>,
    }

    impl InterruptController for Recorder {
        fn remap(&mut self, _primary_offset: u8, _secondary_offset: u8) {}

        fn end_of_interrupt(&mut self, chip: Chip) {
            self.eois.push(chip);
        }

        fn set_line_masked(&mut self, _irq: u8, _masked: bool) {}
    }

    fn counter() -> (Arc<AtomicUsize>, IrqHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, Box::new(move || {
            inner.fetch_add(1, Ordering::Relaxed);
        }))
    }

    #[test]
    fn primary_lines_acknowledge_once() {
        let mut pic = Recorder::default();
        send_eoi(&mut pic, 1);
        assert_eq!(pic.eois, [Chip::Primary]);
    }

    #[test]
    fn secondary_lines_acknowledge_secondary_first() {
        let mut pic = Recorder::default();
        send_eoi(&mut pic, 12);
        assert_eq!(pic.eois, [Chip::Secondary, Chip::Primary]);
    }

    #[test]
    fn unhandled_line_is_still_acknowledged() {
        let mut table = IrqTable::new();
        let mut pic = Recorder::default();
        table.dispatch(3, &mut pic);
        assert_eq!(pic.eois, [Chip::Primary]);
    }

    #[test]
    fn dispatch_runs_installed_callback() {
        let mut table = IrqTable::new();
        let mut pic = Recorder::default();
        let (count, handler) = counter();
        table.install_handler(1, handler);
        assert!(table.is_handled(1));

        table.dispatch(1, &mut pic);
        table.dispatch(1, &mut pic);
        table.dispatch(2, &mut pic);
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(pic.eois.len(), 3);
    }

    #[test]
    fn out_of_range_line_is_ignored() {
        let mut table = IrqTable::new();
        let (count, handler) = counter();
        table.install_handler(16, handler);
        assert!((0..16).all(|irq| !table.is_handled(irq)));
        table.run(16);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn reinstall_replaces_and_uninstall_removes() {
        let mut table = IrqTable::new();
        let (first, handler) = counter();
        table.install_handler(0, handler);
        let (second, handler) = counter();
        table.install_handler(0, handler);

        table.run(0);
        assert_eq!(first.load(Ordering::Relaxed), 0);
        assert_eq!(second.load(Ordering::Relaxed), 1);

        assert!(table.uninstall_handler(0).is_some());
        assert!(!table.is_handled(0));
    }
}
