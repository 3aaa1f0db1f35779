use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::boxed::Box;
use log::debug;
use x86_64::instructions::port::Port;

use crate::internal::config::{PIT_DIVIDER, PIT_FREQUENCY};
use crate::internal::interrupts;

// At boot the PIT starts with a frequency divider of 0 (equivalent to 65536)
// which will result in about 54.926 ms between ticks.
// During init we will change the divider to 1193 to have about 1.000 ms
// between ticks.

static PIT_TICKS: AtomicUsize = AtomicUsize::new(0);

/// Program channel 0 and count its ticks on IRQ 0.
///
/// The tick only feeds [`uptime`]; it never calls into the scheduler.
pub fn init() {
    unsafe {
        let mut port = Port::new(0x43);
        port.write(0x36u8); // Channel 0, lobyte/hibyte, rate generator, binary
        let mut port = Port::new(0x40);
        port.write((PIT_DIVIDER & 0xFF) as u8);
        port.write((PIT_DIVIDER >> 8) as u8);
    }

    interrupts::install_handler(0, Box::new(pit_handler));
    debug!("PIT running at {} Hz", PIT_FREQUENCY / PIT_DIVIDER as u32);
}

fn pit_handler() {
    PIT_TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Get the number of PIT ticks since boot
pub fn ticks() -> usize {
    PIT_TICKS.load(Ordering::Relaxed)
}

/// Seconds since `init`
pub fn uptime() -> f64 {
    ticks() as f64 * PIT_DIVIDER as f64 / PIT_FREQUENCY as f64
}
