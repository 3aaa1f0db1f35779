#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

/// import the allocator crate
extern crate alloc;

/// kernel modules: heap, scheduler, interrupt dispatch and the hardware glue
pub mod internal;

pub use internal::heap::{Heap, HeapError};
pub use internal::irq::{Chip, InterruptController, IrqTable, send_eoi};
pub use internal::scheduler::{Pid, ProcessError, ProcessState, Scheduler};

pub use internal::cpu::hlt_loop;

#[cfg(target_os = "none")]
pub use kernel::{SerialLogger, init, init_logger};

#[cfg(target_os = "none")]
mod kernel {
    use bootloader::BootInfo;
    use log::{Level, Metadata, Record, info};

    use crate::internal::config::LOG_LEVEL;
    use crate::internal::{allocator, clk, cpu, gdt, interrupts, memory, process};
    use crate::serial_print;

    /// Writes `[uptime][ LEVEL ] message` lines to COM1
    pub struct SerialLogger;

    impl log::Log for SerialLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let level = match record.level() {
                Level::Error => "ERROR",
                Level::Warn => "WARN ",
                Level::Info => "INFO ",
                Level::Debug => "DEBUG",
                Level::Trace => "TRACE",
            };
            serial_print!(
                "[{:.6}][ {} ] {}\n",
                clk::time_since_boot(),
                level,
                record.args()
            );
        }

        fn flush(&self) {}
    }

    static LOGGER: SerialLogger = SerialLogger;

    /// Install the serial logger at the level picked by the `*_log` features
    pub fn init_logger() {
        // a second call keeps the first logger
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LOG_LEVEL);
        }
    }

    /// Bring the kernel up, leaving the caller as the idle process with
    /// interrupts enabled
    pub fn init(boot_info: &'static BootInfo) {
        init_logger();
        info!("Logger initialized");

        gdt::init();
        info!("GDT initialized");

        interrupts::init();
        info!("IDT initialized");

        memory::init(boot_info);
        allocator::KERNEL_HEAP.lock().log_stats();

        interrupts::install_default_handlers();
        clk::pit::init();
        info!("IRQ handlers installed");

        process::init();

        cpu::enable_interrupts();
        info!("Kernel initialized");
    }
}
