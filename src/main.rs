#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod kernel {
    use core::panic::PanicInfo;

    use bootloader::{BootInfo, entry_point};
    use coopos::internal::{input, process};
    use log::{info, warn};

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        coopos::internal::cpu::disable_interrupts();
        coopos::serial_println!("{}", info);
        coopos::hlt_loop()
    }

    entry_point!(kmain);

    fn kmain(boot_info: &'static BootInfo) -> ! {
        coopos::init(boot_info);

        for (entry, priority) in [(sleeper as fn(), 1), (one_shot as fn(), 1)] {
            if let Err(err) = process::create(entry, priority) {
                warn!("could not start demo process: {}", err);
            }
        }

        loop {
            while let Some(scancode) = input::pop_scancode() {
                info!("scancode {:#04x}", scancode);
            }
            while let Some(byte) = input::pop_mouse_byte() {
                info!("mouse byte {:#04x}", byte);
            }
            process::yield_now();
            if process::ready_len() == 0 {
                x86_64::instructions::hlt();
            }
        }
    }

    fn sleeper() {
        for round in 0..3 {
            info!("process {} round {}", process::current(), round);
            process::sleep(100);
        }
    }

    fn one_shot() {
        for round in 0..2 {
            info!("process {} round {}", process::current(), round);
            process::yield_now();
        }
        info!("process {} exiting with status 1", process::current());
        process::exit(1);
    }
}

/// Host builds only carry the library; the kernel binary needs a bare-metal target.
#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("coopos: build for a bare-metal x86_64 target to get a bootable kernel");
}
