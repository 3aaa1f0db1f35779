#![warn(missing_docs)]

/// allocator module, the locked kernel heap and the global allocator
pub mod allocator;
/// clk module, handles the PIT and uptime
#[cfg(target_os = "none")]
pub mod clk;
/// config module, compile-time sizes and the log level
pub mod config;
/// context module, saved machine state and the context switch
pub mod context;
/// cpu module, interrupt masking and halting
pub mod cpu;
/// gdt module, handles global descriptor table
#[cfg(target_os = "none")]
pub mod gdt;
/// heap module, the first-fit block allocator
pub mod heap;
/// idt module, the interrupt vector table layout
pub mod idt;
/// input module, queues raw keyboard and mouse bytes
pub mod input;
/// interrupts module, handles interrupt handling
#[cfg(target_os = "none")]
pub mod interrupts;
/// irq module, IRQ callbacks and end-of-interrupt ordering
pub mod irq;
/// memory module, maps the kernel heap
#[cfg(target_os = "none")]
pub mod memory;
/// pic module, the 8259 interrupt controller
#[cfg(target_os = "none")]
pub mod pic;
/// process module, the kernel's process table
#[cfg(target_os = "none")]
pub mod process;
/// scheduler module, process table and ready queue
pub mod scheduler;
/// serial module, handles serial output
#[cfg(target_os = "none")]
pub mod serial;
