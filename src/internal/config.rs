//! Compile-time kernel configuration.
//!
//! Sizes and layout of the three core subsystems live here so the heap,
//! the scheduler and the interrupt layer agree on them. The log level is
//! picked with the `*_log` cargo features.

use log::LevelFilter;

/// Virtual base address of the kernel heap
pub const HEAP_START: usize = 0x4444_4444_0000;

/// size of heap in bytes
pub const HEAP_SIZE: usize = 2 * 1024 * 1024; // 2 MB

/// Number of blocks the heap can track at once
pub const MAX_BLOCKS: usize = 1024;

/// Allocation granularity of the heap, in bytes
pub const MIN_ALLOCATION: usize = 4;

/// Size of the stack handed to every new process
pub const PROCESS_STACK_SIZE: usize = 8192;

/// Alignment of process stacks (SysV requires 16 at call sites)
pub const STACK_ALIGN: usize = 16;

/// Capacity of the process table, idle slot included
pub const MAX_PROCESSES: usize = 64;

/// Time-slice counter given to new processes (advisory)
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Busy-wait iterations per unit of `sleep` duration
pub const SLEEP_SPINS_PER_UNIT: u32 = 1000;

/// Offset for the controller PIC
pub const PIC_1_OFFSET: u8 = 32;

/// Offset for the worker PIC
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Number of hardware IRQ lines behind the two PICs
pub const IRQ_LINES: usize = 16;

/// Software interrupt vector used by `yield`
pub const YIELD_VECTOR: u8 = 0x81;

/// PIT divider, about 1 ms between timer ticks
pub const PIT_DIVIDER: u16 = 1193;

/// Frequency of the PIT input clock in Hz
pub const PIT_FREQUENCY: u32 = 1_193_182;

/// Keyboard scancodes buffered between IRQ 1 and the consumer
pub const SCANCODE_QUEUE_SIZE: usize = 100;

/// Mouse packet bytes buffered between IRQ 12 and the consumer
pub const MOUSE_QUEUE_SIZE: usize = 96;

#[cfg(feature = "trace_log")]
/// Maximum log level
pub const LOG_LEVEL: LevelFilter = LevelFilter::Trace;

#[cfg(all(feature = "debug_log", not(feature = "trace_log")))]
/// Maximum log level
pub const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(all(
    feature = "info_log",
    not(any(feature = "trace_log", feature = "debug_log"))
))]
/// Maximum log level
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

#[cfg(all(
    feature = "warn_log",
    not(any(feature = "trace_log", feature = "debug_log", feature = "info_log"))
))]
/// Maximum log level
pub const LOG_LEVEL: LevelFilter = LevelFilter::Warn;

#[cfg(all(
    feature = "error_log",
    not(any(
        feature = "trace_log",
        feature = "debug_log",
        feature = "info_log",
        feature = "warn_log"
    ))
))]
/// Maximum log level
pub const LOG_LEVEL: LevelFilter = LevelFilter::Error;

#[cfg(not(any(
    feature = "trace_log",
    feature = "debug_log",
    feature = "info_log",
    feature = "warn_log",
    feature = "error_log"
)))]
/// Maximum log level
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;
