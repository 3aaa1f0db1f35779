//! The kernel's process table and the operations processes call on it.

use core::arch::asm;

use lazy_static::lazy_static;
use log::error;
use spin::Mutex;

use super::allocator::KERNEL_HEAP;
use super::config::{SLEEP_SPINS_PER_UNIT, YIELD_VECTOR};
use super::context::{MachineContext, X86Context};
use super::cpu;
use super::scheduler::{Pid, ProcessError, Scheduler, Switch};

lazy_static! {
    static ref SCHEDULER: Mutex<Scheduler<X86Context>> = Mutex::new(Scheduler::new());
}

/// Reset the table; the caller becomes the idle process
pub fn init() {
    cpu::without_interrupts(|| SCHEDULER.lock().init());
}

/// Start `entry` as a new process with its own stack
pub fn create(entry: fn(), priority: u32) -> Result<Pid, ProcessError> {
    KERNEL_HEAP.with(|heap| SCHEDULER.lock().create(heap, entry, priority))
}

/// Switch to the next ready process, if there is one.
///
/// Runs from the yield interrupt; returns when this process is scheduled
/// again.
pub fn schedule() {
    cpu::without_interrupts(|| {
        let switch = SCHEDULER.lock().schedule();
        if let Some(switch) = switch {
            perform(switch);
        }
    });
}

/// Give up the CPU to the next ready process
pub fn yield_now() {
    unsafe { asm!("int {vector}", vector = const YIELD_VECTOR) };
}

/// Busy-wait roughly `duration` units, then yield
pub fn sleep(duration: u32) {
    for _ in 0..duration.saturating_mul(SLEEP_SPINS_PER_UNIT) {
        core::hint::spin_loop();
    }
    yield_now();
}

/// Terminate the running process
pub fn exit(status: i32) -> ! {
    cpu::disable_interrupts();
    let switch = KERNEL_HEAP.with(|heap| SCHEDULER.lock().exit(heap, status));
    if let Some(switch) = switch {
        perform(switch);
    }
    // only the idle process can get here: nothing else was ready
    error!("process {} exited with nothing left to run", current());
    cpu::hlt_loop()
}

/// pid of the running process
pub fn current() -> Pid {
    cpu::without_interrupts(|| SCHEDULER.lock().current())
}

/// Number of processes waiting to run
pub fn ready_len() -> usize {
    cpu::without_interrupts(|| SCHEDULER.lock().ready_len())
}

fn perform(switch: Switch) {
    // both contexts live in the static table, and the lock is released
    unsafe { X86Context::switch(switch.from, switch.to) };
}

/// First Rust frame of every process, reached from the context trampoline
pub(crate) extern "C" fn process_start(entry: usize) -> ! {
    // `entry` is the `fn()` stored by `X86Context::initial`
    let entry: fn() = unsafe { core::mem::transmute(entry) };
    cpu::enable_interrupts();
    entry();
    exit(0)
}
