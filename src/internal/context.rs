//! Saved machine state and the switch between two processes.
//!
//! The scheduler only ever sees [`SavedContext`] and the [`MachineContext`]
//! trait; the register layout behind them belongs to the architecture.

/// Where a suspended process left its stack. The registers themselves are
/// pushed onto that stack by the switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SavedContext {
    /// saved stack pointer
    pub stack_pointer: usize,
    /// saved frame pointer
    pub frame_pointer: usize,
}

/// Architecture hooks used by the scheduler
pub trait MachineContext {
    /// Lay out a fresh stack so that the first switch to it starts `entry`
    /// with interrupts enabled.
    ///
    /// # Safety
    /// `stack_top` must be the end of writable memory owned by the new
    /// process and large enough for the initial frame.
    unsafe fn initial(stack_top: usize, entry: fn()) -> SavedContext;

    /// Save the running state into `from` and resume the state in `to`.
    /// Returns when something switches back to `from`.
    ///
    /// # Safety
    /// `to` must describe a stack prepared by [`MachineContext::initial`] or
    /// saved by an earlier switch, and both pointers must stay valid until
    /// the switch completes.
    unsafe fn switch(from: *mut SavedContext, to: *const SavedContext);
}

#[cfg(target_os = "none")]
pub use x86::X86Context;

#[cfg(target_os = "none")]
mod x86 {
    use core::arch::global_asm;

    use super::{MachineContext, SavedContext};

    /// IF set, plus the always-one reserved bit
    const INITIAL_RFLAGS: usize = 0x202;

    /// 14 general purpose registers, rflags, return address, alignment slot
    const INITIAL_FRAME_WORDS: usize = 17;

    /// index of rbx in the initial frame, carries the entry point
    const ENTRY_SLOT: usize = 12;

    unsafe extern "C" {
        fn coopos_switch_context(from: *mut SavedContext, to: *const SavedContext);
        fn coopos_process_trampoline();
    }

    // Saves rflags and the general purpose registers on the outgoing stack,
    // records rsp/rbp in `from`, then unwinds the same layout from `to`.
    global_asm!(
        r#"
        .global coopos_switch_context
    coopos_switch_context:
        pushfq
        push rax
        push rbx
        push rcx
        push rdx
        push rsi
        push rdi
        push r8
        push r9
        push r10
        push r11
        push r12
        push r13
        push r14
        push r15

        mov [rdi], rsp
        mov [rdi + 8], rbp
        mov rsp, [rsi]
        mov rbp, [rsi + 8]

        pop r15
        pop r14
        pop r13
        pop r12
        pop r11
        pop r10
        pop r9
        pop r8
        pop rdi
        pop rsi
        pop rdx
        pop rcx
        pop rbx
        pop rax
        popfq
        ret
    "#
    );

    // First instruction of every process: entry point arrives in rbx.
    global_asm!(
        r#"
        .global coopos_process_trampoline
    coopos_process_trampoline:
        mov rdi, rbx
        and rsp, -16
        call {start}
        ud2
    "#,
        start = sym crate::internal::process::process_start,
    );

    /// x86_64 context switch
    pub struct X86Context;

    impl MachineContext for X86Context {
        unsafe fn initial(stack_top: usize, entry: fn()) -> SavedContext {
            let top = stack_top & !0xF;
            let frame = (top - INITIAL_FRAME_WORDS * 8) as *mut usize;
            unsafe {
                for slot in 0..INITIAL_FRAME_WORDS {
                    frame.add(slot).write(0);
                }
                frame.add(ENTRY_SLOT).write(entry as usize);
                frame.add(14).write(INITIAL_RFLAGS);
                frame.add(15).write(coopos_process_trampoline as usize);
            }
            SavedContext {
                stack_pointer: frame as usize,
                // a zero frame pointer ends backtraces at the trampoline
                frame_pointer: 0,
            }
        }

        unsafe fn switch(from: *mut SavedContext, to: *const SavedContext) {
            unsafe { coopos_switch_context(from, to) }
        }
    }
}
