//! The stack-switch primitive
//!
//! A suspended thread is nothing but a stack pointer. The callee-saved
//! registers of the thread live on its own stack, pushed by [switch] right
//! before the stack pointer is stored. Resuming a thread loads its stack
//! pointer, pops the registers and returns into the caller of the [switch]
//! that suspended it.
//!
//! Capture and transfer happen in the same asm routine. The call to [switch]
//! therefore returns exactly once per suspension, when some later [switch]
//! resumes it. That return carries a value chosen by the resuming side.
//!
//! A fresh stack is prepared by [Context::prepare] to look like a suspended
//! [switch] whose return address is an entry trampoline. The first switch to it
//! "returns" into the trampoline, which calls the entry function with the
//! transferred value.

use core::arch::naked_asm;

use static_assertions::assert_eq_size;

use super::stack::GuardedStack;

/// Entry function of a fresh context.
///
/// It is called with the value passed to the [switch] that first activated the
/// context and must never return.
pub type EntryFn = extern "C" fn(usize) -> !;

/// The saved execution state of a suspended thread
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct Context {
    stack_pointer: usize,
}

assert_eq_size!(Context, usize);

/// The value handed to a context when it is resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumed(pub usize);

impl Context {
    /// A context that does not hold any state yet.
    ///
    /// It is filled in the first time the running thread is suspended.
    pub const fn empty() -> Self {
        Self { stack_pointer: 0 }
    }

    /// `true` if this context was never saved into or prepared
    pub fn is_empty(&self) -> bool {
        self.stack_pointer == 0
    }

    /// Prepares a context that starts executing `entry` on `stack`.
    pub fn prepare(stack: &GuardedStack, entry: EntryFn) -> Self {
        let top = stack.top() & !0xf;
        let frame = arch::initial_frame(entry);
        let frame_size = frame.len() * size_of::<usize>();
        let stack_pointer = top - frame_size;

        assert!(stack.contains(stack_pointer), "stack too small for entry frame");
        debug_assert!(stack_pointer % 16 == 0);

        unsafe {
            // Safety: the frame lies within the mapped part of `stack`
            core::ptr::copy_nonoverlapping(
                frame.as_ptr(),
                stack_pointer as *mut usize,
                frame.len(),
            );
        }

        Self { stack_pointer }
    }
}

/// Suspends the running thread into `save` and resumes `load`.
///
/// Returns once the saved context is resumed by another call to [switch], with
/// the value passed there.
///
/// # Safety
///
/// * `save` must be valid for writes
/// * `load` must be a context that was saved by [switch] and not resumed since,
///   or one created by [Context::prepare] and never resumed. `save` and `load`
///   may be the same context.
/// * the stack of `load` must still be mapped
pub unsafe fn switch(save: *mut Context, load: *const Context, value: usize) -> Resumed {
    let resumed = unsafe {
        // Safety: see function safety section
        switch_stacks(save, load, value)
    };
    Resumed(resumed)
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use super::EntryFn;
    use core::arch::naked_asm;

    /// default MXCSR (all exceptions masked) and x87 control word
    const FP_CONTROL: usize = 0x1f80 | (0x037f << 32);

    /// The frame [super::switch_stacks] pops when resuming a fresh context.
    ///
    /// `fp control, r15, r14, r13, r12, rbx, rbp, return address`
    pub fn initial_frame(entry: EntryFn) -> [usize; 8] {
        [
            FP_CONTROL,
            0,
            0,
            0,
            entry as *const () as usize,
            0,
            0,
            trampoline as *const () as usize,
        ]
    }

    /// First code executed on a fresh stack.
    ///
    /// `rax` holds the value passed to the activating switch and `r12` the
    /// entry function. The stack pointer is 16 byte aligned here, so the call
    /// enters the entry function with the alignment the ABI expects.
    #[unsafe(naked)]
    unsafe extern "C" fn trampoline() -> ! {
        naked_asm!(
            "mov rdi, rax",
            "call r12",
            // entry functions never return
            "ud2",
        )
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use super::EntryFn;
    use core::arch::naked_asm;

    /// The frame [super::switch_stacks] pops when resuming a fresh context.
    ///
    /// `x19..=x28, x29, x30, d8..=d15`
    pub fn initial_frame(entry: EntryFn) -> [usize; 20] {
        let mut frame = [0; 20];
        frame[0] = entry as *const () as usize;
        frame[11] = trampoline as *const () as usize;
        frame
    }

    /// First code executed on a fresh stack.
    ///
    /// `x0` holds the value passed to the activating switch and `x19` the entry
    /// function.
    #[unsafe(naked)]
    unsafe extern "C" fn trampoline() -> ! {
        naked_asm!(
            "blr x19",
            // entry functions never return
            "brk #1",
        )
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uthread only supports x86_64 and aarch64");

/// Saves the callee-saved registers and stack pointer into `save`, loads them
/// from `load` and returns `value` on the loaded stack.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn switch_stacks(
    save: *mut Context,
    load: *const Context,
    value: usize,
) -> usize {
    naked_asm!(
        // save callee-saved state of the current thread
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr dword ptr [rsp]",
        "fnstcw word ptr [rsp + 4]",
        "mov [rdi], rsp",
        // restore the target thread
        "mov rsp, [rsi]",
        "ldmxcsr dword ptr [rsp]",
        "fldcw word ptr [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "mov rax, rdx",
        "ret",
    )
}

/// Saves the callee-saved registers and stack pointer into `save`, loads them
/// from `load` and returns `value` on the loaded stack.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn switch_stacks(
    save: *mut Context,
    load: *const Context,
    value: usize,
) -> usize {
    naked_asm!(
        // save callee-saved state of the current thread
        "sub sp, sp, #0xa0",
        "stp x19, x20, [sp, #0x00]",
        "stp x21, x22, [sp, #0x10]",
        "stp x23, x24, [sp, #0x20]",
        "stp x25, x26, [sp, #0x30]",
        "stp x27, x28, [sp, #0x40]",
        "stp x29, x30, [sp, #0x50]",
        "stp d8, d9, [sp, #0x60]",
        "stp d10, d11, [sp, #0x70]",
        "stp d12, d13, [sp, #0x80]",
        "stp d14, d15, [sp, #0x90]",
        "mov x9, sp",
        "str x9, [x0]",
        // restore the target thread
        "ldr x9, [x1]",
        "mov sp, x9",
        "ldp x19, x20, [sp, #0x00]",
        "ldp x21, x22, [sp, #0x10]",
        "ldp x23, x24, [sp, #0x20]",
        "ldp x25, x26, [sp, #0x30]",
        "ldp x27, x28, [sp, #0x40]",
        "ldp x29, x30, [sp, #0x50]",
        "ldp d8, d9, [sp, #0x60]",
        "ldp d10, d11, [sp, #0x70]",
        "ldp d12, d13, [sp, #0x80]",
        "ldp d14, d15, [sp, #0x90]",
        "add sp, sp, #0xa0",
        "mov x0, x2",
        "ret",
    )
}
