//! The interrupt gate
//!
//! Scheduler state is only ever touched by one OS thread, but a preemption
//! tick can arrive at any instruction. The "interrupt" is the
//! [PREEMPT_SIGNAL] and the gate is whether that signal is blocked in the
//! signal mask of the current OS thread. Every scheduler operation runs with
//! the gate closed, which makes it atomic with respect to preemption.
//!
//! Use [InterruptDisableGuard] rather than [disable] and [restore] directly.

use log::error;
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use shared::types::NotSend;

/// The signal used to preempt the running thread
pub const PREEMPT_SIGNAL: Signal = Signal::SIGALRM;

fn preempt_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(PREEMPT_SIGNAL);
    set
}

fn set_mask(how: SigmaskHow, old: Option<&mut SigSet>) {
    if let Err(e) = pthread_sigmask(how, Some(&preempt_set()), old) {
        error!("failed to update signal mask: {e}");
        panic!("interrupt gate is broken: {e}");
    }
}

/// Closes the gate and returns whether it was open before.
pub fn disable() -> bool {
    let mut old = SigSet::empty();
    set_mask(SigmaskHow::SIG_BLOCK, Some(&mut old));
    !old.contains(PREEMPT_SIGNAL)
}

/// Opens the gate.
///
/// Prefer [restore] with a state returned by [disable]. This exists for the
/// start of a new thread, which inherits a closed gate from the thread that
/// switched to it.
pub fn enable() {
    set_mask(SigmaskHow::SIG_UNBLOCK, None);
}

/// Reinstates a gate state previously returned by [disable].
pub fn restore(enabled: bool) {
    if enabled {
        set_mask(SigmaskHow::SIG_UNBLOCK, None);
    } else {
        set_mask(SigmaskHow::SIG_BLOCK, None);
    }
}

/// returns `true` if preemption can currently interrupt the running thread
pub fn interrupts_enabled() -> bool {
    let mut current = SigSet::empty();
    if let Err(e) = pthread_sigmask(SigmaskHow::SIG_BLOCK, None, Some(&mut current)) {
        panic!("failed to read signal mask: {e}");
    }
    !current.contains(PREEMPT_SIGNAL)
}

/// Closes the interrupt gate while alive.
///
/// On drop the gate is set back to exactly the state it had when the guard was
/// created, so guards nest. A guard is held across a context switch: the
/// switched-out thread keeps its guard on its own stack and restores its own
/// state once it is resumed.
#[must_use]
pub struct InterruptDisableGuard {
    was_enabled: bool,
    _not_send: NotSend,
}

impl InterruptDisableGuard {
    /// closes the gate
    pub fn new() -> Self {
        Self {
            was_enabled: disable(),
            _not_send: NotSend,
        }
    }

    /// whether the gate was open when this guard was created
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl Default for InterruptDisableGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptDisableGuard {
    fn drop(&mut self) {
        restore(self.was_enabled);
    }
}
