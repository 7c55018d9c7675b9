//! Timer preemption
//!
//! A POSIX interval timer sends [PREEMPT_SIGNAL] to the OS thread hosting the
//! runtime. The handler yields to the next ready thread. The signal is only
//! delivered while the interrupt gate is open, which means the handler never
//! runs in the middle of a scheduler operation.
//!
//! Code that runs with the gate open can be interrupted at any instruction.
//! That includes the allocator and stdio, which take process wide locks.
//! Wrap such calls in an [InterruptDisableGuard] when preemption is enabled.

use core::time::Duration;

use crate::interrupts::PREEMPT_SIGNAL;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use timer::Preemption;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod timer {
    use super::*;

    use log::{info, warn};
    use nix::sys::signal::{
        sigaction, SaFlags, SigAction, SigEvent, SigHandler, SigSet, SigevNotify,
    };
    use nix::sys::time::TimeSpec;
    use nix::sys::timer::{Expiration, Timer, TimerSetTimeFlags};
    use nix::time::ClockId;
    use nix::unistd::gettid;

    use crate::interrupts::InterruptDisableGuard;
    use crate::thread::{is_initialized, yield_to, Target};

    extern "C" fn on_preempt(_signal: nix::libc::c_int) {
        if !is_initialized() {
            return;
        }
        // nothing else ready is fine, the current thread just keeps running
        let _ = yield_to(Target::Any);
    }

    /// The preemption timer of a runtime.
    ///
    /// Dropping it stops the timer and restores the previous signal action.
    pub struct Preemption {
        /// `None` once the timer is deleted
        timer: Option<Timer>,
        previous: SigAction,
        interval: Duration,
    }

    impl Preemption {
        /// Installs the signal handler and starts the timer.
        ///
        /// The interrupt gate should be closed, otherwise the first tick can
        /// arrive before this returns.
        pub fn start(interval: Duration) -> nix::Result<Self> {
            let action = SigAction::new(
                SigHandler::Handler(on_preempt),
                SaFlags::SA_RESTART,
                SigSet::empty(),
            );
            let previous = unsafe {
                // Safety: the handler only touches the runtime through the
                // interrupt gate, which is closed for every scheduler operation
                sigaction(PREEMPT_SIGNAL, &action)?
            };

            let timer = Self::start_timer(interval).inspect_err(|_| unsafe {
                // Safety: reinstalls the action that was active before
                let _ = sigaction(PREEMPT_SIGNAL, &previous);
            })?;

            info!("preemption enabled, interval {interval:?}");

            Ok(Self {
                timer: Some(timer),
                previous,
                interval,
            })
        }

        fn start_timer(interval: Duration) -> nix::Result<Timer> {
            let event = SigEvent::new(SigevNotify::SigevThreadId {
                signal: PREEMPT_SIGNAL,
                thread_id: gettid().as_raw(),
                si_value: 0,
            });
            let mut timer = Timer::new(ClockId::CLOCK_MONOTONIC, event)?;
            timer.set(
                Expiration::Interval(TimeSpec::from_duration(interval)),
                TimerSetTimeFlags::empty(),
            )?;
            Ok(timer)
        }
    }

    impl Drop for Preemption {
        fn drop(&mut self) {
            let _guard = InterruptDisableGuard::new();

            // deleting the timer disarms it
            drop(self.timer.take());

            let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
            unsafe {
                // Safety: ignoring discards a tick that is already pending, then
                // the previous action is reinstalled
                if let Err(e) = sigaction(PREEMPT_SIGNAL, &ignore) {
                    warn!("failed to discard pending preemption signal: {e}");
                }
                if let Err(e) = sigaction(PREEMPT_SIGNAL, &self.previous) {
                    warn!("failed to restore signal action: {e}");
                }
            }

            info!("preemption with interval {:?} disabled", self.interval);
        }
    }
}

/// Timer preemption is only available on linux
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub struct Preemption;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl Preemption {
    pub fn start(_interval: Duration) -> nix::Result<Self> {
        log::warn!("preemption requested, but not supported on this platform");
        Err(nix::Error::ENOTSUP)
    }
}
