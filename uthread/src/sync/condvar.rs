//! Condition variables with Mesa semantics

use log::trace;

use crate::interrupts::InterruptDisableGuard;
use crate::sync::Lock;
use crate::thread;
use crate::wait_queue::{sleep, wakeup, WaitQueue};

/// A condition variable.
///
/// A signaled thread is only made ready. By the time it holds the lock again
/// the condition may no longer hold, so waits belong in a loop:
///
/// ```no_run
/// # use uthread::{CondVar, Lock};
/// # fn example(lock: &Lock, cv: &CondVar, ready: impl Fn() -> bool) {
/// lock.acquire();
/// while !ready() {
///     cv.wait(lock);
/// }
/// lock.release();
/// # }
/// ```
pub struct CondVar {
    waiters: WaitQueue,
}

impl CondVar {
    /// Creates a condition variable without waiters.
    ///
    /// # Panics
    ///
    /// if the runtime is not initialized
    pub fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Releases `lock`, sleeps until signaled and acquires `lock` again.
    ///
    /// # Panics
    ///
    /// if the caller does not hold `lock`, or if no other thread is ready to
    /// run after the lock is released.
    pub fn wait(&self, lock: &Lock) {
        let _guard = InterruptDisableGuard::new();
        assert!(
            lock.is_held_by_current(),
            "thread {} waits on a condition variable without holding the lock",
            thread::id()
        );

        lock.release();
        if let Err(e) = sleep(&self.waiters) {
            panic!("deadlock: no thread left to signal the condition variable: {e}");
        }
        lock.acquire();
    }

    /// Wakes the longest waiting thread and returns the number of threads woken.
    ///
    /// # Panics
    ///
    /// if the caller does not hold `lock`
    pub fn signal(&self, lock: &Lock) -> usize {
        self.notify(lock, false)
    }

    /// Wakes every waiting thread and returns how many there were.
    ///
    /// # Panics
    ///
    /// if the caller does not hold `lock`
    pub fn broadcast(&self, lock: &Lock) -> usize {
        self.notify(lock, true)
    }

    fn notify(&self, lock: &Lock, all: bool) -> usize {
        let _guard = InterruptDisableGuard::new();
        assert!(
            lock.is_held_by_current(),
            "thread {} signals a condition variable without holding the lock",
            thread::id()
        );
        let woken = wakeup(&self.waiters, all);
        trace!("condition variable woke {woken} threads");
        woken
    }

    /// The number of threads waiting
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CondVar {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let waiting = self.waiter_count();
        assert!(
            waiting == 0,
            "destroying a condition variable with {waiting} waiting threads"
        );
    }
}
