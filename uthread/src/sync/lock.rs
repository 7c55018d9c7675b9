//! A blocking mutual exclusion lock

use core::cell::Cell;

use log::trace;

use crate::interrupts::InterruptDisableGuard;
use crate::thread::{self, ThreadId};
use crate::wait_queue::{sleep, wakeup, WaitQueue};

/// A lock that parks threads while it is held by another thread.
///
/// The lock does not guard any data, it only orders threads. Use [Lock::lock]
/// to get a [LockGuard] that releases the lock when dropped.
///
/// Released locks wake every waiter. The waiters then compete for the lock
/// again in ready queue order.
pub struct Lock {
    waiters: WaitQueue,
    available: Cell<bool>,
    owner: Cell<Option<ThreadId>>,
}

impl Lock {
    /// Creates a new, available lock.
    ///
    /// # Panics
    ///
    /// if the runtime is not initialized
    pub fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
            available: Cell::new(true),
            owner: Cell::new(None),
        }
    }

    /// Takes the lock, sleeping until it is available.
    ///
    /// # Panics
    ///
    /// if the lock is held and no other thread is ready to run, since then
    /// nothing can ever release it.
    pub fn acquire(&self) {
        let _guard = InterruptDisableGuard::new();

        while !self.available.get() {
            if let Err(e) = sleep(&self.waiters) {
                panic!(
                    "deadlock: lock is held by thread {:?} and can not be released: {e}",
                    self.owner.get()
                );
            }
        }

        let current = thread::id();
        self.available.set(false);
        self.owner.set(Some(current));
        trace!("thread {current} acquired lock");
    }

    /// Releases the lock and wakes every waiter.
    ///
    /// # Panics
    ///
    /// if the caller does not hold the lock
    pub fn release(&self) {
        let _guard = InterruptDisableGuard::new();

        let current = thread::id();
        assert!(
            self.owner.get() == Some(current),
            "thread {current} released a lock held by {:?}",
            self.owner.get()
        );

        self.owner.set(None);
        self.available.set(true);
        wakeup(&self.waiters, true);
        trace!("thread {current} released lock");
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub fn lock(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }

    /// `true` if the calling thread holds this lock
    pub fn is_held_by_current(&self) -> bool {
        self.owner.get().is_some_and(|owner| owner == thread::id())
    }

    /// The thread holding the lock, if any
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner.get()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        assert!(
            self.available.get(),
            "destroying a lock held by thread {:?}",
            self.owner.get()
        );
    }
}

/// Holds a [Lock] until dropped
#[must_use]
pub struct LockGuard<'l> {
    lock: &'l Lock,
}

impl LockGuard<'_> {
    /// The lock held by this guard
    pub fn lock(&self) -> &Lock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
