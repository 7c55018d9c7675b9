//! Wait queues
//!
//! A [WaitQueue] is a FIFO of parked threads. [sleep] parks the calling thread
//! and [wakeup] moves parked threads back into the ready queue. Both [Lock] and
//! [CondVar] are built on top of this.
//!
//! [Lock]: crate::Lock
//! [CondVar]: crate::CondVar

use log::trace;
use shared::types::NotSend;

use crate::error::ThreadError;
use crate::interrupts::InterruptDisableGuard;
use crate::thread::{self, try_with_runtime, with_runtime, ThreadId, WaitQueueKey};

/// A queue of threads waiting for some event.
///
/// The queue itself lives in the runtime of the OS thread that created it and
/// this is only a handle to it.
///
/// # Panics
///
/// Dropping a wait queue that still has parked threads panics.
pub struct WaitQueue {
    key: WaitQueueKey,
    _not_send: NotSend,
}

impl WaitQueue {
    /// Registers a new, empty wait queue.
    ///
    /// # Panics
    ///
    /// if the runtime is not initialized
    pub fn new() -> Self {
        let _guard = InterruptDisableGuard::new();
        let key = with_runtime(|runtime| runtime.register_wait_queue());
        trace!("new wait queue {key:?}");
        Self {
            key,
            _not_send: NotSend,
        }
    }

    /// The number of parked threads
    pub fn len(&self) -> usize {
        let _guard = InterruptDisableGuard::new();
        try_with_runtime(|runtime| runtime.parked_count(self.key)).unwrap_or(0)
    }

    /// `true` if no thread is parked on this queue
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // parked threads still point at this queue
            return;
        }
        let _guard = InterruptDisableGuard::new();
        try_with_runtime(|runtime| runtime.unregister_wait_queue(self.key));
    }
}

/// Parks the calling thread on `queue` and runs the front of the ready queue.
///
/// Returns the id of the thread that was switched to, once the caller is woken
/// and scheduled again. Fails with [ThreadError::NoneReady] if no other thread
/// is ready, in which case the caller is not parked, and with
/// [ThreadError::Invalid] if `queue` belongs to a runtime that was shut down.
pub fn sleep(queue: &WaitQueue) -> Result<ThreadId, ThreadError> {
    thread::sleep_on(queue.key)
}

/// Moves the front parked thread, or every parked thread if `all` is set, into
/// the ready queue.
///
/// Never switches threads. Returns the number of threads woken.
pub fn wakeup(queue: &WaitQueue, all: bool) -> usize {
    let _guard = InterruptDisableGuard::new();
    let woken = with_runtime(|runtime| runtime.wakeup(queue.key, all));
    trace!("woke {woken} threads from {:?}", queue.key);
    woken
}
