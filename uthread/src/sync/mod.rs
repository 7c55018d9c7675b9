//! Blocking synchronization primitives for threads of one runtime
//!
//! Neither primitive is `Send`. They only synchronize threads that share the
//! runtime they were created in.

mod condvar;
mod lock;

pub use condvar::CondVar;
pub use lock::{Lock, LockGuard};
