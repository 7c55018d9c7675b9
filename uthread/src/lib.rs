//! User level green threads
//!
//! `uthread` multiplexes many threads onto a single OS thread. Each thread has
//! its own stack and is only switched out at a suspension point: [yield_to],
//! [exit], [sleep] and the primitives built on it, [Lock] and [CondVar]. With
//! [RuntimeConfig::preempt_interval] set, a timer additionally preempts the
//! running thread.
//!
//! Scheduling is strict FIFO rotation through a single ready queue.
//!
//! ```no_run
//! use uthread::{RuntimeConfig, Target};
//!
//! uthread::init(RuntimeConfig::default()).unwrap();
//! for i in 0..3 {
//!     uthread::create(move || {
//!         for _ in 0..2 {
//!             println!("thread {i} on {}", uthread::id());
//!             uthread::yield_now().unwrap();
//!         }
//!     })
//!     .unwrap();
//! }
//! while uthread::yield_to(Target::Any).is_ok() {}
//! uthread::shutdown().unwrap();
//! ```
//!
//! Usage errors, like releasing a [Lock] held by another thread, are not
//! reported as errors but panic.

pub mod config;
pub mod error;
pub mod interrupts;
mod preempt;
pub mod sync;
mod thread;
mod wait_queue;

pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use error::{InitError, ThreadError};
pub use interrupts::InterruptDisableGuard;
pub use sync::{CondVar, Lock, LockGuard};
pub use thread::{
    create, exit, id, init, is_alive, is_initialized, kill, page_size, ready_threads, shutdown,
    yield_now, yield_to, Target, ThreadId,
};
pub use wait_queue::{sleep, wakeup, WaitQueue};
