//! Small building blocks shared by the uthread crates.
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
pub mod ring_queue;
pub mod types;

#[macro_export]
macro_rules! KiB {
    ($v:expr) => {
        $v * 1024
    };
}
