//! Thread stacks
//!
//! Each thread stack is its own anonymous mapping. The lowest page can be
//! mapped inaccessible, so a stack overflow faults instead of silently
//! overwriting whatever lies below.

use core::ffi::c_void;
use core::num::NonZeroUsize;
use core::ptr::NonNull;

use log::{error, trace};
use nix::sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};

/// Fallback if the page size can not be queried
const DEFAULT_PAGE_SIZE: usize = 4096;

/// the page size of the system
pub fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// A stack mapping with an optional guard page at its low end
#[derive(Debug)]
pub struct GuardedStack {
    /// start of the whole mapping, including the guard page
    mapping: NonNull<c_void>,
    /// length of the whole mapping
    len: usize,
    /// length of the guard region at the start of the mapping
    guard_len: usize,
}

impl GuardedStack {
    /// Maps a new stack with at least `size` usable bytes.
    pub fn allocate(size: usize, guard: bool) -> nix::Result<Self> {
        let page_size = page_size();
        let usable = size
            .checked_next_multiple_of(page_size)
            .ok_or(nix::Error::ENOMEM)?;
        let guard_len = if guard { page_size } else { 0 };
        let len = usable.checked_add(guard_len).ok_or(nix::Error::ENOMEM)?;
        let length = NonZeroUsize::new(len).ok_or(nix::Error::EINVAL)?;

        let mapping = unsafe {
            // Safety: anonymous private mapping at an address of the kernels choosing
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )?
        };

        let stack = Self {
            mapping,
            len,
            guard_len,
        };

        if guard {
            unsafe {
                // Safety: the guard page is the start of our own mapping
                // and nothing points into it yet
                mprotect(mapping, guard_len, ProtFlags::PROT_NONE)?;
            }
        }

        trace!("mapped stack {:#x} - {:#x}", stack.bottom(), stack.top());

        Ok(stack)
    }

    /// The lowest usable address
    pub fn bottom(&self) -> usize {
        self.mapping.as_ptr() as usize + self.guard_len
    }

    /// One past the highest usable address. Stacks grow down from here.
    pub fn top(&self) -> usize {
        self.mapping.as_ptr() as usize + self.len
    }

    /// The usable size in bytes
    pub fn size(&self) -> usize {
        self.len - self.guard_len
    }

    /// `true` if the stack has a guard page
    pub fn has_guard(&self) -> bool {
        self.guard_len != 0
    }

    /// `true` if `addr` points into the usable part of the stack
    pub fn contains(&self, addr: usize) -> bool {
        (self.bottom()..self.top()).contains(&addr)
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        let marker = 0u8;
        debug_assert!(
            !self.contains(&marker as *const u8 as usize),
            "trying to unmap the stack that is currently in use"
        );
        trace!("unmapping stack {:#x} - {:#x}", self.bottom(), self.top());

        unsafe {
            // Safety: mapping and len describe our own mapping, which is no
            // longer in use
            if let Err(e) = munmap(self.mapping, self.len) {
                error!(
                    "Failed to unmap stack {:#x} - {:#x}. Leaking memory\n{e}",
                    self.bottom(),
                    self.top()
                );
            }
        }
    }
}
