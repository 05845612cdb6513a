// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;

use log::warn;
use nix::errno::Errno;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

/// A shared read-write mapping of one device buffer plane.
///
/// The region is unmapped exactly once, when the value is dropped.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The mapping is plain memory owned by this value; access goes through
// `&`/`&mut` borrows.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` at `offset`.
    pub fn new(fd: BorrowedFd<'_>, offset: u32, len: usize) -> Result<Self, Errno> {
        let length = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;
        // SAFETY: a fresh mapping chosen by the kernel (no address hint)
        // cannot alias existing Rust memory.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )?
        };
        let ptr = ptr.cast::<u8>();
        Ok(MappedRegion { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping until drop
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[u8]> for MappedRegion {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe a live mapping until drop, and the
        // exclusive borrow of self prevents aliasing through this value
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: the region was returned by mmap with this length and is
        // unmapped only here
        if let Err(errno) = unsafe { munmap(self.ptr.cast(), self.len) } {
            warn!("munmap of {} bytes failed: {}", self.len, errno);
        }
    }
}
