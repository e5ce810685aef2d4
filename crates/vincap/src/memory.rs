// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::Error;
use dma_buf::DmaBuf;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use std::{
    alloc::{self, Layout},
    ffi::c_void,
    fmt,
    num::NonZeroUsize,
    os::fd::{AsFd, FromRawFd, RawFd},
    ptr::NonNull,
    slice,
};

/// System page size, 4 KiB if sysconf cannot tell.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory safety requirements.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
}

/// Rounds `size` up to a multiple of the page size.
pub fn page_align(size: usize) -> usize {
    let page = page_size();
    (size + page - 1) / page * page
}

/// A shared read/write memory mapping, unmapped on drop.
pub struct MappedRegion {
    ptr: NonNull<c_void>,
    len: usize,
}

// SAFETY: the region is plain memory owned exclusively by this value.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` starting at `offset`.
    pub fn map<F: AsFd>(fd: F, offset: i64, len: usize) -> Result<MappedRegion, Error> {
        let length = NonZeroUsize::new(len).ok_or(Error::AllocationFailed { size: len })?;
        // SAFETY: a fresh mapping chosen by the kernel aliases no Rust memory.
        let ptr = unsafe {
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset,
            )
        }
        .map_err(Error::device("mmap"))?;
        Ok(MappedRegion { ptr, len })
    }

    /// Private anonymous mapping, zero filled.
    pub fn anonymous(len: usize) -> Result<MappedRegion, Error> {
        let length = NonZeroUsize::new(len).ok_or(Error::AllocationFailed { size: len })?;
        // SAFETY: as for `map`, the kernel picks an unused address.
        let ptr = unsafe {
            mman::mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        }
        .map_err(Error::device("mmap"))?;
        Ok(MappedRegion { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr().cast()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is valid for `len` bytes until drop.
        unsafe { slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a mapping created by this value.
        if let Err(err) = unsafe { mman::munmap(self.ptr, self.len) } {
            log::warn!("munmap of {} bytes failed: {}", self.len, err);
        }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MappedRegion({:p}, {})", self.ptr, self.len)
    }
}

/// Heap memory with a caller chosen alignment, used for USERPTR and read()
/// buffers.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is owned exclusively by this value.
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `size` zeroed bytes aligned to `align`.
    pub fn new(size: usize, align: usize) -> Result<AlignedBuffer, Error> {
        let layout = Layout::from_size_align(size, align)
            .ok()
            .filter(|l| l.size() > 0)
            .ok_or(Error::AllocationFailed { size })?;
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::AllocationFailed { size })?;
        Ok(AlignedBuffer { ptr, layout })
    }

    /// Page aligned allocation rounded up to whole pages.
    pub fn page_aligned(size: usize) -> Result<AlignedBuffer, Error> {
        AlignedBuffer::new(page_align(size), page_size())
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Address handed to the driver for USERPTR I/O.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: allocated with `layout.size()` initialised bytes.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above with exclusive access through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AlignedBuffer({:#x}, {})", self.addr(), self.len())
    }
}

/// An owned DMA buffer file descriptor shared between the display and the
/// capture device. The descriptor is closed when the handle is dropped.
pub struct DmaBufHandle {
    raw_fd: RawFd,
    length: usize,
    dmabuf: DmaBuf,
}

impl DmaBufHandle {
    /// Takes ownership of `fd`.
    ///
    /// # Safety
    ///
    /// `fd` must be an open DMA buffer descriptor not owned by anything else.
    pub unsafe fn from_raw_fd(fd: RawFd, length: usize) -> DmaBufHandle {
        DmaBufHandle {
            raw_fd: fd,
            length,
            // SAFETY: ownership of the descriptor is transferred by the caller.
            dmabuf: unsafe { DmaBuf::from_raw_fd(fd) },
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn dmabuf(&self) -> &DmaBuf {
        &self.dmabuf
    }
}

impl fmt::Debug for DmaBufHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DmaBufHandle(fd:{}, {})", self.raw_fd, self.length)
    }
}
