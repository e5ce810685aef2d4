// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capture buffer allocation.
//!
//! A [`Strategy`] knows how one I/O method obtains its buffers and how a
//! completed buffer returned by the driver maps back to a pool entry. The
//! strategy is chosen once when the session is assembled; everything after
//! that works on the uniform [`CaptureBuffer`] list held by [`BufferPool`].

use crate::{
    memory::{AlignedBuffer, DmaBufHandle, MappedRegion},
    v4l2::{CaptureDevice, DequeuedBuffer, QueueTarget},
    BufferError, Error, Memory,
};
use std::fmt;

/// Buffers requested for MMAP capture without a DRM display.
pub const DEFAULT_BUFFERS: u32 = 4;

/// Buffers requested for MMAP capture feeding the ping-pong presenter.
pub const PINGPONG_BUFFERS: u32 = 2;

/// Fixed size of the USERPTR pool.
pub const USERPTR_BUFFERS: u32 = 4;

/// Fewest buffers a streaming pool can run with.
pub const MIN_BUFFERS: u32 = 2;

/// Which side currently owns a capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Queued, the driver may write into it.
    Driver,
    /// Dequeued or never queued, safe to read.
    Application,
}

/// Memory behind a capture buffer.
pub enum Backing {
    Mapped(MappedRegion),
    UserPtr(AlignedBuffer),
    DmaBuf(DmaBufHandle),
    Read(AlignedBuffer),
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Backing::Mapped(region) => write!(f, "Mapped({:?})", region),
            Backing::UserPtr(buf) => write!(f, "UserPtr({:?})", buf),
            Backing::DmaBuf(handle) => write!(f, "DmaBuf({:?})", handle),
            Backing::Read(buf) => write!(f, "Read({:?})", buf),
        }
    }
}

/// One buffer of the capture pool.
#[derive(Debug)]
pub struct CaptureBuffer {
    index: u32,
    length: u32,
    backing: Backing,
    owner: Owner,
}

impl CaptureBuffer {
    pub fn new(index: u32, length: u32, backing: Backing) -> CaptureBuffer {
        CaptureBuffer {
            index,
            length,
            backing,
            owner: Owner::Application,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    pub fn memory(&self) -> Memory {
        match self.backing {
            Backing::Mapped(_) => Memory::Mmap,
            Backing::UserPtr(_) => Memory::UserPtr,
            Backing::DmaBuf(_) => Memory::DmaBuf,
            Backing::Read(_) => Memory::Read,
        }
    }

    /// CPU view of the buffer. DMA buffers are not mapped and return `None`.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Mapped(region) => Some(region.as_slice()),
            Backing::UserPtr(buf) | Backing::Read(buf) => Some(buf.as_slice()),
            Backing::DmaBuf(_) => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.backing {
            Backing::Mapped(region) => Some(region.as_mut_slice()),
            Backing::UserPtr(buf) | Backing::Read(buf) => Some(buf.as_mut_slice()),
            Backing::DmaBuf(_) => None,
        }
    }

    pub fn dmabuf(&self) -> Option<&DmaBufHandle> {
        match &self.backing {
            Backing::DmaBuf(handle) => Some(handle),
            _ => None,
        }
    }

    /// What to hand the driver when queueing this buffer, `None` for read().
    pub fn target(&self) -> Option<QueueTarget> {
        let index = self.index;
        match &self.backing {
            Backing::Mapped(_) => Some(QueueTarget::Mmap { index }),
            Backing::UserPtr(buf) => Some(QueueTarget::UserPtr {
                index,
                ptr: buf.addr(),
                length: self.length,
            }),
            Backing::DmaBuf(handle) => Some(QueueTarget::DmaBuf {
                index,
                fd: handle.raw_fd(),
            }),
            Backing::Read(_) => None,
        }
    }
}

/// How one I/O method acquires buffers and identifies completed ones.
pub trait Strategy {
    fn memory(&self) -> Memory;

    /// Negotiates with the driver and allocates the pool.
    fn prepare(&mut self, device: &mut dyn CaptureDevice) -> Result<Vec<CaptureBuffer>, Error>;

    /// Resolves a completed buffer to its position in `buffers`.
    fn locate(&self, buffers: &[CaptureBuffer], done: &DequeuedBuffer) -> Result<usize, Error> {
        let pos = usize::try_from(done.index)?;
        if pos >= buffers.len() {
            return Err(BufferError::IndexOutOfRange {
                index: done.index,
                count: buffers.len(),
            }
            .into());
        }
        Ok(pos)
    }
}

fn check_granted(requested: u32, granted: u32) -> Result<(), Error> {
    if granted < MIN_BUFFERS {
        return Err(Error::InsufficientBuffers { requested, granted });
    }
    if granted != requested {
        log::info!("driver granted {} of {} buffers", granted, requested);
    }
    Ok(())
}

/// Driver allocated buffers mapped into the process.
#[derive(Debug)]
pub struct MmapStrategy {
    count: u32,
}

impl MmapStrategy {
    pub fn new(count: u32) -> MmapStrategy {
        MmapStrategy { count }
    }
}

impl Strategy for MmapStrategy {
    fn memory(&self) -> Memory {
        Memory::Mmap
    }

    fn prepare(&mut self, device: &mut dyn CaptureDevice) -> Result<Vec<CaptureBuffer>, Error> {
        let granted = device.request_buffers(Memory::Mmap, self.count)?;
        check_granted(self.count, granted)?;
        (0..granted)
            .map(|index| -> Result<CaptureBuffer, Error> {
                let info = device.query_buffer(Memory::Mmap, index)?;
                let region = device.map_buffer(&info)?;
                log::debug!("mapped buffer {} length {}", index, info.length);
                Ok(CaptureBuffer::new(index, info.length, Backing::Mapped(region)))
            })
            .collect()
    }
}

/// Page aligned process memory handed to the driver by address.
#[derive(Debug)]
pub struct UserPtrStrategy {
    image_size: u32,
}

impl UserPtrStrategy {
    pub fn new(image_size: u32) -> UserPtrStrategy {
        UserPtrStrategy { image_size }
    }
}

impl Strategy for UserPtrStrategy {
    fn memory(&self) -> Memory {
        Memory::UserPtr
    }

    fn prepare(&mut self, device: &mut dyn CaptureDevice) -> Result<Vec<CaptureBuffer>, Error> {
        let granted = device.request_buffers(Memory::UserPtr, USERPTR_BUFFERS)?;
        check_granted(USERPTR_BUFFERS, granted)?;
        let size = usize::try_from(self.image_size)?;
        (0..granted.min(USERPTR_BUFFERS))
            .map(|index| -> Result<CaptureBuffer, Error> {
                let buf = AlignedBuffer::page_aligned(size)?;
                let length = u32::try_from(buf.len())?;
                Ok(CaptureBuffer::new(index, length, Backing::UserPtr(buf)))
            })
            .collect()
    }

    /// The driver reports USERPTR completions by address, so the index is
    /// recovered from the pointer and length.
    fn locate(&self, buffers: &[CaptureBuffer], done: &DequeuedBuffer) -> Result<usize, Error> {
        buffers
            .iter()
            .position(|buf| {
                matches!(buf.target(), Some(QueueTarget::UserPtr { ptr, length, .. })
                    if ptr == done.userptr && length == done.length)
            })
            .ok_or_else(|| {
                BufferError::UnknownUserPtr {
                    ptr: done.userptr,
                    length: usize::try_from(done.length).unwrap_or(usize::MAX),
                }
                .into()
            })
    }
}

/// Buffers exported by another device, typically the DRM display.
#[derive(Debug)]
pub struct DmaBufStrategy {
    handles: Vec<DmaBufHandle>,
}

impl DmaBufStrategy {
    pub fn new(handles: Vec<DmaBufHandle>) -> DmaBufStrategy {
        DmaBufStrategy { handles }
    }
}

impl Strategy for DmaBufStrategy {
    fn memory(&self) -> Memory {
        Memory::DmaBuf
    }

    fn prepare(&mut self, device: &mut dyn CaptureDevice) -> Result<Vec<CaptureBuffer>, Error> {
        let requested = u32::try_from(self.handles.len())?;
        let granted = device.request_buffers(Memory::DmaBuf, requested)?;
        check_granted(requested, granted)?;
        let handles = std::mem::take(&mut self.handles);
        handles
            .into_iter()
            .take(usize::try_from(granted)?)
            .zip(0..)
            .map(|(handle, index)| -> Result<CaptureBuffer, Error> {
                let info = device.query_buffer(Memory::DmaBuf, index)?;
                let length = u32::try_from(handle.len())?;
                if info.length > length {
                    log::warn!(
                        "buffer {} needs {} bytes, dma buffer has {}",
                        index,
                        info.length,
                        length
                    );
                }
                Ok(CaptureBuffer::new(index, length, Backing::DmaBuf(handle)))
            })
            .collect()
    }
}

/// A single process buffer filled with read(2).
#[derive(Debug)]
pub struct ReadStrategy {
    image_size: u32,
}

impl ReadStrategy {
    pub fn new(image_size: u32) -> ReadStrategy {
        ReadStrategy { image_size }
    }
}

impl Strategy for ReadStrategy {
    fn memory(&self) -> Memory {
        Memory::Read
    }

    fn prepare(&mut self, _device: &mut dyn CaptureDevice) -> Result<Vec<CaptureBuffer>, Error> {
        let buf = AlignedBuffer::new(
            usize::try_from(self.image_size)?,
            crate::memory::page_size(),
        )?;
        Ok(vec![CaptureBuffer::new(
            0,
            self.image_size,
            Backing::Read(buf),
        )])
    }
}

/// The capture buffers of one session.
pub struct BufferPool {
    strategy: Box<dyn Strategy>,
    buffers: Vec<CaptureBuffer>,
    image_size: u32,
}

impl BufferPool {
    /// Allocates buffers with `strategy`.
    ///
    /// For MMAP the mapped length reported by the driver becomes the frame
    /// size; the other methods keep the negotiated image size.
    pub fn prepare(
        mut strategy: Box<dyn Strategy>,
        device: &mut dyn CaptureDevice,
    ) -> Result<BufferPool, Error> {
        let buffers = strategy.prepare(device)?;
        let negotiated = device.format().image_size;
        let image_size = match (strategy.memory(), buffers.first()) {
            (Memory::Mmap, Some(first)) => first.length(),
            _ => negotiated,
        };
        log::info!(
            "{} pool ready: {} buffers, frame size {}",
            strategy.memory(),
            buffers.len(),
            image_size
        );
        Ok(BufferPool {
            strategy,
            buffers,
            image_size,
        })
    }

    pub fn memory(&self) -> Memory {
        self.strategy.memory()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Size of one frame in bytes.
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn buffers(&self) -> &[CaptureBuffer] {
        &self.buffers
    }

    pub fn get(&self, index: u32) -> Result<&CaptureBuffer, Error> {
        let count = self.buffers.len();
        usize::try_from(index)
            .ok()
            .and_then(|pos| self.buffers.get(pos))
            .ok_or(Error::Buffer(BufferError::IndexOutOfRange { index, count }))
    }

    pub fn get_mut(&mut self, index: u32) -> Result<&mut CaptureBuffer, Error> {
        let count = self.buffers.len();
        usize::try_from(index)
            .ok()
            .and_then(|pos| self.buffers.get_mut(pos))
            .ok_or(Error::Buffer(BufferError::IndexOutOfRange { index, count }))
    }

    /// Index of the pool entry a completed buffer refers to.
    pub fn locate(&self, done: &DequeuedBuffer) -> Result<u32, Error> {
        let pos = self.strategy.locate(&self.buffers, done)?;
        Ok(self.buffers[pos].index())
    }

    /// Number of buffers currently owned by the driver.
    pub fn driver_owned(&self) -> usize {
        self.buffers
            .iter()
            .filter(|buf| buf.owner() == Owner::Driver)
            .count()
    }

    /// Frees every buffer and returns the driver side allocation.
    pub fn release(&mut self, device: &mut dyn CaptureDevice) -> Result<(), Error> {
        let had_buffers = !self.buffers.is_empty();
        self.buffers.clear();
        let memory = self.memory();
        if had_buffers && memory.is_streaming() {
            device.request_buffers(memory, 0)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("memory", &self.memory())
            .field("buffers", &self.buffers)
            .field("image_size", &self.image_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fourcc::PixelFormat,
        v4l2::{Format, SyntheticDevice},
    };
    use std::{fs::File, os::fd::IntoRawFd, time::Duration};

    fn device() -> SyntheticDevice {
        SyntheticDevice::new(Format::new(320, 240, PixelFormat::Yuyv)).unwrap()
    }

    fn done(index: u32, userptr: usize, length: u32) -> DequeuedBuffer {
        DequeuedBuffer {
            index,
            bytes_used: length,
            sequence: 0,
            timestamp: Duration::ZERO,
            userptr,
            length,
        }
    }

    #[test]
    fn test_mmap_pool() -> Result<(), Error> {
        let mut dev = device();
        let pool = BufferPool::prepare(Box::new(MmapStrategy::new(DEFAULT_BUFFERS)), &mut dev)?;
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.memory(), Memory::Mmap);
        assert_eq!(pool.image_size(), 320 * 240 * 2);
        for (i, buf) in pool.buffers().iter().enumerate() {
            assert_eq!(buf.index() as usize, i);
            assert_eq!(buf.owner(), Owner::Application);
            assert_eq!(buf.data().map(<[u8]>::len), Some(320 * 240 * 2));
        }
        Ok(())
    }

    #[test]
    fn test_mmap_uses_granted_count() -> Result<(), Error> {
        let mut dev = device().with_max_buffers(3);
        let pool = BufferPool::prepare(Box::new(MmapStrategy::new(DEFAULT_BUFFERS)), &mut dev)?;
        assert_eq!(pool.len(), 3);
        Ok(())
    }

    #[test]
    fn test_mmap_insufficient_buffers() {
        let mut dev = device().with_max_buffers(1);
        let err = BufferPool::prepare(Box::new(MmapStrategy::new(DEFAULT_BUFFERS)), &mut dev)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBuffers {
                requested: 4,
                granted: 1
            }
        ));
    }

    #[test]
    fn test_userptr_pool_is_page_aligned() -> Result<(), Error> {
        let mut dev = device();
        let pool = BufferPool::prepare(Box::new(UserPtrStrategy::new(1000)), &mut dev)?;
        let page = crate::memory::page_size();
        assert_eq!(pool.len(), USERPTR_BUFFERS as usize);
        for buf in pool.buffers() {
            assert_eq!(buf.length() as usize, page);
            match buf.target() {
                Some(QueueTarget::UserPtr { ptr, .. }) => assert_eq!(ptr % page, 0),
                other => panic!("unexpected target {:?}", other),
            }
        }
        Ok(())
    }

    #[test]
    fn test_userptr_locate_by_address() -> Result<(), Error> {
        let mut dev = device();
        let pool = BufferPool::prepare(
            Box::new(UserPtrStrategy::new(320 * 240 * 2)),
            &mut dev,
        )?;
        for k in 0..pool.len() {
            let Some(QueueTarget::UserPtr { ptr, length, .. }) = pool.buffers()[k].target()
            else {
                panic!("not a user pointer buffer");
            };
            // The reported index is ignored for USERPTR.
            assert_eq!(pool.locate(&done(0, ptr, length))?, k as u32);
        }
        let err = pool.locate(&done(0, 0x10, 4096)).unwrap_err();
        assert!(matches!(
            err,
            Error::Buffer(BufferError::UnknownUserPtr { ptr: 0x10, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_index_locate_bounds() -> Result<(), Error> {
        let mut dev = device();
        let pool = BufferPool::prepare(Box::new(MmapStrategy::new(2)), &mut dev)?;
        assert_eq!(pool.locate(&done(1, 0, 0))?, 1);
        assert!(matches!(
            pool.locate(&done(2, 0, 0)),
            Err(Error::Buffer(BufferError::IndexOutOfRange { index: 2, count: 2 }))
        ));
        Ok(())
    }

    #[test]
    fn test_read_pool_single_buffer() -> Result<(), Error> {
        let mut dev = device();
        let pool = BufferPool::prepare(Box::new(ReadStrategy::new(320 * 240 * 2)), &mut dev)?;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.buffers()[0].target(), None);
        assert_eq!(pool.buffers()[0].length(), 320 * 240 * 2);
        assert_eq!(dev.queued_count(), 0);
        Ok(())
    }

    #[test]
    fn test_dmabuf_pool_takes_handles() -> Result<(), Error> {
        let mut dev = device();
        let handles = (0..4)
            .map(|_| {
                let fd = File::open("/dev/null").unwrap().into_raw_fd();
                unsafe { DmaBufHandle::from_raw_fd(fd, 320 * 240 * 2) }
            })
            .collect();
        let pool = BufferPool::prepare(Box::new(DmaBufStrategy::new(handles)), &mut dev)?;
        assert_eq!(pool.len(), 4);
        let buf = &pool.buffers()[2];
        assert!(buf.data().is_none());
        let fd = buf.dmabuf().unwrap().raw_fd();
        assert_eq!(buf.target(), Some(QueueTarget::DmaBuf { index: 2, fd }));
        Ok(())
    }

    #[test]
    fn test_release_frees_driver_buffers() -> Result<(), Error> {
        let mut dev = device();
        let mut pool = BufferPool::prepare(Box::new(MmapStrategy::new(2)), &mut dev)?;
        pool.release(&mut dev)?;
        assert!(pool.is_empty());
        assert!(dev.query_buffer(Memory::Mmap, 0).is_err());
        Ok(())
    }
}
