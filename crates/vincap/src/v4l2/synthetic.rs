// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::{BufferInfo, CaptureDevice, DequeuedBuffer, Format, Memory, QueueTarget};
use crate::{memory::page_align, memory::MappedRegion, Error};
use nix::errno::Errno;
use std::{
    collections::VecDeque,
    fs::File,
    os::fd::{AsFd, BorrowedFd},
    slice,
    time::Duration,
};

/// In-memory capture device.
///
/// Behaves like a driver that completes every queued buffer in FIFO order as
/// soon as it is asked for one. Every byte of frame `n` is `n as u8`: MMAP
/// and USERPTR buffers are filled when they complete, read() I/O fills the
/// caller's buffer. DMABUF buffers are left untouched.
///
/// The file descriptor is `/dev/null`, which always polls readable.
#[derive(Debug)]
pub struct SyntheticDevice {
    null: File,
    format: Format,
    max_buffers: u32,
    frame_interval: Duration,
    memory: Option<Memory>,
    granted: u32,
    /// Address and length of each buffer handed out by `map_buffer`.
    mapped: Vec<Option<(usize, usize)>>,
    pending: VecDeque<QueueTarget>,
    streaming: bool,
    sequence: u32,
    queued: usize,
    stream_ons: usize,
    stream_offs: usize,
    stream_off_failures: u32,
}

fn invalid(op: &'static str) -> Error {
    Error::Device {
        op,
        errno: Errno::EINVAL,
    }
}

impl SyntheticDevice {
    pub fn new(format: Format) -> Result<SyntheticDevice, Error> {
        Ok(SyntheticDevice {
            null: File::open("/dev/null")?,
            format,
            max_buffers: 32,
            frame_interval: Duration::from_millis(33),
            memory: None,
            granted: 0,
            mapped: Vec::new(),
            pending: VecDeque::new(),
            streaming: false,
            sequence: 0,
            queued: 0,
            stream_ons: 0,
            stream_offs: 0,
            stream_off_failures: 0,
        })
    }

    /// Caps the number of buffers granted by `request_buffers`.
    pub fn with_max_buffers(mut self, max: u32) -> Self {
        self.max_buffers = max;
        self
    }

    /// Spacing of the timestamps of consecutive frames.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Makes the next `count` stream-off requests fail with `EIO`.
    pub fn with_stream_off_failures(mut self, count: u32) -> Self {
        self.stream_off_failures = count;
        self
    }

    /// Indices currently owned by the device, oldest first.
    pub fn pending(&self) -> Vec<u32> {
        self.pending.iter().map(|t| t.index()).collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Total number of successful queue operations.
    pub fn queued_count(&self) -> usize {
        self.queued
    }

    pub fn stream_on_count(&self) -> usize {
        self.stream_ons
    }

    pub fn stream_off_count(&self) -> usize {
        self.stream_offs
    }

    /// Frames produced so far.
    pub fn frames(&self) -> u32 {
        self.sequence
    }

    fn next_sequence(&mut self) -> (u32, Duration) {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        (sequence, self.frame_interval * sequence)
    }

    /// Writes the pattern of frame `sequence` into a completed buffer.
    fn fill(&self, target: &QueueTarget, sequence: u32) -> Result<(), Error> {
        let image_size = usize::try_from(self.format.image_size)?;
        let (addr, len) = match *target {
            QueueTarget::Mmap { index } => {
                match self.mapped.get(usize::try_from(index)?).copied().flatten() {
                    Some(region) => region,
                    None => return Ok(()),
                }
            }
            QueueTarget::UserPtr { ptr, length, .. } => (ptr, usize::try_from(length)?),
            QueueTarget::DmaBuf { .. } => return Ok(()),
        };
        // SAFETY: the buffer is owned by the device while queued. Its memory
        // belongs to the pool, which frees it only after stream off or a new
        // request has emptied `pending`.
        let frame = unsafe { slice::from_raw_parts_mut(addr as *mut u8, len.min(image_size)) };
        frame.fill(sequence as u8);
        Ok(())
    }
}

impl AsFd for SyntheticDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.null.as_fd()
    }
}

impl CaptureDevice for SyntheticDevice {
    fn format(&self) -> &Format {
        &self.format
    }

    fn request_buffers(&mut self, memory: Memory, count: u32) -> Result<u32, Error> {
        if self.streaming {
            return Err(Error::Device {
                op: "VIDIOC_REQBUFS",
                errno: Errno::EBUSY,
            });
        }
        if memory == Memory::Read {
            return Err(Error::Unsupported("READ i/o has no buffer queue".into()));
        }
        self.pending.clear();
        self.mapped.clear();
        self.granted = count.min(self.max_buffers);
        self.memory = (self.granted > 0).then_some(memory);
        Ok(self.granted)
    }

    fn query_buffer(&mut self, memory: Memory, index: u32) -> Result<BufferInfo, Error> {
        if self.memory != Some(memory) || index >= self.granted {
            return Err(invalid("VIDIOC_QUERYBUF"));
        }
        let stride = u32::try_from(page_align(usize::try_from(self.format.image_size)?))?;
        Ok(BufferInfo {
            index,
            offset: index * stride,
            length: self.format.image_size,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> Result<MappedRegion, Error> {
        let region = MappedRegion::anonymous(usize::try_from(info.length)?)?;
        let index = usize::try_from(info.index)?;
        if self.mapped.len() <= index {
            self.mapped.resize(index + 1, None);
        }
        self.mapped[index] = Some((region.as_ptr() as usize, region.len()));
        Ok(region)
    }

    fn queue(&mut self, target: QueueTarget) -> Result<(), Error> {
        let index = target.index();
        if self.memory != Some(target.memory())
            || index >= self.granted
            || self.pending.iter().any(|t| t.index() == index)
        {
            return Err(invalid("VIDIOC_QBUF"));
        }
        self.pending.push_back(target);
        self.queued += 1;
        Ok(())
    }

    fn dequeue(&mut self, memory: Memory) -> Result<Option<DequeuedBuffer>, Error> {
        if !self.streaming || self.memory != Some(memory) {
            return Err(invalid("VIDIOC_DQBUF"));
        }
        let Some(target) = self.pending.pop_front() else {
            return Ok(None);
        };
        let (sequence, timestamp) = self.next_sequence();
        self.fill(&target, sequence)?;
        let (userptr, length) = match target {
            QueueTarget::UserPtr { ptr, length, .. } => (ptr, length),
            _ => (0, self.format.image_size),
        };
        Ok(Some(DequeuedBuffer {
            index: target.index(),
            bytes_used: self.format.image_size.min(length),
            sequence,
            timestamp,
            userptr,
            length,
        }))
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let len = buf.len().min(usize::try_from(self.format.image_size)?);
        let (sequence, _) = self.next_sequence();
        buf[..len].fill(sequence as u8);
        Ok(Some(len))
    }

    fn stream_on(&mut self) -> Result<(), Error> {
        if self.memory.is_none() {
            return Err(invalid("VIDIOC_STREAMON"));
        }
        self.streaming = true;
        self.stream_ons += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), Error> {
        if self.stream_off_failures > 0 {
            self.stream_off_failures -= 1;
            return Err(Error::Device {
                op: "VIDIOC_STREAMOFF",
                errno: Errno::EIO,
            });
        }
        self.streaming = false;
        self.pending.clear();
        self.stream_offs += 1;
        Ok(())
    }
}
