// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 capture device access
//!
//! The pipeline talks to the capture device only through the
//! [`CaptureDevice`] trait, which is the subset of the V4L2 streaming API the
//! buffer strategies need: buffer requests, queue and dequeue, streaming
//! control and the `read(2)` path.
//!
//! - [`V4l2Device`] implements it on a real `/dev/video*` node.
//! - [`SyntheticDevice`] implements it in memory, producing frames on demand,
//!   for exercising the pipeline without hardware.
//!
//! # Memory Types
//!
//! | Method | Buffer storage | Queue target |
//! |--------|----------------|--------------|
//! | [`Memory::Mmap`] | driver allocated, mapped with [`CaptureDevice::map_buffer`] | index |
//! | [`Memory::UserPtr`] | process memory | index, pointer and length |
//! | [`Memory::DmaBuf`] | imported DMA buffers | index and fd |
//! | [`Memory::Read`] | process memory | none, filled by [`CaptureDevice::read_frame`] |
//!
//! The sensor subdevice helpers in [`subdev`] are one-shot diagnostics that
//! do not take part in streaming.

use crate::{config::Rect, fourcc::PixelFormat, memory::MappedRegion, Error};
use std::{fmt, os::fd::AsFd, os::fd::RawFd, time::Duration};
use unix_ts::Timestamp;
use vincap_sys::v4l2 as sys;

mod device;
pub mod subdev;
mod synthetic;

pub use device::{corrected_geometry, V4l2Device};
pub use synthetic::SyntheticDevice;

/// Capture I/O method.
///
/// The command line selectors follow the declaration order: `0` MMAP,
/// `1` USERPTR, `2` DMABUF and `3` read().
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Memory {
    Mmap,
    UserPtr,
    DmaBuf,
    Read,
}

impl Memory {
    /// `V4L2_MEMORY_*` value, zero for read() which has no buffer queue.
    pub fn as_raw(self) -> u32 {
        match self {
            Memory::Mmap => sys::V4L2_MEMORY_MMAP,
            Memory::UserPtr => sys::V4L2_MEMORY_USERPTR,
            Memory::DmaBuf => sys::V4L2_MEMORY_DMABUF,
            Memory::Read => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Memory::Mmap => "MMAP",
            Memory::UserPtr => "USERPTR",
            Memory::DmaBuf => "DMABUF",
            Memory::Read => "READ",
        }
    }

    /// True for the methods that exchange buffers with the driver queue.
    pub fn is_streaming(self) -> bool {
        self != Memory::Read
    }
}

impl TryFrom<u8> for Memory {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Memory::Mmap),
            1 => Ok(Memory::UserPtr),
            2 => Ok(Memory::DmaBuf),
            3 => Ok(Memory::Read),
            _ => Err(Error::Unsupported(format!("unknown I/O method {}", value))),
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Negotiated capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub bytes_per_line: u32,
    pub image_size: u32,
}

impl Format {
    /// Tightly packed format with no line padding.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Format {
        let bytes_per_line = pixel_format.bytes_per_line(width);
        Format {
            width,
            height,
            pixel_format,
            bytes_per_line,
            image_size: pixel_format.frame_size(bytes_per_line, height),
        }
    }
}

/// Requested capture parameters sent to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_rate: Option<u32>,
    pub crop: Option<Rect>,
}

/// Driver description of one buffer, from `VIDIOC_QUERYBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    /// Mapping offset for MMAP buffers.
    pub offset: u32,
    pub length: u32,
}

/// What is handed to the driver with `VIDIOC_QBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTarget {
    Mmap { index: u32 },
    UserPtr { index: u32, ptr: usize, length: u32 },
    DmaBuf { index: u32, fd: RawFd },
}

impl QueueTarget {
    pub fn index(&self) -> u32 {
        match *self {
            QueueTarget::Mmap { index }
            | QueueTarget::UserPtr { index, .. }
            | QueueTarget::DmaBuf { index, .. } => index,
        }
    }

    pub fn memory(&self) -> Memory {
        match self {
            QueueTarget::Mmap { .. } => Memory::Mmap,
            QueueTarget::UserPtr { .. } => Memory::UserPtr,
            QueueTarget::DmaBuf { .. } => Memory::DmaBuf,
        }
    }
}

/// A filled buffer returned by `VIDIOC_DQBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    /// Capture time on the driver's monotonic clock.
    pub timestamp: Duration,
    /// Pointer reported back for USERPTR buffers, zero otherwise.
    pub userptr: usize,
    pub length: u32,
}

impl DequeuedBuffer {
    pub fn unix_timestamp(&self) -> Timestamp {
        duration_timestamp(self.timestamp)
    }
}

pub(crate) fn duration_timestamp(duration: Duration) -> Timestamp {
    let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
    Timestamp::new(secs, duration.subsec_nanos())
}

/// The V4L2 streaming operations used by the capture pipeline.
pub trait CaptureDevice: AsFd {
    /// Format currently in effect.
    fn format(&self) -> &Format;

    /// `VIDIOC_REQBUFS`. Returns the number of buffers the driver granted,
    /// which may differ from `count`.
    fn request_buffers(&mut self, memory: Memory, count: u32) -> Result<u32, Error>;

    /// `VIDIOC_QUERYBUF`.
    fn query_buffer(&mut self, memory: Memory, index: u32) -> Result<BufferInfo, Error>;

    /// Maps a driver allocated MMAP buffer into the process.
    fn map_buffer(&mut self, info: &BufferInfo) -> Result<MappedRegion, Error>;

    /// `VIDIOC_QBUF`.
    fn queue(&mut self, target: QueueTarget) -> Result<(), Error>;

    /// `VIDIOC_DQBUF`. `Ok(None)` when no buffer is ready yet.
    fn dequeue(&mut self, memory: Memory) -> Result<Option<DequeuedBuffer>, Error>;

    /// read() I/O: fills `buf` with one frame. `Ok(None)` when no frame is
    /// ready yet.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    fn stream_on(&mut self) -> Result<(), Error>;

    fn stream_off(&mut self) -> Result<(), Error>;
}
