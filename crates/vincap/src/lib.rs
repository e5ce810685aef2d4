// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! vincap - V4L2 capture test pipeline
//!
//! Acquires frames from a V4L2 capture device, optionally converts them and
//! presents or records them through a Linux framebuffer or a DRM/KMS display.
//!
//! The capture side supports the four V4L2 I/O methods, each behind the
//! [`pool::Strategy`] trait:
//!
//! | Method | Buffers come from | Driver queue |
//! |--------|-------------------|--------------|
//! | [`Memory::Mmap`] | driver, mapped into the process | yes |
//! | [`Memory::UserPtr`] | page aligned process memory | yes |
//! | [`Memory::DmaBuf`] | DRM dumb buffers exported with PRIME | yes |
//! | [`Memory::Read`] | one process buffer filled by `read(2)` | no |
//!
//! # Quick Start
//!
//! ```no_run
//! use vincap::config::CaptureConfig;
//! use vincap::fourcc::PixelFormat;
//! use vincap::session::Session;
//!
//! let config = CaptureConfig::default()
//!     .with_device("/dev/video1")
//!     .with_format(PixelFormat::Nv12)
//!     .with_resolution(1920, 1080);
//!
//! let mut session = Session::open(&config)?;
//! session.start()?;
//! let mut poller = session.poller()?;
//! let summary = session.run(&mut poller, &mut ())?;
//! println!("captured {} frames", summary.frames);
//! session.finish()?;
//! # Ok::<(), vincap::Error>(())
//! ```
//!
//! # Ownership
//!
//! Every [`pool::CaptureBuffer`] is owned either by the driver (queued) or by
//! the application (dequeued). [`queue::CaptureQueue`] is the only place the
//! ownership changes, and it rejects double enqueues and dequeues with nothing
//! queued instead of letting the driver report them.

use nix::errno::Errno;
use std::{error, fmt, io, num::TryFromIntError, time::Duration};

/// Capture configuration and its defaults.
pub mod config;

/// Pixel format codes and per-format geometry.
pub mod fourcc;

/// Memory regions backing capture and display buffers.
pub mod memory;

/// V4L2 capture device access.
pub mod v4l2;

/// Capture buffer allocation for each I/O method.
pub mod pool;

/// Driver queue ownership tracking and streaming control.
pub mod queue;

/// Pure pixel format conversion into display layouts.
pub mod convert;

/// Raw frame recording and Bayer dumps.
pub mod record;

/// Per-frame processing: recording and conversion.
pub mod pipeline;

/// Framebuffer and DRM/KMS display sinks.
pub mod display;

/// Double-buffered presentation state machines.
pub mod present;

/// Readiness wait loop.
pub mod event_loop;

/// Orchestration of device, pool, pipeline and display for one run.
pub mod session;

pub use v4l2::Memory;

/// Ownership or bookkeeping violation detected by the capture queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Index outside the pool.
    IndexOutOfRange { index: u32, count: usize },

    /// Buffer is already owned by the driver.
    AlreadyQueued(u32),

    /// Dequeue attempted while the driver owns no buffer.
    NothingQueued,

    /// The driver returned a buffer the application never queued.
    NotQueued(u32),

    /// A USERPTR dequeue returned a pointer and length matching no buffer.
    UnknownUserPtr { ptr: usize, length: usize },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BufferError::IndexOutOfRange { index, count } => {
                write!(f, "buffer index {} out of range (pool has {})", index, count)
            }
            BufferError::AlreadyQueued(index) => {
                write!(f, "buffer {} is already queued to the driver", index)
            }
            BufferError::NothingQueued => write!(f, "dequeue with no buffer queued"),
            BufferError::NotQueued(index) => {
                write!(f, "driver returned buffer {} which was not queued", index)
            }
            BufferError::UnknownUserPtr { ptr, length } => {
                write!(f, "no user pointer buffer at {:#x} with length {}", ptr, length)
            }
        }
    }
}

/// Error type for vincap operations
#[derive(Debug)]
pub enum Error {
    /// I/O error opening device nodes or writing recordings
    Io(io::Error),

    /// An ioctl or mapping on a device failed unexpectedly
    Device { op: &'static str, errno: Errno },

    /// The node is not a V4L2 capture device or lacks the requested I/O method
    NotACaptureDevice(String),

    /// Unsupported combination of options or device capabilities
    Unsupported(String),

    /// The driver replaced the requested pixel format
    FormatRejected {
        requested: fourcc::FourCC,
        actual: fourcc::FourCC,
    },

    /// The driver granted fewer than two buffers
    InsufficientBuffers { requested: u32, granted: u32 },

    /// Process memory for a capture buffer could not be allocated
    AllocationFailed { size: usize },

    /// Buffer ownership violation
    Buffer(BufferError),

    /// No frame arrived within the wait timeout before any progress
    Timeout(Duration),

    /// Integer conversion error (try_from failed)
    TryFromInt(TryFromIntError),
}

/// Coarse classification of [`Error`] used to choose an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Device,
    Logic,
    Timeout,
    Io,
}

impl Error {
    /// Returns a closure mapping an errno from `op` into [`Error::Device`].
    pub(crate) fn device(op: &'static str) -> impl FnOnce(Errno) -> Error {
        move |errno| Error::Device { op, errno }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotACaptureDevice(_)
            | Error::Unsupported(_)
            | Error::FormatRejected { .. }
            | Error::InsufficientBuffers { .. } => ErrorCategory::Configuration,
            Error::Device { .. } | Error::AllocationFailed { .. } => ErrorCategory::Device,
            Error::Buffer(_) | Error::TryFromInt(_) => ErrorCategory::Logic,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::Io(_) => ErrorCategory::Io,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Device { op, errno } => write!(f, "{} failed: {}", op, errno.desc()),
            Error::NotACaptureDevice(msg) => write!(f, "not a capture device: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            Error::FormatRejected { requested, actual } => write!(
                f,
                "driver did not accept format {} (got {})",
                requested, actual
            ),
            Error::InsufficientBuffers { requested, granted } => write!(
                f,
                "insufficient buffer memory: requested {} buffers, driver granted {}",
                requested, granted
            ),
            Error::AllocationFailed { size } => {
                write!(f, "failed to allocate {} byte capture buffer", size)
            }
            Error::Buffer(err) => write!(f, "buffer error: {}", err),
            Error::Timeout(timeout) => {
                write!(f, "no frame received within {} ms", timeout.as_millis())
            }
            Error::TryFromInt(err) => write!(f, "Integer conversion error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Device { errno, .. } => Some(errno),
            Error::TryFromInt(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        Error::Buffer(err)
    }
}

impl From<TryFromIntError> for Error {
    fn from(err: TryFromIntError) -> Self {
        Error::TryFromInt(err)
    }
}

/// Repeats a system call while it fails with `EINTR`.
pub(crate) fn retry<T>(mut call: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match call() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_repeats_on_eintr() {
        let mut attempts = 0;
        let result = retry(|| {
            attempts += 1;
            if attempts < 3 {
                Err(Errno::EINTR)
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_retry_passes_other_errors() {
        let result: nix::Result<()> = retry(|| Err(Errno::EAGAIN));
        assert_eq!(result, Err(Errno::EAGAIN));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::InsufficientBuffers {
                requested: 4,
                granted: 1
            }
            .category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::Device {
                op: "VIDIOC_QBUF",
                errno: Errno::EIO
            }
            .category(),
            ErrorCategory::Device
        );
        assert_eq!(
            Error::Buffer(BufferError::NothingQueued).category(),
            ErrorCategory::Logic
        );
        assert_eq!(
            Error::Timeout(Duration::from_secs(3)).category(),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::Device {
            op: "VIDIOC_STREAMON",
            errno: Errno::EINVAL,
        };
        assert!(format!("{}", err).starts_with("VIDIOC_STREAMON failed"));
        let err = Error::from(BufferError::AlreadyQueued(2));
        assert_eq!(
            format!("{}", err),
            "buffer error: buffer 2 is already queued to the driver"
        );
    }
}
