// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 capture device node
//!
//! [`V4l2Device`] owns the file descriptor of a `/dev/video*` node opened
//! non-blocking and implements [`CaptureDevice`] on top of the raw ioctls in
//! `vincap_sys::v4l2`. Every ioctl goes through [`retry`] so a signal
//! delivered mid call does not surface as an error.

use super::{BufferInfo, CaptureDevice, DequeuedBuffer, Format, Memory, Negotiation, QueueTarget};
use crate::{fourcc::FourCC, fourcc::PixelFormat, memory::MappedRegion, retry, Error};
use nix::errno::Errno;
use std::{
    ffi::CStr,
    fs::{File, OpenOptions},
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd},
        unix::fs::{FileTypeExt, OpenOptionsExt},
    },
    path::{Path, PathBuf},
    time::Duration,
};
use vincap_sys::{libc, v4l2 as sys};

/// An open V4L2 video capture node.
#[derive(Debug)]
pub struct V4l2Device {
    file: File,
    path: PathBuf,
    driver: String,
    card: String,
    capabilities: u32,
    format: Format,
}

impl V4l2Device {
    /// Opens `path` and checks it is a V4L2 video capture device.
    pub fn open(path: impl AsRef<Path>) -> Result<V4l2Device, Error> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_char_device() {
            return Err(Error::NotACaptureDevice(format!(
                "{} is not a device",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;

        let mut cap = sys::v4l2_capability::default();
        // SAFETY: `cap` is a valid out parameter for VIDIOC_QUERYCAP.
        match retry(|| unsafe { sys::vidioc_querycap(file.as_raw_fd(), &mut cap) }) {
            Ok(_) => {}
            Err(Errno::EINVAL) | Err(Errno::ENOTTY) => {
                return Err(Error::NotACaptureDevice(format!(
                    "{} is no V4L2 device",
                    path.display()
                )))
            }
            Err(errno) => return Err(Error::Device { op: "VIDIOC_QUERYCAP", errno }),
        }

        let capabilities = if cap.capabilities & sys::V4L2_CAP_DEVICE_CAPS != 0 {
            cap.device_caps
        } else {
            cap.capabilities
        };
        if capabilities & sys::V4L2_CAP_VIDEO_CAPTURE == 0 {
            return Err(Error::NotACaptureDevice(format!(
                "{} is no video capture device",
                path.display()
            )));
        }

        let driver = c_string(&cap.driver);
        let card = c_string(&cap.card);
        log::info!("opened {} ({}, driver {})", path.display(), card, driver);

        Ok(V4l2Device {
            file,
            path: path.to_path_buf(),
            driver,
            card,
            capabilities,
            format: Format::new(0, 0, PixelFormat::Nv12),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn card(&self) -> &str {
        &self.card
    }

    /// Effective capability flags (`device_caps` when reported).
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Checks that the device supports the I/O family `memory` belongs to.
    pub fn check_memory(&self, memory: Memory) -> Result<(), Error> {
        let (flag, what) = match memory {
            Memory::Read => (sys::V4L2_CAP_READWRITE, "read i/o"),
            _ => (sys::V4L2_CAP_STREAMING, "streaming i/o"),
        };
        if self.capabilities & flag == 0 {
            return Err(Error::NotACaptureDevice(format!(
                "{} does not support {}",
                self.path.display(),
                what
            )));
        }
        Ok(())
    }

    /// Programs crop, frame interval and format, then reads back what the
    /// driver actually applied.
    pub fn negotiate(&mut self, request: &Negotiation) -> Result<Format, Error> {
        let fd = self.file.as_raw_fd();

        self.reset_crop();

        if let Some(fps) = request.frame_rate {
            let mut parm = sys::v4l2_streamparm {
                type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
                ..Default::default()
            };
            parm.parm.capture = sys::v4l2_captureparm {
                timeperframe: sys::v4l2_fract {
                    numerator: 1,
                    denominator: fps,
                },
                ..Default::default()
            };
            // SAFETY: `parm` is a valid in/out parameter for VIDIOC_S_PARM.
            if let Err(err) = retry(|| unsafe { sys::vidioc_s_parm(fd, &mut parm) }) {
                log::warn!("unable to set frame rate {} fps: {}", fps, err.desc());
            }
        }

        let mut fmt = sys::v4l2_format {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        fmt.fmt.pix = sys::v4l2_pix_format {
            width: request.width,
            height: request.height,
            pixelformat: request.format.v4l2_code(),
            field: sys::V4L2_FIELD_INTERLACED,
            ..Default::default()
        };
        // SAFETY: `fmt` is a valid in/out parameter for VIDIOC_S_FMT.
        retry(|| unsafe { sys::vidioc_s_fmt(fd, &mut fmt) })
            .map_err(Error::device("VIDIOC_S_FMT"))?;

        if let Some(crop) = request.crop {
            self.apply_crop(crop.left, crop.top, crop.width, crop.height);
        }

        let mut fmt = sys::v4l2_format {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        // SAFETY: `fmt` is a valid in/out parameter for VIDIOC_G_FMT.
        retry(|| unsafe { sys::vidioc_g_fmt(fd, &mut fmt) })
            .map_err(Error::device("VIDIOC_G_FMT"))?;
        // SAFETY: the driver fills `pix` for single planar capture queues.
        let pix = unsafe { fmt.fmt.pix };

        if pix.pixelformat != request.format.v4l2_code() {
            return Err(Error::FormatRejected {
                requested: request.format.fourcc(),
                actual: FourCC::from(pix.pixelformat),
            });
        }
        if pix.width != request.width {
            log::warn!("driver set width to {} (requested {})", pix.width, request.width);
        }
        if pix.height != request.height {
            log::warn!(
                "driver set height to {} (requested {})",
                pix.height,
                request.height
            );
        }

        let (bytes_per_line, image_size) = corrected_geometry(
            request.format,
            pix.width,
            pix.height,
            pix.bytesperline,
            pix.sizeimage,
        );
        self.format = Format {
            width: pix.width,
            height: pix.height,
            pixel_format: request.format,
            bytes_per_line,
            image_size,
        };
        log::info!(
            "format {} {}x{} stride {} size {}",
            request.format,
            pix.width,
            pix.height,
            bytes_per_line,
            image_size
        );
        Ok(self.format)
    }

    fn reset_crop(&self) {
        let fd = self.file.as_raw_fd();
        let mut cropcap = sys::v4l2_cropcap {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        // SAFETY: `cropcap` is a valid in/out parameter for VIDIOC_CROPCAP.
        if retry(|| unsafe { sys::vidioc_cropcap(fd, &mut cropcap) }).is_err() {
            return;
        }
        let crop = sys::v4l2_crop {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            c: cropcap.defrect,
        };
        // Cropping is optional, drivers without it return EINVAL.
        // SAFETY: `crop` is a valid in parameter for VIDIOC_S_CROP.
        if let Err(err) = retry(|| unsafe { sys::vidioc_s_crop(fd, &crop) }) {
            log::debug!("crop reset ignored: {}", err.desc());
        }
    }

    fn apply_crop(&self, left: i32, top: i32, width: u32, height: u32) {
        let fd = self.file.as_raw_fd();
        let wanted = sys::v4l2_rect {
            left,
            top,
            width,
            height,
        };
        let mut sel = sys::v4l2_selection {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            target: sys::V4L2_SEL_TGT_CROP,
            r: wanted,
            ..Default::default()
        };
        // SAFETY: `sel` is a valid in/out parameter for VIDIOC_S_SELECTION.
        if let Err(err) = retry(|| unsafe { sys::vidioc_s_selection(fd, &mut sel) }) {
            log::warn!("unable to set crop: {}", err.desc());
            return;
        }

        let mut sel = sys::v4l2_selection {
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            target: sys::V4L2_SEL_TGT_CROP,
            ..Default::default()
        };
        // SAFETY: `sel` is a valid in/out parameter for VIDIOC_G_SELECTION.
        match retry(|| unsafe { sys::vidioc_g_selection(fd, &mut sel) }) {
            Ok(_) if sel.r != wanted => log::warn!(
                "driver adjusted crop to ({},{}) {}x{}",
                sel.r.left,
                sel.r.top,
                sel.r.width,
                sel.r.height
            ),
            Ok(_) => {}
            Err(err) => log::warn!("unable to read back crop: {}", err.desc()),
        }
    }

    fn raw_buffer(memory: Memory, index: u32) -> sys::v4l2_buffer {
        sys::v4l2_buffer {
            index,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory.as_raw(),
            ..Default::default()
        }
    }
}

impl AsFd for V4l2Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl CaptureDevice for V4l2Device {
    fn format(&self) -> &Format {
        &self.format
    }

    fn request_buffers(&mut self, memory: Memory, count: u32) -> Result<u32, Error> {
        let fd = self.file.as_raw_fd();
        let mut req = sys::v4l2_requestbuffers {
            count,
            type_: sys::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory.as_raw(),
            ..Default::default()
        };
        // SAFETY: `req` is a valid in/out parameter for VIDIOC_REQBUFS.
        match retry(|| unsafe { sys::vidioc_reqbufs(fd, &mut req) }) {
            Ok(_) => {
                log::debug!("{} buffers: requested {}, granted {}", memory, count, req.count);
                Ok(req.count)
            }
            Err(Errno::EINVAL) => Err(Error::Unsupported(format!(
                "{} does not support {} i/o",
                self.path.display(),
                memory
            ))),
            Err(errno) => Err(Error::Device {
                op: "VIDIOC_REQBUFS",
                errno,
            }),
        }
    }

    fn query_buffer(&mut self, memory: Memory, index: u32) -> Result<BufferInfo, Error> {
        let fd = self.file.as_raw_fd();
        let mut buf = Self::raw_buffer(memory, index);
        // SAFETY: `buf` is a valid in/out parameter for VIDIOC_QUERYBUF.
        retry(|| unsafe { sys::vidioc_querybuf(fd, &mut buf) })
            .map_err(Error::device("VIDIOC_QUERYBUF"))?;
        Ok(BufferInfo {
            index,
            // SAFETY: `offset` is the active member for MMAP buffers and
            // harmless to read for the others.
            offset: unsafe { buf.m.offset },
            length: buf.length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> Result<MappedRegion, Error> {
        MappedRegion::map(
            &self.file,
            i64::from(info.offset),
            usize::try_from(info.length)?,
        )
    }

    fn queue(&mut self, target: QueueTarget) -> Result<(), Error> {
        let fd = self.file.as_raw_fd();
        let mut buf = Self::raw_buffer(target.memory(), target.index());
        match target {
            QueueTarget::Mmap { .. } => {}
            QueueTarget::UserPtr { ptr, length, .. } => {
                buf.m.userptr = ptr as libc::c_ulong;
                buf.length = length;
            }
            QueueTarget::DmaBuf { fd: dmabuf, .. } => buf.m.fd = dmabuf,
        }
        // SAFETY: `buf` is a valid in/out parameter for VIDIOC_QBUF and any
        // user pointer refers to a pool allocation that outlives streaming.
        retry(|| unsafe { sys::vidioc_qbuf(fd, &mut buf) }).map_err(Error::device("VIDIOC_QBUF"))?;
        Ok(())
    }

    fn dequeue(&mut self, memory: Memory) -> Result<Option<DequeuedBuffer>, Error> {
        let fd = self.file.as_raw_fd();
        let mut buf = Self::raw_buffer(memory, 0);
        // SAFETY: `buf` is a valid in/out parameter for VIDIOC_DQBUF.
        match retry(|| unsafe { sys::vidioc_dqbuf(fd, &mut buf) }) {
            Ok(_) => {}
            Err(Errno::EAGAIN) => return Ok(None),
            Err(errno) => return Err(Error::Device { op: "VIDIOC_DQBUF", errno }),
        }

        let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
        let micros = u32::try_from(buf.timestamp.tv_usec).unwrap_or(0);
        let userptr = match memory {
            // SAFETY: `userptr` is the active member for USERPTR buffers.
            Memory::UserPtr => (unsafe { buf.m.userptr }) as usize,
            _ => 0,
        };
        Ok(Some(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, micros.saturating_mul(1000)),
            userptr,
            length: buf.length,
        }))
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let fd = self.file.as_raw_fd();
        match retry(|| nix::unistd::read(fd, buf)) {
            Ok(n) => Ok(Some(n)),
            Err(Errno::EAGAIN) => Ok(None),
            Err(errno) => Err(Error::Device { op: "read", errno }),
        }
    }

    fn stream_on(&mut self) -> Result<(), Error> {
        let ty = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        // SAFETY: `ty` is a valid in parameter for VIDIOC_STREAMON.
        retry(|| unsafe { sys::vidioc_streamon(self.file.as_raw_fd(), &ty) })
            .map_err(Error::device("VIDIOC_STREAMON"))?;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), Error> {
        let ty = sys::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        // SAFETY: `ty` is a valid in parameter for VIDIOC_STREAMOFF.
        retry(|| unsafe { sys::vidioc_streamoff(self.file.as_raw_fd(), &ty) })
            .map_err(Error::device("VIDIOC_STREAMOFF"))?;
        Ok(())
    }
}

/// Raises the stride and image size reported by buggy drivers to at least
/// what `format` needs at `width`x`height`.
pub fn corrected_geometry(
    format: PixelFormat,
    width: u32,
    height: u32,
    bytes_per_line: u32,
    image_size: u32,
) -> (u32, u32) {
    let bytes_per_line = bytes_per_line.max(format.bytes_per_line(width));
    let image_size = image_size.max(format.frame_size(bytes_per_line, height));
    (bytes_per_line, image_size)
}

fn c_string(bytes: &[u8]) -> String {
    CStr::from_bytes_until_nul(bytes)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_corrected_geometry_raises_short_values() {
        assert_eq!(
            corrected_geometry(PixelFormat::Yuyv, 640, 480, 0, 0),
            (1280, 1280 * 480)
        );
        assert_eq!(
            corrected_geometry(PixelFormat::Nv12, 1920, 1080, 1920, 1920 * 1080),
            (1920, 1920 * 1080 * 3 / 2)
        );
    }

    #[test]
    fn test_corrected_geometry_keeps_padding() {
        assert_eq!(
            corrected_geometry(PixelFormat::Nv12, 1920, 1080, 2048, 2048 * 1088 * 3 / 2),
            (2048, 2048 * 1088 * 3 / 2)
        );
    }

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(b"uvcvideo\0\0\0"), "uvcvideo");
        assert_eq!(c_string(b"abc"), "abc");
    }

    #[test]
    fn test_open_regular_file_fails() {
        let err = V4l2Device::open("Cargo.toml").unwrap_err();
        assert!(matches!(err, Error::NotACaptureDevice(_)));
    }

    #[test]
    fn test_open_missing_node_fails() {
        let err = V4l2Device::open("/dev/does-not-exist-video").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_open_non_v4l2_device_fails() {
        let err = V4l2Device::open("/dev/null").unwrap_err();
        assert!(matches!(err, Error::NotACaptureDevice(_)));
    }

    #[test]
    #[ignore = "requires a V4L2 capture device at /dev/video0"]
    #[serial]
    fn test_negotiate_hardware() -> Result<(), Error> {
        let mut dev = V4l2Device::open("/dev/video0")?;
        dev.check_memory(Memory::Mmap)?;
        let format = dev.negotiate(&Negotiation {
            width: 640,
            height: 480,
            format: PixelFormat::Yuyv,
            frame_rate: None,
            crop: None,
        })?;
        assert!(format.image_size >= format.bytes_per_line * format.height);
        Ok(())
    }
}
