// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{display::DisplayKind, fourcc::PixelFormat, v4l2::Negotiation, Error, Memory};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_DEVICE: &str = "/dev/video0";
pub const DEFAULT_FB_DEVICE: &str = "/dev/fb0";
pub const DEFAULT_DRM_DEVICE: &str = "/dev/dri/card0";

/// Crop rectangle in sensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Builds a rectangle from its corners; `right`/`bottom` are exclusive.
    pub fn from_corners(left: i32, top: i32, right: i32, bottom: i32) -> Result<Rect, Error> {
        if right <= left || bottom <= top {
            return Err(Error::Unsupported(format!(
                "empty crop rectangle ({},{})-({},{})",
                left, top, right, bottom
            )));
        }
        Ok(Rect {
            left,
            top,
            width: u32::try_from(right - left)?,
            height: u32::try_from(bottom - top)?,
        })
    }
}

/// Everything needed to run one capture session.
///
/// Built with the consuming `with_*` methods starting from [`Default`],
/// which matches the behaviour of the command line tool without options.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub memory: Memory,
    pub display: DisplayKind,
    pub fb_device: PathBuf,
    pub drm_device: PathBuf,
    /// `None` leaves the driver's frame interval alone.
    pub frame_rate: Option<u32>,
    pub crop: Option<Rect>,
    /// DRM connector id; `None` picks the first connected one.
    pub connector: Option<u32>,
    pub output: Option<PathBuf>,
    pub continuous: bool,
    pub iterations: u32,
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: 1920,
            height: 1080,
            format: PixelFormat::Nv12,
            memory: Memory::Mmap,
            display: DisplayKind::None,
            fb_device: PathBuf::from(DEFAULT_FB_DEVICE),
            drm_device: PathBuf::from(DEFAULT_DRM_DEVICE),
            frame_rate: Some(30),
            crop: None,
            connector: None,
            output: None,
            continuous: false,
            iterations: 3,
            timeout: Duration::from_secs(3),
        }
    }
}

impl CaptureConfig {
    pub fn with_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_display(mut self, display: DisplayKind) -> Self {
        self.display = display;
        self
    }

    pub fn with_fb_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.fb_device = path.into();
        self
    }

    pub fn with_drm_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.drm_device = path.into();
        self
    }

    pub fn with_frame_rate(mut self, fps: Option<u32>) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn with_crop(mut self, crop: Option<Rect>) -> Self {
        self.crop = crop;
        self
    }

    pub fn with_connector(mut self, connector: Option<u32>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rejects I/O method and display combinations the pipeline cannot run.
    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Unsupported(format!(
                "invalid resolution {}x{}",
                self.width, self.height
            )));
        }
        if self.iterations == 0 {
            return Err(Error::Unsupported("iteration count must be positive".into()));
        }
        match (self.memory, self.display) {
            (Memory::Mmap, _) => Ok(()),
            (Memory::UserPtr | Memory::Read, DisplayKind::None | DisplayKind::Framebuffer) => {
                Ok(())
            }
            (Memory::UserPtr | Memory::Read, DisplayKind::Drm) => Err(Error::Unsupported(
                format!("{} I/O cannot present on DRM", self.memory),
            )),
            (Memory::DmaBuf, DisplayKind::Drm) if self.output.is_none() => Ok(()),
            (Memory::DmaBuf, DisplayKind::Drm) => Err(Error::Unsupported(
                "DMABUF I/O does not support recording to a file".into(),
            )),
            (Memory::DmaBuf, _) => Err(Error::Unsupported(
                "DMABUF I/O requires the DRM display".into(),
            )),
        }
    }

    /// The device side of the configuration.
    pub fn negotiation(&self) -> Negotiation {
        Negotiation {
            width: self.width,
            height: self.height,
            format: self.format,
            frame_rate: self.frame_rate,
            crop: self.crop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.device, PathBuf::from("/dev/video0"));
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.format, PixelFormat::Nv12);
        assert_eq!(config.memory, Memory::Mmap);
        assert_eq!(config.display, DisplayKind::None);
        assert_eq!(config.frame_rate, Some(30));
        assert_eq!(config.iterations, 3);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CaptureConfig::default()
            .with_device("/dev/video1")
            .with_resolution(640, 480)
            .with_format(PixelFormat::Yuyv)
            .with_memory(Memory::UserPtr)
            .with_display(DisplayKind::Framebuffer)
            .with_frame_rate(None)
            .with_continuous(true);
        assert_eq!(config.device, PathBuf::from("/dev/video1"));
        assert_eq!(config.width, 640);
        assert_eq!(config.frame_rate, None);
        assert!(config.continuous);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_combinations() {
        let base = CaptureConfig::default();
        for display in [DisplayKind::None, DisplayKind::Framebuffer, DisplayKind::Drm] {
            let config = base.clone().with_display(display);
            assert!(config.validate().is_ok(), "MMAP with {:?}", display);
        }

        let userptr_drm = base
            .clone()
            .with_memory(Memory::UserPtr)
            .with_display(DisplayKind::Drm);
        assert!(matches!(userptr_drm.validate(), Err(Error::Unsupported(_))));

        let read_fb = base
            .clone()
            .with_memory(Memory::Read)
            .with_display(DisplayKind::Framebuffer);
        assert!(read_fb.validate().is_ok());

        let dmabuf_none = base.clone().with_memory(Memory::DmaBuf);
        assert!(matches!(dmabuf_none.validate(), Err(Error::Unsupported(_))));

        let dmabuf_drm = base
            .clone()
            .with_memory(Memory::DmaBuf)
            .with_display(DisplayKind::Drm);
        assert!(dmabuf_drm.validate().is_ok());

        let dmabuf_record = dmabuf_drm.with_output(Some("out.yuv".into()));
        assert!(matches!(dmabuf_record.validate(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_rect_from_corners() {
        let rect = Rect::from_corners(10, 20, 650, 500).unwrap();
        assert_eq!(
            rect,
            Rect {
                left: 10,
                top: 20,
                width: 640,
                height: 480
            }
        );
        assert!(Rect::from_corners(10, 10, 10, 20).is_err());
    }
}
