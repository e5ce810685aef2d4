// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::FrameSink;
use crate::{
    convert::{DisplayFormat, DisplayLayout},
    memory::MappedRegion,
    retry, Error,
};
use std::{
    fmt,
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::Path,
};
use vincap_sys::fb as sys;

/// A mapped Linux framebuffer device.
pub struct Framebuffer {
    // Unmapped before the device closes.
    screen: MappedRegion,
    _file: File,
    layout: DisplayLayout,
}

/// Picks the scan-out layout for a framebuffer mode.
fn layout_for(var: &sys::fb_var_screeninfo, line_length: u32) -> Result<DisplayLayout, Error> {
    let format = if var.grayscale != 0 {
        DisplayFormat::Nv12
    } else {
        match var.bits_per_pixel {
            16 => DisplayFormat::Rgb565,
            32 => DisplayFormat::Xrgb8888,
            bpp => {
                return Err(Error::Unsupported(format!(
                    "{} bits per pixel framebuffer",
                    bpp
                )))
            }
        }
    };
    let stride = if line_length == 0 {
        var.xres * format.bytes_per_pixel()
    } else {
        line_length
    };
    Ok(DisplayLayout {
        width: var.xres,
        height: var.yres,
        stride,
        format,
    })
}

impl Framebuffer {
    pub fn open(path: impl AsRef<Path>) -> Result<Framebuffer, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut var = sys::fb_var_screeninfo::default();
        // SAFETY: `var` is a valid out parameter for FBIOGET_VSCREENINFO.
        retry(|| unsafe { sys::fbioget_vscreeninfo(file.as_raw_fd(), &mut var) })
            .map_err(Error::device("FBIOGET_VSCREENINFO"))?;
        let mut fix = sys::fb_fix_screeninfo::default();
        // SAFETY: `fix` is a valid out parameter for FBIOGET_FSCREENINFO.
        retry(|| unsafe { sys::fbioget_fscreeninfo(file.as_raw_fd(), &mut fix) })
            .map_err(Error::device("FBIOGET_FSCREENINFO"))?;

        let layout = layout_for(&var, fix.line_length)?;
        let visible = layout.frame_size();
        let len = if fix.smem_len == 0 {
            visible
        } else {
            usize::try_from(fix.smem_len)?.min(visible)
        };
        let screen = MappedRegion::map(&file, 0, len)?;
        log::info!(
            "{}: {}x{} {} stride {} ({} bytes mapped)",
            path.display(),
            layout.width,
            layout.height,
            layout.format,
            layout.stride,
            len
        );
        Ok(Framebuffer {
            screen,
            _file: file,
            layout,
        })
    }
}

impl FrameSink for Framebuffer {
    fn layout(&self) -> DisplayLayout {
        self.layout
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        self.screen.as_mut_slice()
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("layout", &self.layout)
            .field("mapped", &self.screen.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn mode(bpp: u32, grayscale: u32) -> sys::fb_var_screeninfo {
        let mut var = sys::fb_var_screeninfo::default();
        var.xres = 800;
        var.yres = 480;
        var.bits_per_pixel = bpp;
        var.grayscale = grayscale;
        var
    }

    #[test]
    fn test_layout_from_mode() -> Result<(), Error> {
        let rgb = layout_for(&mode(16, 0), 1600)?;
        assert_eq!((rgb.format, rgb.stride), (DisplayFormat::Rgb565, 1600));

        let xrgb = layout_for(&mode(32, 0), 0)?;
        assert_eq!((xrgb.format, xrgb.stride), (DisplayFormat::Xrgb8888, 3200));

        let nv12 = layout_for(&mode(8, 1), 800)?;
        assert_eq!(nv12.format, DisplayFormat::Nv12);
        assert_eq!(nv12.frame_size(), 800 * 480 * 3 / 2);
        Ok(())
    }

    #[test]
    fn test_rgb24_framebuffer_unsupported() {
        assert!(matches!(
            layout_for(&mode(24, 0), 2400),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_open_not_a_framebuffer() {
        assert!(matches!(
            Framebuffer::open("/dev/null"),
            Err(Error::Device {
                op: "FBIOGET_VSCREENINFO",
                ..
            })
        ));
    }

    #[test]
    #[ignore = "requires /dev/fb0"]
    #[serial]
    fn test_open_fb0() -> Result<(), Error> {
        let mut fb = Framebuffer::open("/dev/fb0")?;
        let layout = fb.layout();
        assert!(layout.width > 0 && layout.height > 0);
        assert!(!fb.buffer_mut().is_empty());
        Ok(())
    }
}
