// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use core::fmt;
use vincap_sys::{drm, v4l2};

/// Four character code as stored in V4L2 and DRM format fields.
///
/// Both APIs define the code as the characters packed little-endian into a
/// `u32`, independent of host byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.code()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                for b in self.0 {
                    write!(f, "{}", core::ascii::escape_default(b))?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// Capture pixel formats understood by the pipeline.
///
/// The numeric selector used on the command line follows the order of the
/// variants: `0` is RGB565 through `10` for BGGR 12-bit Bayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb565,
    Rgb24,
    Yuv420,
    Yuyv,
    Nv21,
    Nv12,
    Yvyu,
    Srggb12,
    Sgrbg12,
    Sgbrg12,
    Sbggr12,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 11] = [
        PixelFormat::Rgb565,
        PixelFormat::Rgb24,
        PixelFormat::Yuv420,
        PixelFormat::Yuyv,
        PixelFormat::Nv21,
        PixelFormat::Nv12,
        PixelFormat::Yvyu,
        PixelFormat::Srggb12,
        PixelFormat::Sgrbg12,
        PixelFormat::Sgbrg12,
        PixelFormat::Sbggr12,
    ];

    /// Maps a command line selector to a format. Unknown selectors fall
    /// back to RGB565.
    pub fn from_selector(selector: u8) -> PixelFormat {
        Self::ALL
            .get(usize::from(selector))
            .copied()
            .unwrap_or(PixelFormat::Rgb565)
    }

    pub fn fourcc(self) -> FourCC {
        FourCC::from(self.v4l2_code())
    }

    pub fn v4l2_code(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => v4l2::V4L2_PIX_FMT_RGB565,
            PixelFormat::Rgb24 => v4l2::V4L2_PIX_FMT_RGB24,
            PixelFormat::Yuv420 => v4l2::V4L2_PIX_FMT_YUV420,
            PixelFormat::Yuyv => v4l2::V4L2_PIX_FMT_YUYV,
            PixelFormat::Nv21 => v4l2::V4L2_PIX_FMT_NV21,
            PixelFormat::Nv12 => v4l2::V4L2_PIX_FMT_NV12,
            PixelFormat::Yvyu => v4l2::V4L2_PIX_FMT_YVYU,
            PixelFormat::Srggb12 => v4l2::V4L2_PIX_FMT_SRGGB12,
            PixelFormat::Sgrbg12 => v4l2::V4L2_PIX_FMT_SGRBG12,
            PixelFormat::Sgbrg12 => v4l2::V4L2_PIX_FMT_SGBRG12,
            PixelFormat::Sbggr12 => v4l2::V4L2_PIX_FMT_SBGGR12,
        }
    }

    pub fn from_v4l2_code(code: u32) -> Option<PixelFormat> {
        Self::ALL.into_iter().find(|fmt| fmt.v4l2_code() == code)
    }

    /// DRM scan-out format carrying the same memory layout, if any.
    pub fn drm_format(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb565 => Some(drm::DRM_FORMAT_RGB565),
            PixelFormat::Rgb24 => Some(drm::DRM_FORMAT_RGB888),
            PixelFormat::Yuyv => Some(drm::DRM_FORMAT_YUYV),
            PixelFormat::Yvyu => Some(drm::DRM_FORMAT_YVYU),
            PixelFormat::Nv12 => Some(drm::DRM_FORMAT_NV12),
            PixelFormat::Nv21 => Some(drm::DRM_FORMAT_NV21),
            _ => None,
        }
    }

    /// Bayer colour filter order for the 12-bit raw formats.
    pub fn bayer_pattern(self) -> Option<&'static str> {
        match self {
            PixelFormat::Srggb12 => Some("RGGB"),
            PixelFormat::Sgrbg12 => Some("GRBG"),
            PixelFormat::Sgbrg12 => Some("GBRG"),
            PixelFormat::Sbggr12 => Some("BGGR"),
            _ => None,
        }
    }

    pub fn is_bayer(self) -> bool {
        self.bayer_pattern().is_some()
    }

    /// Planar 4:2:0 formats whose chroma follows the luma plane.
    pub fn is_420(self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420 | PixelFormat::Nv12 | PixelFormat::Nv21
        )
    }

    /// Minimum bytes per line of the first plane.
    ///
    /// Bayer formats are MIPI packed, two pixels in three bytes.
    pub fn bytes_per_line(self, width: u32) -> u32 {
        match self {
            PixelFormat::Rgb565 | PixelFormat::Yuyv | PixelFormat::Yvyu => width * 2,
            PixelFormat::Rgb24 => width * 3,
            PixelFormat::Yuv420 | PixelFormat::Nv12 | PixelFormat::Nv21 => width,
            PixelFormat::Srggb12
            | PixelFormat::Sgrbg12
            | PixelFormat::Sgbrg12
            | PixelFormat::Sbggr12 => (width * 3 + 1) / 2,
        }
    }

    /// Size of a whole frame given the first plane stride.
    pub fn frame_size(self, bytes_per_line: u32, height: u32) -> u32 {
        let luma = bytes_per_line * height;
        if self.is_420() {
            luma + luma / 2
        } else {
            luma
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fourcc())
    }
}
