// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pixel format conversion into display layouts
//!
//! Converters are pure functions over byte slices: no allocation, no state
//! and no I/O. A frame is described by [`Source`]; the destination by a
//! [`DisplayLayout`]. The frame is clipped to the smaller of the two sizes
//! and written at the top left of the destination.
//!
//! # Supported Conversions
//!
//! | Source | RGB565 | XRGB8888 | NV12 | YUYV |
//! |--------|--------|----------|------|------|
//! | YUYV, YVYU | yes | yes | yes | yes |
//! | NV12, NV21 | yes | yes | yes | no |
//! | RGB24 | yes | yes | yes | no |
//! | RGB565 | yes | yes | yes | no |
//!
//! YUV to RGB uses integer BT.601 limited range coefficients. Planar
//! YUV 4:2:0 and the 12-bit Bayer formats are not displayable; Bayer frames
//! can be expanded to 16 bits per sample with [`raw12_to_raw16`].

use crate::fourcc::PixelFormat;
use std::fmt;

/// Pixel layouts a display sink can scan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayFormat {
    Rgb565,
    Xrgb8888,
    /// Semi-planar 4:2:0, chroma plane after `height` luma lines.
    Nv12,
    Yuyv,
}

impl DisplayFormat {
    /// Bytes per pixel of the first plane.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            DisplayFormat::Rgb565 | DisplayFormat::Yuyv => 2,
            DisplayFormat::Xrgb8888 => 4,
            DisplayFormat::Nv12 => 1,
        }
    }

    pub fn drm_format(self) -> u32 {
        use vincap_sys::drm;
        match self {
            DisplayFormat::Rgb565 => drm::DRM_FORMAT_RGB565,
            DisplayFormat::Xrgb8888 => drm::DRM_FORMAT_XRGB8888,
            DisplayFormat::Nv12 => drm::DRM_FORMAT_NV12,
            DisplayFormat::Yuyv => drm::DRM_FORMAT_YUYV,
        }
    }
}

impl fmt::Display for DisplayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayFormat::Rgb565 => "RGB565",
            DisplayFormat::Xrgb8888 => "XRGB8888",
            DisplayFormat::Nv12 => "NV12",
            DisplayFormat::Yuyv => "YUYV",
        };
        f.write_str(name)
    }
}

/// Geometry of a display buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayLayout {
    pub width: u32,
    pub height: u32,
    /// Bytes per line of the first plane.
    pub stride: u32,
    pub format: DisplayFormat,
}

impl DisplayLayout {
    /// Layout without line padding.
    pub fn new(width: u32, height: u32, format: DisplayFormat) -> DisplayLayout {
        DisplayLayout {
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
        }
    }

    /// Total bytes including the chroma plane for NV12.
    pub fn frame_size(&self) -> usize {
        let luma = self.stride as usize * self.height as usize;
        match self.format {
            DisplayFormat::Nv12 => luma + luma / 2,
            _ => luma,
        }
    }
}

/// A captured frame as seen by the converters.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per line of the first plane.
    pub stride: u32,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    Unsupported {
        from: PixelFormat,
        to: DisplayFormat,
    },
    BufferTooSmall {
        needed: usize,
        actual: usize,
    },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Unsupported { from, to } => {
                write!(f, "no conversion from {} to {}", from, to)
            }
            ConvertError::BufferTooSmall { needed, actual } => {
                write!(f, "buffer too small: need {} bytes, have {}", needed, actual)
            }
        }
    }
}

impl std::error::Error for ConvertError {}

/// Whether [`convert`] handles `from` into `to`.
pub fn is_supported(from: PixelFormat, to: DisplayFormat) -> bool {
    use DisplayFormat as D;
    use PixelFormat as P;
    match from {
        P::Yuyv | P::Yvyu => true,
        P::Nv12 | P::Nv21 | P::Rgb24 | P::Rgb565 => to != D::Yuyv,
        _ => false,
    }
}

/// Chroma value of a colourless pixel.
const NEUTRAL_CHROMA: u8 = 128;

// BT.601 limited range, 8-bit fixed point.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    (
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    )
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

fn unpack_rgb565(lo: u8, hi: u8) -> (u8, u8, u8) {
    let px = u16::from_le_bytes([lo, hi]);
    let r = ((px >> 11) & 0x1f) as u8;
    let g = ((px >> 5) & 0x3f) as u8;
    let b = (px & 0x1f) as u8;
    ((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
}

fn pack_rgb565(r: u8, g: u8, b: u8) -> [u8; 2] {
    let px = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
    px.to_le_bytes()
}

/// Pixel access into a validated source frame.
struct Sampler<'a> {
    src: Source<'a>,
    stride: usize,
    chroma: usize,
}

impl<'a> Sampler<'a> {
    fn new(src: Source<'a>) -> Result<Sampler<'a>, ConvertError> {
        let min_stride = src.format.bytes_per_line(src.width);
        if src.stride < min_stride {
            return Err(ConvertError::BufferTooSmall {
                needed: min_stride as usize,
                actual: src.stride as usize,
            });
        }
        let stride = src.stride as usize;
        let luma = stride * src.height as usize;
        let needed = if src.format.is_420() {
            luma + luma / 2
        } else {
            luma
        };
        if src.data.len() < needed {
            return Err(ConvertError::BufferTooSmall {
                needed,
                actual: src.data.len(),
            });
        }
        Ok(Sampler {
            src,
            stride,
            chroma: luma,
        })
    }

    fn is_yuv(&self) -> bool {
        matches!(
            self.src.format,
            PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Nv12 | PixelFormat::Nv21
        )
    }

    /// Luma and chroma at `(x, y)`; only valid for YUV sources.
    fn yuv(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let d = self.src.data;
        match self.src.format {
            PixelFormat::Yuyv | PixelFormat::Yvyu => {
                let row = y * self.stride;
                let luma = d[row + x * 2];
                let (c0, c1) = self.chroma_pair(row, x, 4, 1, 2);
                if self.src.format == PixelFormat::Yuyv {
                    (luma, c0, c1)
                } else {
                    (luma, c1, c0)
                }
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let luma = d[y * self.stride + x];
                // An odd last row shares the final complete chroma row.
                let rows = (d.len() - self.chroma) / self.stride;
                let row = self.chroma + (y / 2).min(rows.saturating_sub(1)) * self.stride;
                let (c0, c1) = self.chroma_pair(row, x, 2, 0, 1);
                if self.src.format == PixelFormat::Nv12 {
                    (luma, c0, c1)
                } else {
                    (luma, c1, c0)
                }
            }
            _ => self.rgb_as_yuv(x, y),
        }
    }

    /// The two chroma samples shared by column `x` in the line at `row`.
    ///
    /// Each pair of pixels occupies `pair_bytes`, with the samples at
    /// `first` and `first + step`. A trailing odd pixel whose pair runs past
    /// the line borrows the previous pair.
    fn chroma_pair(
        &self,
        row: usize,
        x: usize,
        pair_bytes: usize,
        first: usize,
        step: usize,
    ) -> (u8, u8) {
        let d = self.src.data;
        let end = (row + self.stride).min(d.len());
        let mut at = row + (x / 2) * pair_bytes + first;
        if at + step >= end && x >= 2 {
            at -= pair_bytes;
        }
        if at + step < end {
            (d[at], d[at + step])
        } else {
            (NEUTRAL_CHROMA, NEUTRAL_CHROMA)
        }
    }

    fn rgb(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let d = self.src.data;
        match self.src.format {
            PixelFormat::Rgb24 => {
                let p = y * self.stride + x * 3;
                (d[p], d[p + 1], d[p + 2])
            }
            PixelFormat::Rgb565 => {
                let p = y * self.stride + x * 2;
                unpack_rgb565(d[p], d[p + 1])
            }
            _ => {
                let (luma, u, v) = self.yuv(x, y);
                yuv_to_rgb(luma, u, v)
            }
        }
    }

    fn rgb_as_yuv(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let (r, g, b) = self.rgb(x, y);
        rgb_to_yuv(r, g, b)
    }

    fn sample_yuv(&self, x: usize, y: usize) -> (u8, u8, u8) {
        if self.is_yuv() {
            self.yuv(x, y)
        } else {
            self.rgb_as_yuv(x, y)
        }
    }
}

/// Converts `src` into `dst` laid out as `layout`.
pub fn convert(src: &Source, layout: &DisplayLayout, dst: &mut [u8]) -> Result<(), ConvertError> {
    if !is_supported(src.format, layout.format) {
        return Err(ConvertError::Unsupported {
            from: src.format,
            to: layout.format,
        });
    }
    let min_stride = layout.width * layout.format.bytes_per_pixel();
    if layout.stride < min_stride {
        return Err(ConvertError::BufferTooSmall {
            needed: min_stride as usize,
            actual: layout.stride as usize,
        });
    }
    let needed = layout.frame_size();
    if dst.len() < needed {
        return Err(ConvertError::BufferTooSmall {
            needed,
            actual: dst.len(),
        });
    }
    let sampler = Sampler::new(*src)?;

    let mut w = src.width.min(layout.width) as usize;
    let mut h = src.height.min(layout.height) as usize;
    match layout.format {
        DisplayFormat::Nv12 => {
            w &= !1;
            h &= !1;
        }
        DisplayFormat::Yuyv => w &= !1,
        _ => {}
    }

    let stride = layout.stride as usize;
    match (src.format, layout.format) {
        (PixelFormat::Yuyv, DisplayFormat::Yuyv)
        | (PixelFormat::Rgb565, DisplayFormat::Rgb565) => {
            copy_rows(src.data, sampler.stride, dst, stride, w * 2, h);
        }
        (PixelFormat::Nv12, DisplayFormat::Nv12) => {
            copy_rows(src.data, sampler.stride, dst, stride, w, h);
            let chroma_dst = stride * layout.height as usize;
            copy_rows(
                &src.data[sampler.chroma..],
                sampler.stride,
                &mut dst[chroma_dst..],
                stride,
                w,
                h / 2,
            );
        }
        (_, DisplayFormat::Rgb565) => {
            for y in 0..h {
                for x in 0..w {
                    let (r, g, b) = sampler.rgb(x, y);
                    let p = y * stride + x * 2;
                    dst[p..p + 2].copy_from_slice(&pack_rgb565(r, g, b));
                }
            }
        }
        (_, DisplayFormat::Xrgb8888) => {
            for y in 0..h {
                for x in 0..w {
                    let (r, g, b) = sampler.rgb(x, y);
                    let p = y * stride + x * 4;
                    dst[p..p + 4].copy_from_slice(&[b, g, r, 0xff]);
                }
            }
        }
        (_, DisplayFormat::Nv12) => {
            let chroma_dst = stride * layout.height as usize;
            for y in 0..h {
                for x in 0..w {
                    let (luma, u, v) = sampler.sample_yuv(x, y);
                    dst[y * stride + x] = luma;
                    if y % 2 == 0 && x % 2 == 0 {
                        let uv = chroma_dst + (y / 2) * stride + x;
                        dst[uv] = u;
                        dst[uv + 1] = v;
                    }
                }
            }
        }
        (_, DisplayFormat::Yuyv) => {
            for y in 0..h {
                for x in (0..w).step_by(2) {
                    let (y0, u, v) = sampler.sample_yuv(x, y);
                    let (y1, _, _) = sampler.sample_yuv(x + 1, y);
                    let p = y * stride + x * 2;
                    dst[p..p + 4].copy_from_slice(&[y0, u, y1, v]);
                }
            }
        }
    }
    Ok(())
}

fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    if row_bytes == 0 || rows == 0 {
        return;
    }
    for (s, d) in src
        .chunks(src_stride)
        .zip(dst.chunks_mut(dst_stride))
        .take(rows)
    {
        d[..row_bytes].copy_from_slice(&s[..row_bytes]);
    }
}

/// Expands MIPI packed 12-bit Bayer data to little-endian 16-bit samples.
///
/// Every two pixels occupy three bytes: the high eight bits of each pixel
/// followed by a byte holding both low nibbles, first pixel in bits 0-3.
/// `dst` receives `width * height` samples with no padding.
pub fn raw12_to_raw16(
    width: u32,
    height: u32,
    stride: u32,
    src: &[u8],
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    let (w, h, stride) = (width as usize, height as usize, stride as usize);
    let row_in = (w * 3 + 1) / 2;
    let needed_src = if h == 0 { 0 } else { stride * (h - 1) + row_in };
    if src.len() < needed_src {
        return Err(ConvertError::BufferTooSmall {
            needed: needed_src,
            actual: src.len(),
        });
    }
    let needed_dst = w * h * 2;
    if dst.len() < needed_dst {
        return Err(ConvertError::BufferTooSmall {
            needed: needed_dst,
            actual: dst.len(),
        });
    }

    for y in 0..h {
        let line = &src[y * stride..];
        let out = &mut dst[y * w * 2..(y + 1) * w * 2];
        for x in (0..w).step_by(2) {
            let p = x / 2 * 3;
            let lows = line.get(p + 2).copied().unwrap_or(0);
            let p0 = (u16::from(line[p]) << 4) | u16::from(lows & 0x0f);
            out[x * 2..x * 2 + 2].copy_from_slice(&p0.to_le_bytes());
            if x + 1 < w {
                let p1 = (u16::from(line[p + 1]) << 4) | u16::from(lows >> 4);
                out[x * 2 + 2..x * 2 + 4].copy_from_slice(&p1.to_le_bytes());
            }
        }
    }
    Ok(())
}
