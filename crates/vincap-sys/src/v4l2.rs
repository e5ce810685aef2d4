// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 capture ABI (`linux/videodev2.h`, `linux/v4l2-subdev.h`).

use crate::{fourcc, zeroed_default};
use libc::{c_int, c_ulong, timeval};
use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

pub const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const V4L2_CAP_READWRITE: u32 = 0x0100_0000;
pub const V4L2_CAP_STREAMING: u32 = 0x0400_0000;
pub const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

pub const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;

pub const V4L2_MEMORY_MMAP: u32 = 1;
pub const V4L2_MEMORY_USERPTR: u32 = 2;
pub const V4L2_MEMORY_DMABUF: u32 = 4;

pub const V4L2_FIELD_ANY: u32 = 0;
pub const V4L2_FIELD_INTERLACED: u32 = 4;

pub const V4L2_SEL_TGT_CROP: u32 = 0x0000;

pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;

pub const V4L2_PIX_FMT_RGB565: u32 = fourcc(b'R', b'G', b'B', b'P');
pub const V4L2_PIX_FMT_RGB24: u32 = fourcc(b'R', b'G', b'B', b'3');
pub const V4L2_PIX_FMT_YUV420: u32 = fourcc(b'Y', b'U', b'1', b'2');
pub const V4L2_PIX_FMT_YUYV: u32 = fourcc(b'Y', b'U', b'Y', b'V');
pub const V4L2_PIX_FMT_YVYU: u32 = fourcc(b'Y', b'V', b'Y', b'U');
pub const V4L2_PIX_FMT_NV12: u32 = fourcc(b'N', b'V', b'1', b'2');
pub const V4L2_PIX_FMT_NV21: u32 = fourcc(b'N', b'V', b'2', b'1');
pub const V4L2_PIX_FMT_SRGGB12: u32 = fourcc(b'R', b'G', b'1', b'2');
pub const V4L2_PIX_FMT_SGRBG12: u32 = fourcc(b'B', b'A', b'1', b'2');
pub const V4L2_PIX_FMT_SGBRG12: u32 = fourcc(b'G', b'B', b'1', b'2');
pub const V4L2_PIX_FMT_SBGGR12: u32 = fourcc(b'B', b'G', b'1', b'2');

/// Media bus code for 10-bit RGGB sensors, used when enumerating sizes.
pub const MEDIA_BUS_FMT_SRGGB10_1X10: u32 = 0x300f;

/// Length of the firmware name carried by the StarFive ISP load request.
pub const STFISP_FW_NAME_LEN: usize = 30;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_capability {
    pub driver: [u8; 16],
    pub card: [u8; 32],
    pub bus_info: [u8; 32],
    pub version: u32,
    pub capabilities: u32,
    pub device_caps: u32,
    pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_pix_format {
    pub width: u32,
    pub height: u32,
    pub pixelformat: u32,
    pub field: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
    pub colorspace: u32,
    pub priv_: u32,
    pub flags: u32,
    pub ycbcr_enc: u32,
    pub quantization: u32,
    pub xfer_func: u32,
}

/// The `fmt` union of `struct v4l2_format`.
///
/// The kernel union also holds `struct v4l2_window`, which carries pointers,
/// so the union is pointer aligned. `_align` reproduces that.
#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_format_fmt {
    pub pix: v4l2_pix_format,
    pub raw_data: [u8; 200],
    _align: [c_ulong; 200 / std::mem::size_of::<c_ulong>()],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_format {
    pub type_: u32,
    pub fmt: v4l2_format_fmt,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_requestbuffers {
    pub count: u32,
    pub type_: u32,
    pub memory: u32,
    pub capabilities: u32,
    pub flags: u8,
    pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_timecode {
    pub type_: u32,
    pub flags: u32,
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_buffer_m {
    pub offset: u32,
    pub userptr: c_ulong,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_buffer {
    pub index: u32,
    pub type_: u32,
    pub bytesused: u32,
    pub flags: u32,
    pub field: u32,
    pub timestamp: timeval,
    pub timecode: v4l2_timecode,
    pub sequence: u32,
    pub memory: u32,
    pub m: v4l2_buffer_m,
    pub length: u32,
    pub reserved2: u32,
    pub request_fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct v4l2_fract {
    pub numerator: u32,
    pub denominator: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_captureparm {
    pub capability: u32,
    pub capturemode: u32,
    pub timeperframe: v4l2_fract,
    pub extendedmode: u32,
    pub readbuffers: u32,
    pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union v4l2_streamparm_parm {
    pub capture: v4l2_captureparm,
    pub raw_data: [u8; 200],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct v4l2_streamparm {
    pub type_: u32,
    pub parm: v4l2_streamparm_parm,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct v4l2_rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_cropcap {
    pub type_: u32,
    pub bounds: v4l2_rect,
    pub defrect: v4l2_rect,
    pub pixelaspect: v4l2_fract,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_crop {
    pub type_: u32,
    pub c: v4l2_rect,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_selection {
    pub type_: u32,
    pub target: u32,
    pub flags: u32,
    pub r: v4l2_rect,
    pub reserved: [u32; 9],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct v4l2_subdev_frame_size_enum {
    pub index: u32,
    pub pad: u32,
    pub code: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub which: u32,
    pub stream: u32,
    pub reserved: [u32; 7],
}

/// Argument of the StarFive ISP `VIDIOC_STFISP_LOAD_FW` private ioctl.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct stfisp_fw_info {
    pub filename: [u8; STFISP_FW_NAME_LEN],
}

zeroed_default!(
    v4l2_capability,
    v4l2_pix_format,
    v4l2_format,
    v4l2_requestbuffers,
    v4l2_buffer,
    v4l2_fract,
    v4l2_captureparm,
    v4l2_streamparm,
    v4l2_cropcap,
    v4l2_crop,
    v4l2_selection,
    v4l2_subdev_frame_size_enum,
    stfisp_fw_info,
);

/// `BASE_VIDIOC_PRIVATE` from `linux/videodev2.h`.
const BASE_VIDIOC_PRIVATE: u8 = 192;

ioctl_read!(vidioc_querycap, b'V', 0, v4l2_capability);
ioctl_readwrite!(vidioc_g_fmt, b'V', 4, v4l2_format);
ioctl_readwrite!(vidioc_s_fmt, b'V', 5, v4l2_format);
ioctl_readwrite!(vidioc_reqbufs, b'V', 8, v4l2_requestbuffers);
ioctl_readwrite!(vidioc_querybuf, b'V', 9, v4l2_buffer);
ioctl_readwrite!(vidioc_qbuf, b'V', 15, v4l2_buffer);
ioctl_readwrite!(vidioc_dqbuf, b'V', 17, v4l2_buffer);
ioctl_write_ptr!(vidioc_streamon, b'V', 18, c_int);
ioctl_write_ptr!(vidioc_streamoff, b'V', 19, c_int);
ioctl_readwrite!(vidioc_g_parm, b'V', 21, v4l2_streamparm);
ioctl_readwrite!(vidioc_s_parm, b'V', 22, v4l2_streamparm);
ioctl_readwrite!(vidioc_cropcap, b'V', 58, v4l2_cropcap);
ioctl_write_ptr!(vidioc_s_crop, b'V', 60, v4l2_crop);
ioctl_readwrite!(vidioc_subdev_enum_frame_size, b'V', 74, v4l2_subdev_frame_size_enum);
ioctl_readwrite!(vidioc_g_selection, b'V', 94, v4l2_selection);
ioctl_readwrite!(vidioc_s_selection, b'V', 95, v4l2_selection);
ioctl_write_ptr!(
    vidioc_stfisp_load_fw,
    b'V',
    BASE_VIDIOC_PRIVATE + 1,
    stfisp_fw_info
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_fixed_struct_sizes() {
        assert_eq!(size_of::<v4l2_capability>(), 104);
        assert_eq!(size_of::<v4l2_pix_format>(), 48);
        assert_eq!(size_of::<v4l2_requestbuffers>(), 20);
        assert_eq!(size_of::<v4l2_timecode>(), 16);
        assert_eq!(size_of::<v4l2_streamparm>(), 204);
        assert_eq!(size_of::<v4l2_cropcap>(), 44);
        assert_eq!(size_of::<v4l2_crop>(), 20);
        assert_eq!(size_of::<v4l2_selection>(), 64);
        assert_eq!(size_of::<v4l2_subdev_frame_size_enum>(), 64);
        assert_eq!(size_of::<stfisp_fw_info>(), STFISP_FW_NAME_LEN);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_pointer_sized_struct_sizes() {
        assert_eq!(size_of::<v4l2_format>(), 208);
        assert_eq!(size_of::<v4l2_buffer>(), 88);
    }

    #[test]
    fn test_default_is_zeroed() {
        let buf = v4l2_buffer::default();
        assert_eq!(buf.index, 0);
        assert_eq!(unsafe { buf.m.userptr }, 0);
        let fmt = v4l2_format::default();
        assert_eq!(unsafe { fmt.fmt.pix.pixelformat }, 0);
    }

    #[test]
    fn test_pixel_format_codes() {
        assert_eq!(V4L2_PIX_FMT_NV12, u32::from_le_bytes(*b"NV12"));
        assert_eq!(V4L2_PIX_FMT_RGB565, u32::from_le_bytes(*b"RGBP"));
        assert_eq!(V4L2_PIX_FMT_SGRBG12, u32::from_le_bytes(*b"BA12"));
    }
}
