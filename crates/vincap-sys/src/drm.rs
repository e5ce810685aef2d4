// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! DRM/KMS ABI (`drm/drm.h`, `drm/drm_mode.h`, `drm/drm_fourcc.h`).

use crate::{fourcc, zeroed_default};
use libc::c_uint;
use nix::ioctl_readwrite;

pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const DRM_FORMAT_RGB565: u32 = fourcc(b'R', b'G', b'1', b'6');
pub const DRM_FORMAT_RGB888: u32 = fourcc(b'R', b'G', b'2', b'4');
pub const DRM_FORMAT_NV12: u32 = fourcc(b'N', b'V', b'1', b'2');
pub const DRM_FORMAT_NV21: u32 = fourcc(b'N', b'V', b'2', b'1');
pub const DRM_FORMAT_YUYV: u32 = fourcc(b'Y', b'U', b'Y', b'V');
pub const DRM_FORMAT_YVYU: u32 = fourcc(b'Y', b'V', b'Y', b'U');

pub const DRM_MODE_CONNECTED: u32 = 1;
pub const DRM_MODE_TYPE_PREFERRED: u32 = 1 << 3;
pub const DRM_MODE_PAGE_FLIP_EVENT: u32 = 0x01;

pub const DRM_EVENT_VBLANK: u32 = 0x01;
pub const DRM_EVENT_FLIP_COMPLETE: u32 = 0x02;

pub const DRM_CLOEXEC: u32 = libc::O_CLOEXEC as u32;
pub const DRM_RDWR: u32 = libc::O_RDWR as u32;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_card_res {
    pub fb_id_ptr: u64,
    pub crtc_id_ptr: u64,
    pub connector_id_ptr: u64,
    pub encoder_id_ptr: u64,
    pub count_fbs: u32,
    pub count_crtcs: u32,
    pub count_connectors: u32,
    pub count_encoders: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_modeinfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub type_: u32,
    pub name: [u8; 32],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_get_connector {
    pub encoders_ptr: u64,
    pub modes_ptr: u64,
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub count_modes: u32,
    pub count_props: u32,
    pub count_encoders: u32,
    pub encoder_id: u32,
    pub connector_id: u32,
    pub connector_type: u32,
    pub connector_type_id: u32,
    pub connection: u32,
    pub mm_width: u32,
    pub mm_height: u32,
    pub subpixel: u32,
    pub pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_get_encoder {
    pub encoder_id: u32,
    pub encoder_type: u32,
    pub crtc_id: u32,
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_crtc {
    pub set_connectors_ptr: u64,
    pub count_connectors: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    pub mode_valid: u32,
    pub mode: drm_mode_modeinfo,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_create_dumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_map_dumb {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_destroy_dumb {
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_fb_cmd2 {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub flags: u32,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub modifier: [u64; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_mode_crtc_page_flip {
    pub crtc_id: u32,
    pub fb_id: u32,
    pub flags: u32,
    pub reserved: u32,
    pub user_data: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_prime_handle {
    pub handle: u32,
    pub flags: u32,
    pub fd: i32,
}

/// Header of every record read from a DRM file descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_event {
    pub type_: u32,
    pub length: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct drm_event_vblank {
    pub base: drm_event,
    pub user_data: u64,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub sequence: u32,
    pub crtc_id: u32,
}

zeroed_default!(
    drm_mode_card_res,
    drm_mode_modeinfo,
    drm_mode_get_connector,
    drm_mode_get_encoder,
    drm_mode_crtc,
    drm_mode_create_dumb,
    drm_mode_map_dumb,
    drm_mode_destroy_dumb,
    drm_mode_fb_cmd2,
    drm_mode_crtc_page_flip,
    drm_prime_handle,
);

ioctl_readwrite!(drm_ioctl_prime_handle_to_fd, b'd', 0x2d, drm_prime_handle);
ioctl_readwrite!(drm_ioctl_mode_getresources, b'd', 0xA0, drm_mode_card_res);
ioctl_readwrite!(drm_ioctl_mode_setcrtc, b'd', 0xA2, drm_mode_crtc);
ioctl_readwrite!(drm_ioctl_mode_getencoder, b'd', 0xA6, drm_mode_get_encoder);
ioctl_readwrite!(drm_ioctl_mode_getconnector, b'd', 0xA7, drm_mode_get_connector);
ioctl_readwrite!(drm_ioctl_mode_rmfb, b'd', 0xAF, c_uint);
ioctl_readwrite!(drm_ioctl_mode_page_flip, b'd', 0xB0, drm_mode_crtc_page_flip);
ioctl_readwrite!(drm_ioctl_mode_create_dumb, b'd', 0xB2, drm_mode_create_dumb);
ioctl_readwrite!(drm_ioctl_mode_map_dumb, b'd', 0xB3, drm_mode_map_dumb);
ioctl_readwrite!(drm_ioctl_mode_destroy_dumb, b'd', 0xB4, drm_mode_destroy_dumb);
ioctl_readwrite!(drm_ioctl_mode_addfb2, b'd', 0xB8, drm_mode_fb_cmd2);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_struct_sizes() {
        assert_eq!(size_of::<drm_mode_card_res>(), 64);
        assert_eq!(size_of::<drm_mode_modeinfo>(), 68);
        assert_eq!(size_of::<drm_mode_get_connector>(), 80);
        assert_eq!(size_of::<drm_mode_get_encoder>(), 20);
        assert_eq!(size_of::<drm_mode_crtc>(), 104);
        assert_eq!(size_of::<drm_mode_create_dumb>(), 32);
        assert_eq!(size_of::<drm_mode_map_dumb>(), 16);
        assert_eq!(size_of::<drm_mode_fb_cmd2>(), 104);
        assert_eq!(size_of::<drm_mode_crtc_page_flip>(), 24);
        assert_eq!(size_of::<drm_prime_handle>(), 12);
        assert_eq!(size_of::<drm_event_vblank>(), 32);
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(DRM_FORMAT_XRGB8888, u32::from_le_bytes(*b"XR24"));
        assert_eq!(DRM_FORMAT_RGB565, u32::from_le_bytes(*b"RG16"));
    }
}
