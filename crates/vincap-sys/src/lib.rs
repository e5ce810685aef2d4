// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Low-level Linux kernel ABI used by the vincap capture pipeline.
//!
//! The crate mirrors the userspace headers for the three kernel interfaces
//! the pipeline talks to:
//!
//! - [`v4l2`] - `linux/videodev2.h` and `linux/v4l2-subdev.h` structures plus
//!   the StarFive ISP private firmware-load request.
//! - [`drm`] - `drm/drm.h` and `drm/drm_mode.h` KMS structures, dumb buffers,
//!   PRIME export and page-flip events.
//! - [`fb`] - `linux/fb.h` screen information.
//!
//! Every ioctl is exposed as an `unsafe fn(fd, *mut T) -> nix::Result<c_int>`
//! generated with the `nix` ioctl macros. No retry or validation is done here;
//! callers own the file descriptors and the memory passed to the kernel.

#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

pub mod drm;
pub mod fb;
pub mod v4l2;

pub use libc;
pub use nix;

/// Implements `Default` as the all-zero bit pattern for plain kernel structs.
///
/// Only used for `#[repr(C)]` types made of integers, arrays and unions of
/// those, for which zero is a valid value and what the kernel expects for
/// reserved fields.
macro_rules! zeroed_default {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Default for $ty {
                fn default() -> Self {
                    // SAFETY: the type is a C struct of integers for which the
                    // all-zero pattern is valid.
                    unsafe { std::mem::zeroed() }
                }
            }
        )*
    };
}
pub(crate) use zeroed_default;

/// Builds a little-endian fourcc code the way `v4l2_fourcc()` and
/// `fourcc_code()` do in the kernel headers.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_matches_le_bytes() {
        assert_eq!(fourcc(b'N', b'V', b'1', b'2'), u32::from_le_bytes(*b"NV12"));
        assert_eq!(fourcc(b'X', b'R', b'2', b'4'), 0x3432_5258);
    }
}
