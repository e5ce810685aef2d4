// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Sensor subdevice and ISP helpers that run outside a capture session.

use crate::{retry, Error};
use nix::errno::Errno;
use std::{
    fs::{File, OpenOptions},
    os::{fd::AsRawFd, unix::fs::OpenOptionsExt},
    path::Path,
};
use vincap_sys::{libc, v4l2 as sys};

/// Number of frame size entries queried by [`sensor_frame_sizes`].
pub const FRAME_SIZE_ENTRIES: u32 = 4;

/// One entry of the sensor's frame size enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub index: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

fn open_node(path: &Path) -> Result<File, Error> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?)
}

/// Asks the StarFive ISP behind `path` to load the firmware file `name`.
///
/// The kernel record holds the name NUL terminated in 30 bytes, so longer
/// names are rejected before touching the device.
pub fn load_firmware(path: impl AsRef<Path>, name: &str) -> Result<(), Error> {
    let path = path.as_ref();
    let mut info = sys::stfisp_fw_info::default();
    if name.is_empty() || name.len() >= sys::STFISP_FW_NAME_LEN {
        return Err(Error::Unsupported(format!(
            "firmware name must be 1 to {} bytes: {}",
            sys::STFISP_FW_NAME_LEN - 1,
            name
        )));
    }
    info.filename[..name.len()].copy_from_slice(name.as_bytes());

    let file = open_node(path)?;
    log::info!("loading firmware {} through {}", name, path.display());
    // SAFETY: `info` is a valid in parameter for the firmware load request.
    match retry(|| unsafe { sys::vidioc_stfisp_load_fw(file.as_raw_fd(), &info) }) {
        Ok(_) => Ok(()),
        Err(Errno::EINVAL) | Err(Errno::ENOTTY) => Err(Error::NotACaptureDevice(format!(
            "{} is no V4L2 device",
            path.display()
        ))),
        Err(errno) => Err(Error::Device {
            op: "VIDIOC_STFISP_LOAD_FW",
            errno,
        }),
    }
}

/// Enumerates the first [`FRAME_SIZE_ENTRIES`] active frame sizes of the
/// 10-bit RGGB sensor subdevice at `path`.
pub fn sensor_frame_sizes(path: impl AsRef<Path>) -> Result<Vec<FrameSize>, Error> {
    let file = open_node(path.as_ref())?;
    let mut sizes = Vec::new();
    for index in 0..FRAME_SIZE_ENTRIES {
        let mut fse = sys::v4l2_subdev_frame_size_enum {
            index,
            code: sys::MEDIA_BUS_FMT_SRGGB10_1X10,
            which: sys::V4L2_SUBDEV_FORMAT_ACTIVE,
            ..Default::default()
        };
        // SAFETY: `fse` is a valid in/out parameter for the enumeration.
        retry(|| unsafe { sys::vidioc_subdev_enum_frame_size(file.as_raw_fd(), &mut fse) })
            .map_err(Error::device("VIDIOC_SUBDEV_ENUM_FRAME_SIZE"))?;
        log::debug!(
            "frame size {}: {}x{}",
            index,
            fse.min_width,
            fse.min_height
        );
        sizes.push(FrameSize {
            index,
            min_width: fse.min_width,
            min_height: fse.min_height,
            max_width: fse.max_width,
            max_height: fse.max_height,
        });
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_firmware_name_too_long() {
        let name = "a".repeat(sys::STFISP_FW_NAME_LEN);
        let err = load_firmware("/dev/null", &name).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_firmware_rejects_non_v4l2_node() {
        let err = load_firmware("/dev/null", "stf_isp0_fw.bin").unwrap_err();
        assert!(matches!(err, Error::NotACaptureDevice(_)));
    }

    #[test]
    fn test_sizes_on_non_subdev_fails() {
        let err = sensor_frame_sizes("/dev/null").unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                op: "VIDIOC_SUBDEV_ENUM_FRAME_SIZE",
                ..
            }
        ));
    }

    #[test]
    #[ignore = "requires the StarFive sensor subdevice at /dev/v4l-subdev0"]
    #[serial]
    fn test_sensor_frame_sizes_hardware() -> Result<(), Error> {
        let sizes = sensor_frame_sizes("/dev/v4l-subdev0")?;
        assert_eq!(sizes.len(), FRAME_SIZE_ENTRIES as usize);
        Ok(())
    }
}
