// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! DRM/KMS scan-out through dumb buffers and legacy page flips.

use super::FlipSink;
use crate::{
    convert::{DisplayFormat, DisplayLayout},
    fourcc::PixelFormat,
    memory::{DmaBufHandle, MappedRegion},
    retry, Error,
};
use nix::errno::Errno;
use std::{
    fmt,
    fs::OpenOptions,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    sync::Arc,
};
use vincap_sys::{drm as sys, libc};

/// Scan-out slots for [`DrmDisplay::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmBuffers {
    /// Two CPU mapped XRGB8888 buffers at the display mode size. Frames are
    /// converted into them.
    Scanout,
    /// Buffers in the capture format that the capture device fills
    /// directly through exported DMA buffers.
    Capture {
        width: u32,
        height: u32,
        format: PixelFormat,
        count: u32,
    },
}

const SCANOUT_SLOTS: usize = 2;

/// A dumb buffer registered as a framebuffer. Removed on drop.
struct DumbBuffer {
    fd: Arc<OwnedFd>,
    handle: u32,
    fb_id: u32,
    pitch: u32,
    size: u64,
    map: Option<MappedRegion>,
}

impl DumbBuffer {
    fn create(
        fd: &Arc<OwnedFd>,
        width: u32,
        height: u32,
        fourcc: u32,
        bpp: u32,
        rows: u32,
        semi_planar: bool,
    ) -> Result<DumbBuffer, Error> {
        let raw = fd.as_raw_fd();
        let mut create = sys::drm_mode_create_dumb {
            width,
            height: rows,
            bpp,
            ..Default::default()
        };
        // SAFETY: `create` is a valid in/out parameter for CREATE_DUMB.
        retry(|| unsafe { sys::drm_ioctl_mode_create_dumb(raw, &mut create) })
            .map_err(Error::device("DRM_IOCTL_MODE_CREATE_DUMB"))?;

        // From here on Drop cleans up whatever was created.
        let mut buf = DumbBuffer {
            fd: Arc::clone(fd),
            handle: create.handle,
            fb_id: 0,
            pitch: create.pitch,
            size: create.size,
            map: None,
        };

        let mut cmd = sys::drm_mode_fb_cmd2 {
            width,
            height,
            pixel_format: fourcc,
            ..Default::default()
        };
        cmd.handles[0] = create.handle;
        cmd.pitches[0] = create.pitch;
        if semi_planar {
            cmd.handles[1] = create.handle;
            cmd.pitches[1] = create.pitch;
            cmd.offsets[1] = create.pitch * height;
        }
        // SAFETY: `cmd` is a valid in/out parameter for ADDFB2.
        retry(|| unsafe { sys::drm_ioctl_mode_addfb2(raw, &mut cmd) })
            .map_err(Error::device("DRM_IOCTL_MODE_ADDFB2"))?;
        buf.fb_id = cmd.fb_id;
        Ok(buf)
    }

    fn map(&mut self) -> Result<(), Error> {
        let mut req = sys::drm_mode_map_dumb {
            handle: self.handle,
            ..Default::default()
        };
        // SAFETY: `req` is a valid in/out parameter for MAP_DUMB.
        retry(|| unsafe { sys::drm_ioctl_mode_map_dumb(self.fd.as_raw_fd(), &mut req) })
            .map_err(Error::device("DRM_IOCTL_MODE_MAP_DUMB"))?;
        let offset = i64::try_from(req.offset)?;
        let mut region = MappedRegion::map(&*self.fd, offset, usize::try_from(self.size)?)?;
        region.as_mut_slice().fill(0);
        self.map = Some(region);
        Ok(())
    }

    fn export(&self) -> Result<DmaBufHandle, Error> {
        let mut prime = sys::drm_prime_handle {
            handle: self.handle,
            flags: sys::DRM_CLOEXEC | sys::DRM_RDWR,
            fd: -1,
        };
        // SAFETY: `prime` is a valid in/out parameter for PRIME_HANDLE_TO_FD.
        retry(|| unsafe { sys::drm_ioctl_prime_handle_to_fd(self.fd.as_raw_fd(), &mut prime) })
            .map_err(Error::device("DRM_IOCTL_PRIME_HANDLE_TO_FD"))?;
        // SAFETY: the kernel just created this descriptor for us.
        Ok(unsafe { DmaBufHandle::from_raw_fd(prime.fd as RawFd, usize::try_from(self.size)?) })
    }
}

impl Drop for DumbBuffer {
    fn drop(&mut self) {
        self.map = None;
        let raw = self.fd.as_raw_fd();
        if self.fb_id != 0 {
            let mut fb_id = self.fb_id;
            // SAFETY: `fb_id` is a valid in/out parameter for RMFB.
            if let Err(err) = unsafe { sys::drm_ioctl_mode_rmfb(raw, &mut fb_id) } {
                log::warn!("failed to remove framebuffer {}: {}", self.fb_id, err);
            }
        }
        let mut destroy = sys::drm_mode_destroy_dumb {
            handle: self.handle,
        };
        // SAFETY: `destroy` is a valid in/out parameter for DESTROY_DUMB.
        if let Err(err) = unsafe { sys::drm_ioctl_mode_destroy_dumb(raw, &mut destroy) } {
            log::warn!("failed to destroy dumb buffer {}: {}", self.handle, err);
        }
    }
}

/// Output path chosen at open: connector, CRTC and mode.
struct Output {
    connector_id: u32,
    crtc_id: u32,
    mode: sys::drm_mode_modeinfo,
}

fn get_resources(fd: RawFd) -> Result<(Vec<u32>, Vec<u32>), Error> {
    let mut res = sys::drm_mode_card_res::default();
    // SAFETY: all array pointers are null with zero counts.
    retry(|| unsafe { sys::drm_ioctl_mode_getresources(fd, &mut res) })
        .map_err(Error::device("DRM_IOCTL_MODE_GETRESOURCES"))?;

    let mut crtcs = vec![0u32; res.count_crtcs as usize];
    let mut connectors = vec![0u32; res.count_connectors as usize];
    let mut second = sys::drm_mode_card_res {
        crtc_id_ptr: crtcs.as_mut_ptr() as u64,
        connector_id_ptr: connectors.as_mut_ptr() as u64,
        count_crtcs: res.count_crtcs,
        count_connectors: res.count_connectors,
        ..Default::default()
    };
    // SAFETY: the arrays hold the counts the kernel reported above.
    retry(|| unsafe { sys::drm_ioctl_mode_getresources(fd, &mut second) })
        .map_err(Error::device("DRM_IOCTL_MODE_GETRESOURCES"))?;
    crtcs.truncate(second.count_crtcs.min(res.count_crtcs) as usize);
    connectors.truncate(second.count_connectors.min(res.count_connectors) as usize);
    Ok((crtcs, connectors))
}

struct Connector {
    id: u32,
    connected: bool,
    encoder_id: u32,
    encoders: Vec<u32>,
    modes: Vec<sys::drm_mode_modeinfo>,
}

fn get_connector(fd: RawFd, id: u32) -> Result<Connector, Error> {
    let mut probe = sys::drm_mode_get_connector {
        connector_id: id,
        ..Default::default()
    };
    // SAFETY: all array pointers are null with zero counts.
    retry(|| unsafe { sys::drm_ioctl_mode_getconnector(fd, &mut probe) })
        .map_err(Error::device("DRM_IOCTL_MODE_GETCONNECTOR"))?;

    let mut modes = vec![sys::drm_mode_modeinfo::default(); probe.count_modes as usize];
    let mut encoders = vec![0u32; probe.count_encoders as usize];
    let mut conn = sys::drm_mode_get_connector {
        connector_id: id,
        modes_ptr: modes.as_mut_ptr() as u64,
        count_modes: probe.count_modes,
        encoders_ptr: encoders.as_mut_ptr() as u64,
        count_encoders: probe.count_encoders,
        ..Default::default()
    };
    // SAFETY: the arrays hold the counts the kernel reported above.
    retry(|| unsafe { sys::drm_ioctl_mode_getconnector(fd, &mut conn) })
        .map_err(Error::device("DRM_IOCTL_MODE_GETCONNECTOR"))?;
    modes.truncate(conn.count_modes.min(probe.count_modes) as usize);
    encoders.truncate(conn.count_encoders.min(probe.count_encoders) as usize);

    Ok(Connector {
        id,
        connected: conn.connection == sys::DRM_MODE_CONNECTED,
        encoder_id: conn.encoder_id,
        encoders,
        modes,
    })
}

fn get_encoder(fd: RawFd, id: u32) -> Result<sys::drm_mode_get_encoder, Error> {
    let mut enc = sys::drm_mode_get_encoder {
        encoder_id: id,
        ..Default::default()
    };
    // SAFETY: `enc` is a valid in/out parameter for GETENCODER.
    retry(|| unsafe { sys::drm_ioctl_mode_getencoder(fd, &mut enc) })
        .map_err(Error::device("DRM_IOCTL_MODE_GETENCODER"))?;
    Ok(enc)
}

fn find_crtc(fd: RawFd, conn: &Connector, crtcs: &[u32]) -> Result<u32, Error> {
    if conn.encoder_id != 0 {
        let enc = get_encoder(fd, conn.encoder_id)?;
        if enc.crtc_id != 0 {
            return Ok(enc.crtc_id);
        }
    }
    for &encoder_id in &conn.encoders {
        let enc = get_encoder(fd, encoder_id)?;
        for (i, &crtc) in crtcs.iter().enumerate() {
            if i < 32 && enc.possible_crtcs & (1 << i) != 0 {
                return Ok(crtc);
            }
        }
    }
    Err(Error::Unsupported(format!(
        "no CRTC available for connector {}",
        conn.id
    )))
}

fn preferred_mode(modes: &[sys::drm_mode_modeinfo]) -> Option<sys::drm_mode_modeinfo> {
    modes
        .iter()
        .find(|m| m.type_ & sys::DRM_MODE_TYPE_PREFERRED != 0)
        .or_else(|| modes.first())
        .copied()
}

fn mode_name(mode: &sys::drm_mode_modeinfo) -> String {
    let end = mode.name.iter().position(|b| *b == 0).unwrap_or(mode.name.len());
    String::from_utf8_lossy(&mode.name[..end]).into_owned()
}

fn select_output(fd: RawFd, connector: Option<u32>) -> Result<Output, Error> {
    let (crtcs, connectors) = get_resources(fd)?;
    let conn = match connector {
        Some(id) => {
            let conn = get_connector(fd, id)?;
            if !conn.connected {
                return Err(Error::Unsupported(format!("connector {} is not connected", id)));
            }
            conn
        }
        None => {
            let mut found = None;
            for id in connectors {
                let conn = get_connector(fd, id)?;
                if conn.connected && !conn.modes.is_empty() {
                    found = Some(conn);
                    break;
                }
            }
            found.ok_or_else(|| Error::Unsupported("no connected DRM connector".into()))?
        }
    };
    let mode = preferred_mode(&conn.modes)
        .ok_or_else(|| Error::Unsupported(format!("connector {} reports no modes", conn.id)))?;
    let crtc_id = find_crtc(fd, &conn, &crtcs)?;
    Ok(Output {
        connector_id: conn.id,
        crtc_id,
        mode,
    })
}

/// Bits per pixel and row count of a dumb buffer holding `format`.
fn dumb_geometry(format: PixelFormat, height: u32) -> Result<(u32, u32, bool), Error> {
    match format {
        PixelFormat::Nv12 | PixelFormat::Nv21 => Ok((8, height * 3 / 2, true)),
        PixelFormat::Yuyv | PixelFormat::Yvyu | PixelFormat::Rgb565 => Ok((16, height, false)),
        PixelFormat::Rgb24 => Ok((24, height, false)),
        other => Err(Error::Unsupported(format!(
            "{} cannot be scanned out by DRM",
            other
        ))),
    }
}

/// Display layout closest to a capture format. Capture slots are filled by
/// the device, so this only describes their geometry.
fn capture_layout(format: PixelFormat, width: u32, height: u32, pitch: u32) -> DisplayLayout {
    let format = match format {
        PixelFormat::Nv12 | PixelFormat::Nv21 => DisplayFormat::Nv12,
        PixelFormat::Yuyv | PixelFormat::Yvyu => DisplayFormat::Yuyv,
        PixelFormat::Rgb565 => DisplayFormat::Rgb565,
        _ => DisplayFormat::Xrgb8888,
    };
    DisplayLayout {
        width,
        height,
        stride: pitch,
        format,
    }
}

/// A DRM/KMS output with its scan-out slots.
pub struct DrmDisplay {
    // Removed before the device closes.
    buffers: Vec<DumbBuffer>,
    fd: Arc<OwnedFd>,
    output: Output,
    layout: DisplayLayout,
}

impl DrmDisplay {
    /// Opens the DRM node and allocates its slots.
    ///
    /// `connector` picks a connector id; `None` takes the first connected
    /// one. The preferred mode of the connector is used.
    pub fn open(
        path: impl AsRef<Path>,
        connector: Option<u32>,
        buffers: DrmBuffers,
    ) -> Result<DrmDisplay, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC | libc::O_NONBLOCK)
            .open(path)?;
        let fd = Arc::new(OwnedFd::from(file));
        let raw = fd.as_raw_fd();

        let output = select_output(raw, connector)?;
        let (mode_w, mode_h) = (
            u32::from(output.mode.hdisplay),
            u32::from(output.mode.vdisplay),
        );
        log::info!(
            "{}: connector {} crtc {} mode {} {}x{}@{}",
            path.display(),
            output.connector_id,
            output.crtc_id,
            mode_name(&output.mode),
            mode_w,
            mode_h,
            output.mode.vrefresh
        );

        let (slots, layout) = match buffers {
            DrmBuffers::Scanout => {
                let mut slots = Vec::with_capacity(SCANOUT_SLOTS);
                for _ in 0..SCANOUT_SLOTS {
                    let mut buf = DumbBuffer::create(
                        &fd,
                        mode_w,
                        mode_h,
                        sys::DRM_FORMAT_XRGB8888,
                        32,
                        mode_h,
                        false,
                    )?;
                    buf.map()?;
                    slots.push(buf);
                }
                let pitch = slots.first().map(|b| b.pitch).unwrap_or(mode_w * 4);
                let layout = DisplayLayout {
                    width: mode_w,
                    height: mode_h,
                    stride: pitch,
                    format: DisplayFormat::Xrgb8888,
                };
                (slots, layout)
            }
            DrmBuffers::Capture {
                width,
                height,
                format,
                count,
            } => {
                let fourcc = format.drm_format().ok_or_else(|| {
                    Error::Unsupported(format!("{} has no DRM format", format))
                })?;
                let (bpp, rows, semi_planar) = dumb_geometry(format, height)?;
                let mut slots = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    slots.push(DumbBuffer::create(
                        &fd,
                        width,
                        height,
                        fourcc,
                        bpp,
                        rows,
                        semi_planar,
                    )?);
                }
                let pitch = slots
                    .first()
                    .map(|b| b.pitch)
                    .unwrap_or_else(|| format.bytes_per_line(width));
                (slots, capture_layout(format, width, height, pitch))
            }
        };
        log::debug!(
            "allocated {} DRM buffers {}x{} stride {}",
            slots.len(),
            layout.width,
            layout.height,
            layout.stride
        );

        Ok(DrmDisplay {
            buffers: slots,
            fd,
            output,
            layout,
        })
    }

    pub fn connector_id(&self) -> u32 {
        self.output.connector_id
    }

    pub fn crtc_id(&self) -> u32 {
        self.output.crtc_id
    }

    fn slot(&self, slot: usize) -> Result<&DumbBuffer, Error> {
        self.buffers.get(slot).ok_or_else(|| {
            Error::Unsupported(format!(
                "display slot {} (have {})",
                slot,
                self.buffers.len()
            ))
        })
    }
}

impl AsFd for DrmDisplay {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl FlipSink for DrmDisplay {
    fn layout(&self) -> DisplayLayout {
        self.layout
    }

    fn slot_count(&self) -> usize {
        self.buffers.len()
    }

    fn slot_mut(&mut self, slot: usize) -> Option<&mut [u8]> {
        self.buffers
            .get_mut(slot)?
            .map
            .as_mut()
            .map(MappedRegion::as_mut_slice)
    }

    fn set_mode(&mut self, slot: usize) -> Result<(), Error> {
        let fb_id = self.slot(slot)?.fb_id;
        let mut connector_id = self.output.connector_id;
        let mut crtc = sys::drm_mode_crtc {
            set_connectors_ptr: &mut connector_id as *mut u32 as u64,
            count_connectors: 1,
            crtc_id: self.output.crtc_id,
            fb_id,
            mode_valid: 1,
            mode: self.output.mode,
            ..Default::default()
        };
        // SAFETY: `crtc` and the connector id it points to outlive the call.
        retry(|| unsafe { sys::drm_ioctl_mode_setcrtc(self.fd.as_raw_fd(), &mut crtc) })
            .map_err(Error::device("DRM_IOCTL_MODE_SETCRTC"))?;
        log::debug!("crtc {} showing slot {}", self.output.crtc_id, slot);
        Ok(())
    }

    fn request_flip(&mut self, slot: usize) -> Result<(), Error> {
        let mut flip = sys::drm_mode_crtc_page_flip {
            crtc_id: self.output.crtc_id,
            fb_id: self.slot(slot)?.fb_id,
            flags: sys::DRM_MODE_PAGE_FLIP_EVENT,
            reserved: 0,
            user_data: slot as u64,
        };
        // SAFETY: `flip` is a valid in/out parameter for PAGE_FLIP.
        match retry(|| unsafe { sys::drm_ioctl_mode_page_flip(self.fd.as_raw_fd(), &mut flip) }) {
            Ok(_) => Ok(()),
            Err(Errno::EBUSY) => {
                log::warn!("page flip to slot {} rejected: flip already pending", slot);
                Ok(())
            }
            Err(errno) => Err(Error::Device {
                op: "DRM_IOCTL_MODE_PAGE_FLIP",
                errno,
            }),
        }
    }

    fn dispatch_events(&mut self) -> Result<Vec<usize>, Error> {
        let mut buf = [0u8; 1024];
        match retry(|| nix::unistd::read(self.fd.as_raw_fd(), &mut buf)) {
            Ok(len) => Ok(parse_flip_events(&buf[..len])),
            Err(Errno::EAGAIN) => Ok(Vec::new()),
            Err(errno) => Err(Error::Device {
                op: "read DRM events",
                errno,
            }),
        }
    }

    fn export_dmabufs(&mut self) -> Result<Vec<DmaBufHandle>, Error> {
        if self.buffers.iter().any(|b| b.map.is_some()) {
            return Err(Error::Unsupported(
                "scan-out buffers are converted into, not captured into".into(),
            ));
        }
        self.buffers.iter().map(DumbBuffer::export).collect()
    }
}

impl fmt::Debug for DrmDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrmDisplay")
            .field("connector", &self.output.connector_id)
            .field("crtc", &self.output.crtc_id)
            .field("layout", &self.layout)
            .field("slots", &self.buffers.len())
            .finish()
    }
}

const EVENT_HEADER: usize = 8;
const FLIP_EVENT_LEN: usize = 32;

/// Extracts the slots of flip-complete events from a DRM event stream read.
///
/// The slot is the user data passed with the flip request. Other events are
/// skipped; a truncated trailing record ends parsing.
pub fn parse_flip_events(data: &[u8]) -> Vec<usize> {
    let mut slots = Vec::new();
    let mut offset = 0;
    while data.len() - offset >= EVENT_HEADER {
        let rec = &data[offset..];
        let kind = u32::from_ne_bytes([rec[0], rec[1], rec[2], rec[3]]);
        let length = u32::from_ne_bytes([rec[4], rec[5], rec[6], rec[7]]) as usize;
        if length < EVENT_HEADER || length > rec.len() {
            break;
        }
        if kind == sys::DRM_EVENT_FLIP_COMPLETE && length >= FLIP_EVENT_LEN {
            let mut user_data = [0u8; 8];
            user_data.copy_from_slice(&rec[8..16]);
            slots.push(u64::from_ne_bytes(user_data) as usize);
        }
        offset += length;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn event(kind: u32, user_data: u64) -> Vec<u8> {
        let mut rec = Vec::with_capacity(FLIP_EVENT_LEN);
        rec.extend_from_slice(&kind.to_ne_bytes());
        rec.extend_from_slice(&(FLIP_EVENT_LEN as u32).to_ne_bytes());
        rec.extend_from_slice(&user_data.to_ne_bytes());
        rec.resize(FLIP_EVENT_LEN, 0);
        rec
    }

    #[test]
    fn test_parse_flip_events() {
        let mut stream = event(sys::DRM_EVENT_FLIP_COMPLETE, 1);
        stream.extend(event(sys::DRM_EVENT_VBLANK, 7));
        stream.extend(event(sys::DRM_EVENT_FLIP_COMPLETE, 0));
        assert_eq!(parse_flip_events(&stream), vec![1, 0]);
    }

    #[test]
    fn test_parse_truncated_stream() {
        let mut stream = event(sys::DRM_EVENT_FLIP_COMPLETE, 3);
        let partial = event(sys::DRM_EVENT_FLIP_COMPLETE, 4);
        stream.extend_from_slice(&partial[..20]);
        assert_eq!(parse_flip_events(&stream), vec![3]);
        assert!(parse_flip_events(&[1, 2, 3]).is_empty());

        let mut bogus = event(sys::DRM_EVENT_FLIP_COMPLETE, 5);
        bogus[4..8].copy_from_slice(&0u32.to_ne_bytes());
        assert!(parse_flip_events(&bogus).is_empty());
    }

    #[test]
    fn test_dumb_geometry() -> Result<(), Error> {
        assert_eq!(dumb_geometry(PixelFormat::Nv12, 1080)?, (8, 1620, true));
        assert_eq!(dumb_geometry(PixelFormat::Yuyv, 1080)?, (16, 1080, false));
        assert!(dumb_geometry(PixelFormat::Srggb12, 1080).is_err());
        Ok(())
    }

    #[test]
    fn test_open_not_drm() {
        let err = DrmDisplay::open("/dev/null", None, DrmBuffers::Scanout).unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                op: "DRM_IOCTL_MODE_GETRESOURCES",
                ..
            }
        ));
    }

    #[test]
    #[ignore = "requires a DRM device with a connected display"]
    #[serial]
    fn test_scanout_flip() -> Result<(), Error> {
        let mut drm = DrmDisplay::open("/dev/dri/card0", None, DrmBuffers::Scanout)?;
        assert_eq!(drm.slot_count(), 2);
        assert!(drm.slot_mut(0).is_some());
        drm.set_mode(0)?;
        drm.request_flip(1)?;
        Ok(())
    }
}
