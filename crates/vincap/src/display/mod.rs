// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Display sinks.
//!
//! A framebuffer is written directly and never produces events. A DRM/KMS
//! display owns a small set of scan-out slots, flips between them on request
//! and reports completed flips through its file descriptor.

mod drm;
mod fb;

pub use drm::{parse_flip_events, DrmBuffers, DrmDisplay};
pub use fb::Framebuffer;

use crate::{convert::DisplayLayout, memory::DmaBufHandle, Error};
use std::{fmt, os::fd::AsFd};

/// Connector id of the INNO HDMI output on StarFive boards.
pub const INNO_HDMI_CONNECTOR: u32 = 116;
/// Connector id of the MIPI/RGB HDMI bridge on StarFive boards.
pub const MIPI_RGB_CONNECTOR: u32 = 118;

/// Maps the connector selector of the command line tool to a connector id:
/// 0 is INNO HDMI, anything else MIPI/RGB.
pub fn connector_for_selector(selector: u8) -> u32 {
    match selector {
        0 => INNO_HDMI_CONNECTOR,
        _ => MIPI_RGB_CONNECTOR,
    }
}

/// Display selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayKind {
    /// Capture only.
    #[default]
    None,
    /// Linux framebuffer device.
    Framebuffer,
    /// DRM/KMS with page flipping.
    Drm,
}

impl TryFrom<u8> for DisplayKind {
    type Error = Error;

    fn try_from(selector: u8) -> Result<Self, Self::Error> {
        match selector {
            0 => Ok(DisplayKind::None),
            1 => Ok(DisplayKind::Framebuffer),
            2 => Ok(DisplayKind::Drm),
            other => Err(Error::Unsupported(format!(
                "display selector {} (expected 0-2)",
                other
            ))),
        }
    }
}

impl fmt::Display for DisplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayKind::None => "none",
            DisplayKind::Framebuffer => "framebuffer",
            DisplayKind::Drm => "drm",
        };
        f.write_str(name)
    }
}

/// A display written synchronously, with no flips.
pub trait FrameSink {
    fn layout(&self) -> DisplayLayout;

    /// The visible screen memory.
    fn buffer_mut(&mut self) -> &mut [u8];
}

/// A display that scans out one of several slots and reports flip
/// completion asynchronously.
pub trait FlipSink: AsFd {
    /// Layout of every slot.
    fn layout(&self) -> DisplayLayout;

    fn slot_count(&self) -> usize;

    /// CPU access to a slot; `None` when the slot is out of range or its
    /// memory is not mapped.
    fn slot_mut(&mut self, slot: usize) -> Option<&mut [u8]>;

    /// Attaches `slot` to the output and sets the display mode.
    fn set_mode(&mut self, slot: usize) -> Result<(), Error>;

    /// Asks for `slot` to be shown at the next vertical blank. Completion
    /// is reported by [`dispatch_events`](Self::dispatch_events).
    fn request_flip(&mut self, slot: usize) -> Result<(), Error>;

    /// Drains pending events and returns the slots whose flip completed.
    fn dispatch_events(&mut self) -> Result<Vec<usize>, Error>;

    /// Exports every slot as a DMA buffer for zero-copy capture. Slot `n`
    /// becomes capture buffer `n`.
    fn export_dmabufs(&mut self) -> Result<Vec<DmaBufHandle>, Error> {
        Err(Error::Unsupported(
            "display buffers cannot be exported as DMA buffers".into(),
        ))
    }
}

/// The display opened for a run.
pub enum Display {
    None,
    Framebuffer(Box<dyn FrameSink>),
    Drm(Box<dyn FlipSink>),
}

impl Display {
    pub fn kind(&self) -> DisplayKind {
        match self {
            Display::None => DisplayKind::None,
            Display::Framebuffer(_) => DisplayKind::Framebuffer,
            Display::Drm(_) => DisplayKind::Drm,
        }
    }
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Display::None => f.write_str("Display::None"),
            Display::Framebuffer(sink) => write!(f, "Display::Framebuffer({:?})", sink.layout()),
            Display::Drm(sink) => write!(
                f,
                "Display::Drm({:?}, {} slots)",
                sink.layout(),
                sink.slot_count()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors() {
        assert_eq!(DisplayKind::try_from(0).unwrap(), DisplayKind::None);
        assert_eq!(DisplayKind::try_from(1).unwrap(), DisplayKind::Framebuffer);
        assert_eq!(DisplayKind::try_from(2).unwrap(), DisplayKind::Drm);
        assert!(matches!(
            DisplayKind::try_from(3),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(DisplayKind::default(), DisplayKind::None);
        assert_eq!(DisplayKind::Drm.to_string(), "drm");
    }

    #[test]
    fn test_connector_selectors() {
        assert_eq!(connector_for_selector(0), 116);
        assert_eq!(connector_for_selector(1), 118);
        assert_eq!(connector_for_selector(7), MIPI_RGB_CONNECTOR);
    }
}
