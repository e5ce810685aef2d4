// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    convert::{self, ConvertError, DisplayLayout, Source},
    record::{BayerDumper, RecordSink},
    v4l2::Format,
    Error,
};
use std::time::Duration;

/// One dequeued frame as handed to the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    pub timestamp: Duration,
}

impl<'a> Frame<'a> {
    /// The valid part of the buffer. Drivers that leave `bytes_used` at zero
    /// fill the whole buffer.
    pub fn payload(&self) -> &'a [u8] {
        let used = self.bytes_used as usize;
        if used == 0 || used > self.data.len() {
            self.data
        } else {
            &self.data[..used]
        }
    }
}

/// Where a converted frame goes.
#[derive(Debug)]
pub struct Target<'a> {
    pub layout: DisplayLayout,
    pub buffer: &'a mut [u8],
}

/// Outcome of [`FramePipeline::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Converted into the display target.
    Displayed,
    /// Recorded or dumped only; no target was given.
    Captured,
    /// The target could not take this frame.
    Dropped,
}

/// Records and converts each captured frame.
#[derive(Debug)]
pub struct FramePipeline {
    format: Format,
    record: Option<RecordSink>,
    dumper: Option<BayerDumper>,
    last_timestamp: Option<Duration>,
    frames: u64,
    dropped: u64,
    reported: bool,
}

impl FramePipeline {
    pub fn new(format: Format) -> FramePipeline {
        FramePipeline {
            format,
            record: None,
            dumper: None,
            last_timestamp: None,
            frames: 0,
            dropped: 0,
            reported: false,
        }
    }

    /// Appends every non-Bayer frame to `sink`.
    pub fn with_record(mut self, sink: RecordSink) -> Self {
        self.record = Some(sink);
        self
    }

    /// Dumps every Bayer frame through `dumper`.
    pub fn with_bayer_dumper(mut self, dumper: BayerDumper) -> Self {
        self.dumper = Some(dumper);
        self
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Frames processed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames that could not be converted.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn record(&self) -> Option<&RecordSink> {
        self.record.as_ref()
    }

    /// Records `frame` and converts it into `target` when one is given.
    ///
    /// Pixel data the target cannot take is logged and dropped; only record
    /// I/O failures are returned as errors.
    pub fn process(&mut self, frame: &Frame, target: Option<Target>) -> Result<Processed, Error> {
        self.frames += 1;
        if let Some(last) = self.last_timestamp {
            if frame.timestamp < last {
                log::warn!(
                    "frame {} timestamp went backwards: {:?} < {:?}",
                    frame.sequence,
                    frame.timestamp,
                    last
                );
            }
        }
        self.last_timestamp = Some(frame.timestamp);

        let fmt = self.format;
        let payload = frame.payload();

        if fmt.pixel_format.is_bayer() {
            if let Some(dumper) = self.dumper.as_mut() {
                dumper.dump(
                    fmt.pixel_format,
                    fmt.width,
                    fmt.height,
                    fmt.bytes_per_line,
                    payload,
                )?;
            }
            return Ok(Processed::Captured);
        }

        if let Some(sink) = self.record.as_mut() {
            sink.write_frame(payload)?;
        }

        let Some(target) = target else {
            return Ok(Processed::Captured);
        };
        let src = Source {
            format: fmt.pixel_format,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.bytes_per_line,
            data: payload,
        };
        match convert::convert(&src, &target.layout, target.buffer) {
            Ok(()) => Ok(Processed::Displayed),
            Err(err @ ConvertError::Unsupported { .. }) => {
                if !self.reported {
                    log::error!("{}, frames will not be displayed", err);
                    self.reported = true;
                }
                self.dropped += 1;
                Ok(Processed::Dropped)
            }
            Err(err) => {
                log::error!("frame {}: {}", frame.sequence, err);
                self.dropped += 1;
                Ok(Processed::Dropped)
            }
        }
    }

    /// Flushes the record sink.
    pub fn finish(&mut self) -> Result<(), Error> {
        if let Some(sink) = self.record.as_mut() {
            sink.finish()?;
            log::info!(
                "recorded {} frames ({} bytes) to {}",
                sink.frames(),
                sink.bytes(),
                sink.path().display()
            );
        }
        if let Some(dumper) = &self.dumper {
            log::info!("dumped {} raw frames", dumper.count());
        }
        Ok(())
    }
}
