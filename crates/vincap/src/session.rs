// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! One capture run from open to teardown.
//!
//! [`Session`] owns the capture queue, the frame pipeline and the display and
//! wires them into the [`EventLoop`]. Each captured frame is processed and
//! either handed straight back to the driver or, in DMA buffer mode, kept on
//! screen until a later flip releases it.

use crate::{
    config::CaptureConfig,
    display::{Display, DisplayKind, DrmBuffers, DrmDisplay, FlipSink, FrameSink, Framebuffer},
    event_loop::{EventLoop, FdPoller, Handler, LoopConfig, LoopStats, Poller},
    pipeline::{Frame, FramePipeline, Processed, Target},
    pool::{
        BufferPool, DmaBufStrategy, MmapStrategy, ReadStrategy, Strategy, UserPtrStrategy,
        DEFAULT_BUFFERS, PINGPONG_BUFFERS,
    },
    present::{ChainAction, DmaBufFlipChain, PingPong},
    queue::{CaptureQueue, CapturedFrame},
    record::{BayerDumper, RecordSink},
    v4l2::{CaptureDevice, Format, V4l2Device},
    Error, Memory,
};
use std::{
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, Instant},
};

/// Frames between fps reports.
const FPS_INTERVAL: u64 = 50;

/// What happened to one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub index: u32,
    pub sequence: u32,
    pub bytes_used: u32,
    pub timestamp: Duration,
    pub outcome: Processed,
}

/// Receives per-frame notifications during [`Session::run`].
pub trait FrameObserver {
    fn on_frame(&mut self, _frame: &FrameInfo) {}

    fn on_flip(&mut self) {}
}

impl FrameObserver for () {}

/// Display side of a session.
enum Presenter {
    None,
    Framebuffer(Box<dyn FrameSink>),
    PingPong {
        sink: Box<dyn FlipSink>,
        state: PingPong,
    },
    DmaBufChain {
        sink: Box<dyn FlipSink>,
        chain: DmaBufFlipChain,
    },
}

impl Presenter {
    fn flip_sink(&self) -> Option<&dyn FlipSink> {
        match self {
            Presenter::PingPong { sink, .. } | Presenter::DmaBufChain { sink, .. } => {
                Some(&**sink)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
struct FpsMeter {
    frames: u64,
    window: Instant,
}

impl FpsMeter {
    fn new() -> FpsMeter {
        FpsMeter {
            frames: 0,
            window: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        if self.frames % FPS_INTERVAL == 0 {
            let elapsed = self.window.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                log::info!("{:.2} fps", FPS_INTERVAL as f64 / elapsed);
            }
            self.window = Instant::now();
        }
    }
}

/// A configured capture pipeline.
pub struct Session<D: CaptureDevice> {
    // The queue goes first: capture buffers may be DMA buffers exported by
    // the display.
    queue: CaptureQueue<D>,
    presenter: Presenter,
    pipeline: FramePipeline,
    event_loop: EventLoop,
    fps: FpsMeter,
}

impl Session<V4l2Device> {
    /// Opens and negotiates the capture device, opens the display and
    /// allocates the buffers for `config`.
    pub fn open(config: &CaptureConfig) -> Result<Session<V4l2Device>, Error> {
        config.validate()?;
        let mut device = V4l2Device::open(&config.device)?;
        log::info!(
            "{}: driver {} card {}",
            config.device.display(),
            device.driver(),
            device.card()
        );
        device.check_memory(config.memory)?;
        let format = device.negotiate(&config.negotiation())?;
        let display = open_display(config, &format)?;
        Session::assemble(device, display, config)
    }
}

/// Opens the display sink selected by `config` for capture `format`.
pub fn open_display(config: &CaptureConfig, format: &Format) -> Result<Display, Error> {
    match config.display {
        DisplayKind::None => Ok(Display::None),
        DisplayKind::Framebuffer => Ok(Display::Framebuffer(Box::new(Framebuffer::open(
            &config.fb_device,
        )?))),
        DisplayKind::Drm => {
            let buffers = if config.memory == Memory::DmaBuf {
                DrmBuffers::Capture {
                    width: format.width,
                    height: format.height,
                    format: format.pixel_format,
                    count: DEFAULT_BUFFERS,
                }
            } else {
                DrmBuffers::Scanout
            };
            Ok(Display::Drm(Box::new(DrmDisplay::open(
                &config.drm_device,
                config.connector,
                buffers,
            )?)))
        }
    }
}

impl<D: CaptureDevice> Session<D> {
    /// Builds a session around an already negotiated device and an open
    /// display.
    pub fn assemble(
        mut device: D,
        mut display: Display,
        config: &CaptureConfig,
    ) -> Result<Session<D>, Error> {
        let format = *device.format();
        let strategy: Box<dyn Strategy> = match config.memory {
            Memory::Mmap => {
                let count = if display.kind() == DisplayKind::Drm {
                    PINGPONG_BUFFERS
                } else {
                    DEFAULT_BUFFERS
                };
                Box::new(MmapStrategy::new(count))
            }
            Memory::UserPtr => Box::new(UserPtrStrategy::new(format.image_size)),
            Memory::DmaBuf => match &mut display {
                Display::Drm(sink) => Box::new(DmaBufStrategy::new(sink.export_dmabufs()?)),
                _ => {
                    return Err(Error::Unsupported(
                        "DMABUF I/O requires the DRM display".into(),
                    ))
                }
            },
            Memory::Read => Box::new(ReadStrategy::new(format.image_size)),
        };
        let pool = BufferPool::prepare(strategy, &mut device)?;

        let mut pipeline = FramePipeline::new(format);
        if format.pixel_format.is_bayer() {
            pipeline =
                pipeline.with_bayer_dumper(BayerDumper::new(config.output.as_deref(), "."));
        } else if let Some(output) = &config.output {
            pipeline = pipeline.with_record(RecordSink::create(output)?);
        }

        let presenter = match display {
            Display::None => Presenter::None,
            Display::Framebuffer(sink) => Presenter::Framebuffer(sink),
            Display::Drm(sink) if config.memory == Memory::DmaBuf => Presenter::DmaBufChain {
                sink,
                chain: DmaBufFlipChain::new(),
            },
            Display::Drm(sink) => Presenter::PingPong {
                sink,
                state: PingPong::new(),
            },
        };

        let event_loop = EventLoop::new(LoopConfig {
            iterations: config.iterations,
            continuous: config.continuous,
            timeout: config.timeout,
        });

        Ok(Session {
            queue: CaptureQueue::new(device, pool),
            presenter,
            pipeline,
            event_loop,
            fps: FpsMeter::new(),
        })
    }

    /// Stops the run when `stop` becomes true.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.event_loop = self.event_loop.with_stop_flag(stop);
        self
    }

    pub fn format(&self) -> &Format {
        self.queue.device().format()
    }

    pub fn memory(&self) -> Memory {
        self.queue.memory()
    }

    pub fn queue(&self) -> &CaptureQueue<D> {
        &self.queue
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Ping-pong state when presenting converted frames on DRM.
    pub fn ping_pong(&self) -> Option<&PingPong> {
        match &self.presenter {
            Presenter::PingPong { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Flip chain when presenting DMA buffers on DRM.
    pub fn flip_chain(&self) -> Option<&DmaBufFlipChain> {
        match &self.presenter {
            Presenter::DmaBufChain { chain, .. } => Some(chain),
            _ => None,
        }
    }

    /// Queues every buffer and starts streaming.
    pub fn start(&mut self) -> Result<(), Error> {
        self.queue.start()
    }

    /// A poller over the capture device and, for DRM, the display.
    pub fn poller(&self) -> Result<FdPoller, Error> {
        FdPoller::new(
            self.queue.device().as_fd(),
            self.presenter.flip_sink().map(|sink| sink.as_fd()),
        )
    }

    /// Runs the event loop until the iteration budget is spent or the stop
    /// flag is raised.
    pub fn run(
        &mut self,
        poller: &mut dyn Poller,
        observer: &mut dyn FrameObserver,
    ) -> Result<LoopStats, Error> {
        let Session {
            queue,
            presenter,
            pipeline,
            event_loop,
            fps,
        } = self;
        let mut dispatch = Dispatch {
            queue,
            presenter,
            pipeline,
            fps,
            observer,
        };
        let stats = event_loop.run(poller, &mut dispatch)?;
        log::info!(
            "captured {} frames, {} flips in {} iterations",
            stats.frames,
            stats.flips,
            stats.iterations
        );
        Ok(stats)
    }

    /// Stops streaming, flushes recordings and frees the capture buffers.
    pub fn finish(&mut self) -> Result<(), Error> {
        self.queue.stop()?;
        self.pipeline.finish()?;
        self.queue.release()
    }
}

/// Borrowed session parts driven by the event loop.
struct Dispatch<'a, D: CaptureDevice> {
    queue: &'a mut CaptureQueue<D>,
    presenter: &'a mut Presenter,
    pipeline: &'a mut FramePipeline,
    fps: &'a mut FpsMeter,
    observer: &'a mut dyn FrameObserver,
}

impl<D: CaptureDevice> Dispatch<'_, D> {
    fn present(&mut self, captured: &CapturedFrame) -> Result<Processed, Error> {
        let index = captured.index;
        let data = self.queue.buffer(index)?.data().unwrap_or(&[]);
        let frame = Frame {
            data,
            index,
            bytes_used: captured.bytes_used,
            sequence: captured.sequence,
            timestamp: captured.timestamp,
        };

        match self.presenter {
            Presenter::None => {
                let outcome = self.pipeline.process(&frame, None)?;
                self.queue.enqueue(index)?;
                Ok(outcome)
            }
            Presenter::Framebuffer(sink) => {
                let target = Target {
                    layout: sink.layout(),
                    buffer: sink.buffer_mut(),
                };
                let outcome = self.pipeline.process(&frame, Some(target))?;
                self.queue.enqueue(index)?;
                Ok(outcome)
            }
            Presenter::PingPong { sink, state } => {
                let layout = sink.layout();
                let target = sink
                    .slot_mut(state.background())
                    .map(|buffer| Target { layout, buffer });
                let outcome = self.pipeline.process(&frame, target)?;
                self.queue.enqueue(index)?;
                if outcome == Processed::Displayed {
                    if let Some(slot) = state.frame_ready() {
                        sink.set_mode(slot)?;
                        sink.request_flip(slot)?;
                    }
                }
                Ok(outcome)
            }
            Presenter::DmaBufChain { sink, chain } => {
                self.pipeline.process(&frame, None)?;
                match chain.frame_ready(index) {
                    ChainAction::ModeSet(first) => {
                        sink.set_mode(first as usize)?;
                        sink.request_flip(first as usize)?;
                    }
                    ChainAction::Requeue(old) => self.queue.enqueue(old)?,
                    ChainAction::Hold => {}
                }
                Ok(Processed::Displayed)
            }
        }
    }
}

impl<D: CaptureDevice> Handler for Dispatch<'_, D> {
    fn on_capture_ready(&mut self) -> Result<bool, Error> {
        let Some(captured) = self.queue.dequeue()? else {
            return Ok(false);
        };
        let outcome = self.present(&captured)?;
        self.fps.tick();
        self.observer.on_frame(&FrameInfo {
            index: captured.index,
            sequence: captured.sequence,
            bytes_used: captured.bytes_used,
            timestamp: captured.timestamp,
            outcome,
        });
        Ok(true)
    }

    fn on_display_ready(&mut self) -> Result<usize, Error> {
        let completed = match self.presenter {
            Presenter::PingPong { sink, .. } | Presenter::DmaBufChain { sink, .. } => {
                sink.dispatch_events()?
            }
            _ => return Ok(0),
        };
        for slot in &completed {
            log::trace!("flip to slot {} complete", slot);
            match self.presenter {
                Presenter::PingPong { sink, state } => {
                    let next = state.flip_complete();
                    sink.request_flip(next)?;
                }
                Presenter::DmaBufChain { sink, chain } => {
                    let outcome = chain.flip_complete();
                    if let Some(old) = outcome.requeue {
                        self.queue.enqueue(old)?;
                    }
                    if let Some(next) = outcome.flip {
                        sink.request_flip(next as usize)?;
                    }
                }
                _ => {}
            }
            self.observer.on_flip();
        }
        Ok(completed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event_loop::{Readiness, Wait},
        fourcc::PixelFormat,
        v4l2::SyntheticDevice,
    };

    #[test]
    fn test_open_missing_device() {
        let config = CaptureConfig::default().with_device("/nonexistent/video99");
        assert!(matches!(Session::open(&config), Err(Error::Io(_))));
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = CaptureConfig::default().with_memory(Memory::DmaBuf);
        assert!(matches!(Session::open(&config), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_dmabuf_requires_drm() -> Result<(), Error> {
        let device = SyntheticDevice::new(Format::new(64, 32, PixelFormat::Nv12))?;
        let config = CaptureConfig::default().with_memory(Memory::DmaBuf);
        assert!(matches!(
            Session::assemble(device, Display::None, &config),
            Err(Error::Unsupported(_))
        ));
        Ok(())
    }

    #[test]
    fn test_mmap_insufficient_buffers() -> Result<(), Error> {
        let device =
            SyntheticDevice::new(Format::new(64, 32, PixelFormat::Nv12))?.with_max_buffers(1);
        let config = CaptureConfig::default();
        assert!(matches!(
            Session::assemble(device, Display::None, &config),
            Err(Error::InsufficientBuffers {
                requested: 4,
                granted: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn test_poller_watches_capture_device() -> Result<(), Error> {
        let device = SyntheticDevice::new(Format::new(64, 32, PixelFormat::Nv12))?;
        let session = Session::assemble(device, Display::None, &CaptureConfig::default())?;
        let mut poller = session.poller()?;
        // The synthetic device polls readable like /dev/null.
        let wait = poller.wait(Duration::from_millis(10))?;
        assert!(matches!(
            wait,
            Wait::Ready(Readiness {
                capture: true,
                display: false
            })
        ));
        Ok(())
    }

    #[test]
    fn test_fps_meter_windows() {
        let mut fps = FpsMeter::new();
        for _ in 0..FPS_INTERVAL * 2 + 1 {
            fps.tick();
        }
        assert_eq!(fps.frames, FPS_INTERVAL * 2 + 1);
    }
}
