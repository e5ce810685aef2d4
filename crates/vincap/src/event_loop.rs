// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::Error;
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};
use std::{
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Which descriptors became ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub capture: bool,
    pub display: bool,
}

/// Result of one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Ready(Readiness),
    Timeout,
    /// A signal arrived while waiting.
    Interrupted,
}

/// Source of readiness notifications.
pub trait Poller {
    fn wait(&mut self, timeout: Duration) -> Result<Wait, Error>;
}

/// Waits on the capture descriptor and optionally a display descriptor
/// with `poll(2)`.
#[derive(Debug)]
pub struct FdPoller {
    capture: OwnedFd,
    display: Option<OwnedFd>,
}

impl FdPoller {
    /// Duplicates the descriptors so the poller does not borrow their owners.
    pub fn new(capture: BorrowedFd<'_>, display: Option<BorrowedFd<'_>>) -> Result<FdPoller, Error> {
        Ok(FdPoller {
            capture: capture.try_clone_to_owned()?,
            display: display.map(|fd| fd.try_clone_to_owned()).transpose()?,
        })
    }
}

/// Milliseconds for `poll(2)`, saturating at the largest wait it accepts.
fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::try_from(timeout).unwrap_or_else(|_| {
        log::warn!(
            "wait of {} ms exceeds poll limit, using {} ms",
            timeout.as_millis(),
            i32::MAX
        );
        PollTimeout::MAX
    })
}

fn is_ready(fd: &PollFd) -> bool {
    fd.revents().map_or(false, |events| {
        events.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
    })
}

impl Poller for FdPoller {
    fn wait(&mut self, timeout: Duration) -> Result<Wait, Error> {
        let mut fds = vec![PollFd::new(self.capture.as_fd(), PollFlags::POLLIN)];
        if let Some(display) = &self.display {
            fds.push(PollFd::new(display.as_fd(), PollFlags::POLLIN));
        }
        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => Ok(Wait::Timeout),
            Ok(_) => Ok(Wait::Ready(Readiness {
                capture: is_ready(&fds[0]),
                display: fds.get(1).map_or(false, is_ready),
            })),
            Err(Errno::EINTR) => Ok(Wait::Interrupted),
            Err(errno) => Err(Error::Device { op: "poll", errno }),
        }
    }
}

/// Reacts to readiness.
pub trait Handler {
    /// Handles a readable capture device. Returns whether a frame was
    /// consumed; `false` means the device had nothing after all.
    fn on_capture_ready(&mut self) -> Result<bool, Error>;

    /// Handles a readable display. Returns the number of flips completed.
    fn on_display_ready(&mut self) -> Result<usize, Error>;
}

/// Loop limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Frames to capture before stopping, ignored when continuous.
    pub iterations: u32,
    pub continuous: bool,
    /// Bound on each wait.
    pub timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            iterations: 3,
            continuous: false,
            timeout: Duration::from_secs(3),
        }
    }
}

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Waits that returned.
    pub iterations: u64,
    pub frames: u64,
    pub flips: u64,
}

/// Single-threaded readiness loop.
///
/// Stops after the frame budget, or only on the stop flag in continuous
/// mode. The flag is checked once per iteration.
#[derive(Debug)]
pub struct EventLoop {
    config: LoopConfig,
    stop: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new(config: LoopConfig) -> EventLoop {
        EventLoop {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses an externally owned stop flag, such as one set by a signal
    /// handler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Runs until the budget is spent or the stop flag is raised.
    ///
    /// A timeout before the first frame is [`Error::Timeout`]. After frames
    /// have arrived a timeout ends a bounded run and is ignored in
    /// continuous mode.
    pub fn run(
        &mut self,
        poller: &mut dyn Poller,
        handler: &mut dyn Handler,
    ) -> Result<LoopStats, Error> {
        let config = self.config;
        let mut stats = LoopStats::default();
        let mut remaining = config.iterations;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                log::info!("stop requested after {} frames", stats.frames);
                break;
            }
            if !config.continuous && remaining == 0 {
                break;
            }

            let ready = match poller.wait(config.timeout)? {
                Wait::Ready(ready) => ready,
                Wait::Interrupted => continue,
                Wait::Timeout if stats.frames == 0 => {
                    return Err(Error::Timeout(config.timeout));
                }
                Wait::Timeout if config.continuous => {
                    log::debug!("no frame for {} ms", config.timeout.as_millis());
                    continue;
                }
                Wait::Timeout => {
                    log::warn!(
                        "no frame for {} ms, stopping with {} frames left",
                        config.timeout.as_millis(),
                        remaining
                    );
                    break;
                }
            };
            stats.iterations += 1;

            if ready.display {
                stats.flips += handler.on_display_ready()? as u64;
            }
            if ready.capture && handler.on_capture_ready()? {
                stats.frames += 1;
                remaining = remaining.saturating_sub(1);
            }
        }
        Ok(stats)
    }
}
