// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Presentation state for flipping displays.
//!
//! Neither type touches a device. They decide which slot to show and which
//! capture buffer to give back, and the session carries out the decisions.

/// Phase of a [`PingPong`] presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingPongState {
    /// Nothing has been shown yet.
    WaitingFirstFrame,
    /// A flip is always outstanding; each completion requests the next.
    Steady,
}

/// Two-slot presentation where frames are converted into the slot that is
/// not being shown.
///
/// The foreground changes only at a flip completion, and only when the
/// background slot holds a new frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPong {
    readable: [bool; 2],
    foreground: usize,
    state: PingPongState,
}

impl Default for PingPong {
    fn default() -> Self {
        PingPong::new()
    }
}

impl PingPong {
    pub fn new() -> PingPong {
        PingPong {
            readable: [false; 2],
            foreground: 0,
            state: PingPongState::WaitingFirstFrame,
        }
    }

    pub fn state(&self) -> PingPongState {
        self.state
    }

    pub fn foreground(&self) -> usize {
        self.foreground
    }

    /// The slot the next frame is written into.
    pub fn background(&self) -> usize {
        1 - self.foreground
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable.get(slot).copied().unwrap_or(false)
    }

    /// Marks the background slot as holding a complete frame.
    ///
    /// Returns the slot to mode-set and flip to when this is the first
    /// frame; afterwards frames wait for the next flip completion.
    pub fn frame_ready(&mut self) -> Option<usize> {
        let background = self.background();
        self.readable[background] = true;
        match self.state {
            PingPongState::WaitingFirstFrame => {
                self.foreground = background;
                self.state = PingPongState::Steady;
                Some(background)
            }
            PingPongState::Steady => None,
        }
    }

    /// Handles a flip completion and returns the slot to flip to next.
    pub fn flip_complete(&mut self) -> usize {
        let background = self.background();
        if self.state == PingPongState::Steady && self.readable[background] {
            self.readable[self.foreground] = false;
            self.foreground = background;
        }
        self.foreground
    }
}

/// What to do with a capture buffer that just arrived in DMA buffer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAction {
    /// First frame: set the mode on this buffer and request a flip.
    ModeSet(u32),
    /// Keep the new buffer as `next` and give this older one back to the
    /// capture queue.
    Requeue(u32),
    /// Keep the new buffer as `next`.
    Hold,
}

/// Result of a flip completion in DMA buffer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipOutcome {
    /// Buffer no longer on screen, to be queued for capture again.
    pub requeue: Option<u32>,
    /// Buffer to flip to.
    pub flip: Option<u32>,
}

/// Current/next chain for zero-copy display of capture buffers.
///
/// `current` is on screen (or about to be), `next` is the most recent frame
/// waiting for a flip. Only one buffer waits: a newer frame replaces it and
/// the replaced buffer goes straight back to the capture queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmaBufFlipChain {
    current: Option<u32>,
    next: Option<u32>,
}

impl DmaBufFlipChain {
    pub fn new() -> DmaBufFlipChain {
        DmaBufFlipChain::default()
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn next(&self) -> Option<u32> {
        self.next
    }

    /// Whether a frame is waiting for the next flip.
    pub fn has_pending(&self) -> bool {
        self.next.is_some()
    }

    pub fn frame_ready(&mut self, index: u32) -> ChainAction {
        if self.current.is_none() {
            self.current = Some(index);
            return ChainAction::ModeSet(index);
        }
        match self.next.replace(index) {
            Some(old) => ChainAction::Requeue(old),
            None => ChainAction::Hold,
        }
    }

    /// Promotes `next` to `current` when one is waiting, otherwise re-shows
    /// `current`.
    pub fn flip_complete(&mut self) -> FlipOutcome {
        match self.next.take() {
            Some(next) => FlipOutcome {
                requeue: self.current.replace(next),
                flip: Some(next),
            },
            None => FlipOutcome {
                requeue: None,
                flip: self.current,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_first_frame_sets_mode() {
        let mut pp = PingPong::new();
        assert_eq!(pp.state(), PingPongState::WaitingFirstFrame);
        assert_eq!(pp.background(), 1);
        assert_eq!(pp.frame_ready(), Some(1));
        assert_eq!(pp.foreground(), 1);
        assert_eq!(pp.state(), PingPongState::Steady);
    }

    #[test]
    fn test_second_frame_waits_for_completion() {
        let mut pp = PingPong::new();
        pp.frame_ready();
        assert_eq!(pp.frame_ready(), None);
        assert!(pp.is_readable(0));
        assert_eq!(pp.foreground(), 1);

        assert_eq!(pp.flip_complete(), 0);
        assert_eq!(pp.foreground(), 0);
        assert!(!pp.is_readable(1));
        assert!(pp.is_readable(0));
    }

    #[test]
    fn test_completion_without_frame_reflips() {
        let mut pp = PingPong::new();
        pp.frame_ready();
        assert_eq!(pp.flip_complete(), 1);
        assert_eq!(pp.flip_complete(), 1);
        assert_eq!(pp.foreground(), 1);
        assert!(pp.is_readable(1));
    }

    #[test]
    fn test_foreground_changes_only_with_readable_background() {
        let mut rng = rand::rng();
        let mut pp = PingPong::new();
        pp.frame_ready();
        for _ in 0..1000 {
            if rng.random_bool(0.5) {
                pp.frame_ready();
                continue;
            }
            let before = pp.clone();
            let bg_readable = before.is_readable(before.background());
            let flipped = pp.flip_complete();
            assert_eq!(flipped, pp.foreground());
            if bg_readable {
                assert_ne!(pp.foreground(), before.foreground());
                assert!(!pp.is_readable(before.foreground()));
            } else {
                assert_eq!(pp, before);
            }
        }
    }

    #[test]
    fn test_chain_first_frame() {
        let mut chain = DmaBufFlipChain::new();
        assert_eq!(chain.frame_ready(2), ChainAction::ModeSet(2));
        assert_eq!(chain.current(), Some(2));
        assert!(!chain.has_pending());
    }

    #[test]
    fn test_chain_promotes_next() {
        let mut chain = DmaBufFlipChain::new();
        chain.frame_ready(0);
        assert_eq!(chain.frame_ready(1), ChainAction::Hold);
        assert_eq!(
            chain.flip_complete(),
            FlipOutcome {
                requeue: Some(0),
                flip: Some(1)
            }
        );
        assert_eq!(chain.current(), Some(1));
        assert_eq!(chain.next(), None);
    }

    #[test]
    fn test_chain_reflips_current() {
        let mut chain = DmaBufFlipChain::new();
        chain.frame_ready(3);
        assert_eq!(
            chain.flip_complete(),
            FlipOutcome {
                requeue: None,
                flip: Some(3)
            }
        );
    }

    #[test]
    fn test_chain_superseded_next_is_returned() {
        let mut chain = DmaBufFlipChain::new();
        chain.frame_ready(0);
        chain.frame_ready(1);
        assert_eq!(chain.frame_ready(2), ChainAction::Requeue(1));
        assert_eq!(chain.next(), Some(2));
        assert_eq!(chain.flip_complete().requeue, Some(0));
    }

    #[test]
    fn test_chain_never_loses_buffers() {
        let mut rng = rand::rng();
        let mut chain = DmaBufFlipChain::new();
        let mut queued: Vec<u32> = (0..4).collect();
        let mut held = Vec::new();
        for _ in 0..1000 {
            if !queued.is_empty() && rng.random_bool(0.6) {
                let index = queued.remove(0);
                held.push(index);
                if let ChainAction::Requeue(old) = chain.frame_ready(index) {
                    held.retain(|i| *i != old);
                    queued.push(old);
                }
            } else if let Some(old) = chain.flip_complete().requeue {
                held.retain(|i| *i != old);
                queued.push(old);
            }
            assert_eq!(queued.len() + held.len(), 4);
            assert!(held.len() <= 2);
        }
    }
}
