//! Double-buffer index bookkeeping.
//!
//! A feedback pipeline keeps two symmetric buffer sets. Each frame the
//! capture pass reads set `current` and writes set `(current + 1) % 2`, the
//! presentation pass draws the set that was just written, and then `current`
//! toggles. [`PingPong`] owns that arithmetic and the phase ordering, so the
//! GL side only has to ask which set plays which role.

use std::fmt;

use thiserror::Error;

/// Which step of a feedback frame is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedbackPhase {
    #[default]
    Idle,
    Capturing,
    Presenting,
}

impl fmt::Display for FeedbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedbackPhase::Idle => "idle",
            FeedbackPhase::Capturing => "capturing",
            FeedbackPhase::Presenting => "presenting",
        };
        f.write_str(name)
    }
}

/// An operation was attempted in the wrong phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("cannot {attempted} while the feedback pipeline is {phase}")]
    OutOfOrder {
        attempted: &'static str,
        phase: FeedbackPhase,
    },
    #[error("ping-pong index must be 0 or 1, got {0}")]
    InvalidIndex(usize),
}

/// The buffer-set roles of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRoles {
    /// Set consumed by the capture pass.
    pub read: usize,
    /// Set written by the capture pass and drawn by the presentation pass.
    pub write: usize,
}

/// Roles and phase of a two-set feedback loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPong {
    current: usize,
    phase: FeedbackPhase,
    frames: u64,
}

impl Default for PingPong {
    fn default() -> Self {
        Self::new()
    }
}

impl PingPong {
    /// Starts idle with set 0 as the read set.
    pub fn new() -> Self {
        Self {
            current: 0,
            phase: FeedbackPhase::Idle,
            frames: 0,
        }
    }

    /// Starts at the given set instead of 0.
    pub fn starting_at(index: usize) -> Result<Self, PhaseError> {
        if index > 1 {
            return Err(PhaseError::InvalidIndex(index));
        }
        Ok(Self {
            current: index,
            ..Self::new()
        })
    }

    /// The set the next capture reads.
    pub fn current(&self) -> usize {
        self.current
    }

    /// The phase the next operation must match.
    pub fn phase(&self) -> FeedbackPhase {
        self.phase
    }

    /// Number of completed frames.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Read and write sets of the current frame.
    pub fn roles(&self) -> FrameRoles {
        FrameRoles {
            read: self.current,
            write: (self.current + 1) % 2,
        }
    }

    /// Idle -> Capturing.
    pub fn begin_capture(&mut self) -> Result<FrameRoles, PhaseError> {
        self.expect(FeedbackPhase::Idle, "begin a capture pass")?;
        self.phase = FeedbackPhase::Capturing;
        Ok(self.roles())
    }

    /// Capturing -> Presenting. Returns the set to draw, which is the one
    /// the capture pass of this frame just wrote.
    pub fn begin_present(&mut self) -> Result<usize, PhaseError> {
        self.expect(FeedbackPhase::Capturing, "present")?;
        self.phase = FeedbackPhase::Presenting;
        Ok(self.roles().write)
    }

    /// Presenting -> Idle. Toggles the current set exactly once and returns
    /// the new value.
    pub fn finish(&mut self) -> Result<usize, PhaseError> {
        self.expect(FeedbackPhase::Presenting, "finish the frame")?;
        self.current = (self.current + 1) % 2;
        self.phase = FeedbackPhase::Idle;
        self.frames += 1;
        Ok(self.current)
    }

    /// Drops an unfinished frame without toggling.
    pub fn abort(&mut self) {
        if self.phase != FeedbackPhase::Idle {
            log::warn!("aborting feedback frame while {}", self.phase);
        }
        self.phase = FeedbackPhase::Idle;
    }

    fn expect(&self, phase: FeedbackPhase, attempted: &'static str) -> Result<(), PhaseError> {
        if self.phase != phase {
            return Err(PhaseError::OutOfOrder {
                attempted,
                phase: self.phase,
            });
        }
        Ok(())
    }
}
