//! Shutdown phase, stored as a forward-only atomic cell

use std::sync::atomic::{AtomicU8, Ordering};

/// Where a [`Plan`](crate::Plan) is in its single shutdown pass.
///
/// Variants are ordered; a plan only ever moves to a later phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    SignalWait = 1,
    Draining = 2,
    Terminating = 3,
    FinalCallback = 4,
    Done = 5,
    ForcedExit = 6,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::SignalWait,
            2 => Self::Draining,
            3 => Self::Terminating,
            4 => Self::FinalCallback,
            5 => Self::Done,
            _ => Self::ForcedExit,
        }
    }

    /// True once a termination signal has been received
    pub fn is_terminating(self) -> bool {
        self >= Self::Draining
    }

    /// True for `Done` and `ForcedExit`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::ForcedExit)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::SignalWait => "signal-wait",
            Self::Draining => "draining",
            Self::Terminating => "terminating",
            Self::FinalCallback => "final-callback",
            Self::Done => "done",
            Self::ForcedExit => "forced-exit",
        };
        f.write_str(s)
    }
}

/// Lock-free phase cell; readers poll it from probe handlers.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(Phase::Idle as u8))
    }

    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is strictly later than the current phase.
    ///
    /// Returns `false` (and leaves the cell untouched) otherwise, so a phase
    /// can never be re-entered or reverted.
    pub fn advance(&self, next: Phase) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                ((next as u8) > cur).then_some(next as u8)
            })
            .is_ok()
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}
