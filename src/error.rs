// src/error.rs

use crate::looper::{NUM_GROUPS, NUM_TRACKS};

/// Why a control frame was answered with a reject byte.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command opcode {0:?}")]
    UnknownOpcode(char),

    #[error("frame ended after {0} bytes")]
    ShortFrame(usize),

    #[error("invalid terminator {0:?} (expected carriage return, 'r' or 's')")]
    InvalidTerminator(char),

    #[error("expected group marker 'g' at position 3, found {0:?}")]
    MissingGroupMarker(char),

    #[error("expected a digit, found {0:?}")]
    NotADigit(char),

    #[error("track {0} out of range (must be below {NUM_TRACKS})")]
    TrackOutOfRange(usize),

    #[error("group {0} out of range (must be below {NUM_GROUPS})")]
    GroupOutOfRange(usize),
}

/// Track buffers could not be set up; the looper must not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("memory budget of {budget_bytes} bytes leaves no room for {tracks} tracks x {channels} channels")]
    BudgetTooSmall {
        budget_bytes: u64,
        tracks: usize,
        channels: usize,
    },

    #[error("failed to reserve {samples} samples for track {track}")]
    ReserveFailed { track: usize, samples: usize },
}
