// FILE: src\audio_engine\command.rs
// =================================

use crate::error::CommandError;
use crate::looper::{SystemState, NUM_GROUPS, NUM_TRACKS};
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LooperEvent {
    Passthrough,
    RecordTrack,
    OverdubTrack,
    PlayTrack,
    MuteTrack,
    UnmuteTrack,
    AddTrackToGroup,
    RemoveTrackFromGroup,
    SetActiveGroup,
}

impl LooperEvent {
    fn from_u8(val: u8) -> Option<Self> {
        Some(match val {
            0 => LooperEvent::Passthrough,
            1 => LooperEvent::RecordTrack,
            2 => LooperEvent::OverdubTrack,
            3 => LooperEvent::PlayTrack,
            4 => LooperEvent::MuteTrack,
            5 => LooperEvent::UnmuteTrack,
            6 => LooperEvent::AddTrackToGroup,
            7 => LooperEvent::RemoveTrackFromGroup,
            8 => LooperEvent::SetActiveGroup,
            _ => return None,
        })
    }
}

/// A command whose track and group are known to be in range.
///
/// Only `ControlCommand::new` builds one, so the state machine never sees an
/// out-of-range index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCommand {
    event: LooperEvent,
    track: u8,
    group: u8,
    repeat: Option<bool>,
    frame_delay: u32,
}

impl ControlCommand {
    pub fn new(
        event: LooperEvent,
        track: usize,
        group: usize,
        repeat: Option<bool>,
    ) -> Result<Self, CommandError> {
        if track >= NUM_TRACKS {
            return Err(CommandError::TrackOutOfRange(track));
        }
        if group >= NUM_GROUPS {
            return Err(CommandError::GroupOutOfRange(group));
        }
        Ok(Self {
            event,
            track: track as u8,
            group: group as u8,
            repeat,
            frame_delay: 0,
        })
    }

    /// Frames between the start of the audio block and the moment the command arrived.
    pub fn with_frame_delay(mut self, frames: u32) -> Self {
        self.frame_delay = frames;
        self
    }

    pub fn event(&self) -> LooperEvent {
        self.event
    }

    pub fn track(&self) -> usize {
        self.track as usize
    }

    pub fn group(&self) -> usize {
        self.group as usize
    }

    pub fn repeat(&self) -> Option<bool> {
        self.repeat
    }

    pub fn frame_delay(&self) -> u32 {
        self.frame_delay
    }

    // Layout: bit 63 present | 56..60 event | 48..56 track | 40..48 group
    //         | 38..40 repeat (0 none, 1 off, 2 on) | 0..32 frame delay
    fn pack(&self) -> u64 {
        let repeat = match self.repeat {
            None => 0u64,
            Some(false) => 1,
            Some(true) => 2,
        };
        PRESENT
            | (self.event as u64) << 56
            | (self.track as u64) << 48
            | (self.group as u64) << 40
            | repeat << 38
            | self.frame_delay as u64
    }

    fn unpack(word: u64) -> Option<Self> {
        if word & PRESENT == 0 {
            return None;
        }
        let event = LooperEvent::from_u8(((word >> 56) & 0x0F) as u8)?;
        let repeat = match (word >> 38) & 0b11 {
            1 => Some(false),
            2 => Some(true),
            _ => None,
        };
        Some(Self {
            event,
            track: (word >> 48) as u8,
            group: (word >> 40) as u8,
            repeat,
            frame_delay: word as u32,
        })
    }
}

const PRESENT: u64 = 1 << 63;

/// Single-slot handoff from the control thread to the audio thread.
///
/// The whole command is one word, so the audio thread sees either a complete
/// command or nothing. An unread command is replaced by a newer one.
#[derive(Default)]
pub struct CommandMailbox {
    slot: AtomicU64,
}

impl CommandMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when an unread command was overwritten.
    pub fn publish(&self, command: ControlCommand) -> bool {
        let previous = self.slot.swap(command.pack(), Ordering::AcqRel);
        previous & PRESENT != 0
    }

    /// True while a published command has not been taken yet.
    pub fn is_pending(&self) -> bool {
        self.slot.load(Ordering::Acquire) & PRESENT != 0
    }

    pub fn take(&self) -> Option<ControlCommand> {
        let word = self.slot.swap(0, Ordering::AcqRel);
        ControlCommand::unpack(word)
    }
}

/// Something worth logging that happened on the audio thread.
///
/// Pushed through a ring buffer so the audio thread never formats or logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineNotice {
    RecordingStarted {
        track: usize,
        group: usize,
        start_idx: usize,
        frame_delay: u32,
    },
    OverdubStarted {
        track: usize,
    },
    Playing {
        track: usize,
        end_idx: usize,
        frame_delay: u32,
    },
    Reset,
    Muted {
        track: usize,
    },
    Unmuted {
        track: usize,
    },
    Assigned {
        track: usize,
        group: usize,
    },
    Unassigned {
        track: usize,
        group: usize,
    },
    GroupActivated {
        group: usize,
    },
    RepeatChanged {
        track: usize,
        repeat: bool,
    },
    Ignored {
        event: LooperEvent,
        state: SystemState,
    },
    BufferFull {
        track: usize,
    },
}
