// src/looper.rs
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

pub const NUM_TRACKS: usize = 16;
pub const NUM_GROUPS: usize = 4;

// Stored when nothing is selected.
const NONE_SELECTED: u8 = u8::MAX;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    Off,
    Recording,
    Playback,
    Mute,
}

impl From<u8> for TrackState {
    fn from(val: u8) -> Self {
        match val {
            0 => TrackState::Off,
            1 => TrackState::Recording,
            2 => TrackState::Playback,
            3 => TrackState::Mute,
            _ => TrackState::Off, // Default fallback
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Passthrough,
    Recording,
    Overdubbing,
    Playback,
}

impl From<u8> for SystemState {
    fn from(val: u8) -> Self {
        match val {
            0 => SystemState::Passthrough,
            1 => SystemState::Recording,
            2 => SystemState::Overdubbing,
            3 => SystemState::Playback,
            _ => SystemState::Passthrough,
        }
    }
}

struct TrackStatus {
    state: AtomicU8,
    repeat: AtomicBool,
    end_idx: AtomicU32,
}

/// Read-only view of the looper published by the audio thread once per block.
/// The control thread reads it to stamp frame delays and to reject commands
/// the current state would ignore.
#[derive(Clone)]
pub struct LooperStatus {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    state: AtomicU8,
    selected_group: AtomicU8,
    selected_track: AtomicU8,
    master_curr_idx: AtomicU32,
    master_length: [AtomicU32; NUM_GROUPS],
    tracks: [TrackStatus; NUM_TRACKS],
    control_locked: AtomicBool,
}

impl LooperStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatusInner {
                state: AtomicU8::new(SystemState::Passthrough as u8),
                selected_group: AtomicU8::new(NONE_SELECTED),
                selected_track: AtomicU8::new(NONE_SELECTED),
                master_curr_idx: AtomicU32::new(0),
                master_length: std::array::from_fn(|_| AtomicU32::new(0)),
                tracks: std::array::from_fn(|_| TrackStatus {
                    state: AtomicU8::new(TrackState::Off as u8),
                    repeat: AtomicBool::new(false),
                    end_idx: AtomicU32::new(0),
                }),
                control_locked: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> SystemState {
        self.inner.state.load(Ordering::Relaxed).into()
    }

    pub fn selected_group(&self) -> Option<usize> {
        decode_selection(self.inner.selected_group.load(Ordering::Relaxed))
    }

    pub fn selected_track(&self) -> Option<usize> {
        decode_selection(self.inner.selected_track.load(Ordering::Relaxed))
    }

    pub fn master_curr_idx(&self) -> u32 {
        self.inner.master_curr_idx.load(Ordering::Relaxed)
    }

    pub fn master_length(&self, group: usize) -> u32 {
        self.inner.master_length[group].load(Ordering::Relaxed)
    }

    pub fn track_state(&self, track: usize) -> TrackState {
        self.inner.tracks[track].state.load(Ordering::Relaxed).into()
    }

    pub fn track_repeat(&self, track: usize) -> bool {
        self.inner.tracks[track].repeat.load(Ordering::Relaxed)
    }

    pub fn track_end_idx(&self, track: usize) -> u32 {
        self.inner.tracks[track].end_idx.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn is_control_locked(&self) -> bool {
        self.inner.control_locked.load(Ordering::Relaxed)
    }

    // Advisory: set while the audio thread is inside a block.
    pub(crate) fn set_control_locked(&self, locked: bool) {
        self.inner.control_locked.store(locked, Ordering::Release);
    }

    pub(crate) fn set_system(
        &self,
        state: SystemState,
        selected_group: Option<usize>,
        selected_track: Option<usize>,
        master_curr_idx: u32,
    ) {
        self.inner.state.store(state as u8, Ordering::Relaxed);
        self.inner
            .selected_group
            .store(encode_selection(selected_group), Ordering::Relaxed);
        self.inner
            .selected_track
            .store(encode_selection(selected_track), Ordering::Relaxed);
        self.inner
            .master_curr_idx
            .store(master_curr_idx, Ordering::Relaxed);
    }

    pub(crate) fn set_master_length(&self, group: usize, length: u32) {
        self.inner.master_length[group].store(length, Ordering::Relaxed);
    }

    pub(crate) fn set_track(&self, track: usize, state: TrackState, repeat: bool, end_idx: u32) {
        let status = &self.inner.tracks[track];
        status.state.store(state as u8, Ordering::Relaxed);
        status.repeat.store(repeat, Ordering::Relaxed);
        status.end_idx.store(end_idx, Ordering::Relaxed);
    }
}

impl Default for LooperStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_selection(selection: Option<usize>) -> u8 {
    selection.map_or(NONE_SELECTED, |i| i as u8)
}

fn decode_selection(raw: u8) -> Option<usize> {
    (raw != NONE_SELECTED).then_some(raw as usize)
}
