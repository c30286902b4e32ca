// FILE: src\audio_engine\track.rs
// ===============================

use crate::audio_engine::mixdown::saturate;
use crate::error::AllocationError;
use crate::looper::{TrackState, NUM_TRACKS};

const BYTES_PER_SAMPLE: u64 = std::mem::size_of::<f32>() as u64;

pub struct Track {
    pub state: TrackState,
    pub left: Vec<f32>,
    pub right: Option<Vec<f32>>,
    pub curr_idx: usize,
    pub start_idx: usize,
    pub end_idx: usize,
    pub repeat: bool,
}

impl Track {
    fn with_buffers(left: Vec<f32>, right: Option<Vec<f32>>) -> Self {
        Self {
            state: TrackState::Off,
            left,
            right,
            curr_idx: 0,
            start_idx: 0,
            end_idx: 0,
            repeat: false,
        }
    }

    /// Back to empty. The sample buffers are kept and overwritten by the next take.
    pub fn reset(&mut self) {
        self.state = TrackState::Off;
        self.curr_idx = 0;
        self.start_idx = 0;
        self.end_idx = 0;
        self.repeat = false;
    }

    pub fn record_block(&mut self, left: &[f32], right: Option<&[f32]>) {
        let at = self.curr_idx;
        copy_into(&mut self.left, at, left);
        if let (Some(dst), Some(src)) = (self.right.as_mut(), right) {
            copy_into(dst, at, src);
        }
    }

    pub fn overdub_block(&mut self, left: &[f32], right: Option<&[f32]>) {
        let at = self.curr_idx;
        sum_into(&mut self.left, at, left);
        if let (Some(dst), Some(src)) = (self.right.as_mut(), right) {
            sum_into(dst, at, src);
        }
    }

    // Mono tracks answer with the left sample on both channels.
    pub fn frame_at(&self, idx: usize) -> Option<(f32, f32)> {
        if idx < self.start_idx || idx >= self.end_idx {
            return None;
        }
        let l = *self.left.get(idx)?;
        let r = match &self.right {
            Some(right) => *right.get(idx)?,
            None => l,
        };
        Some((l, r))
    }

    pub fn is_audible(&self) -> bool {
        !matches!(self.state, TrackState::Off | TrackState::Mute)
    }
}

fn copy_into(dst: &mut [f32], at: usize, src: &[f32]) {
    if at >= dst.len() {
        return;
    }
    let n = src.len().min(dst.len() - at);
    dst[at..at + n].copy_from_slice(&src[..n]);
}

fn sum_into(dst: &mut [f32], at: usize, src: &[f32]) {
    if at >= dst.len() {
        return;
    }
    for (d, s) in dst[at..].iter_mut().zip(src) {
        *d = saturate(*d + *s);
    }
}

/// Sizing of the track buffers, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    pub max_idx: usize,
    /// Extra frames past `max_idx` so a full block can still be written at the ceiling.
    pub block_headroom: usize,
    pub stereo: bool,
}

impl TrackLayout {
    pub fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }

    pub fn plan(
        max_track_seconds: u32,
        sample_rate: u32,
        block_headroom: usize,
        stereo: bool,
        memory_budget_bytes: Option<u64>,
    ) -> Result<Self, AllocationError> {
        let channels = if stereo { 2 } else { 1 };
        let mut max_idx = max_track_seconds as usize * sample_rate as usize;

        if let Some(budget) = memory_budget_bytes {
            let per_buffer = budget / (NUM_TRACKS as u64 * channels as u64 * BYTES_PER_SAMPLE);
            let fits = (per_buffer as usize).saturating_sub(block_headroom);
            if fits == 0 {
                return Err(AllocationError::BudgetTooSmall {
                    budget_bytes: budget,
                    tracks: NUM_TRACKS,
                    channels,
                });
            }
            max_idx = max_idx.min(fits);
        }

        Ok(Self {
            max_idx,
            block_headroom,
            stereo,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        (self.max_idx + self.block_headroom) as u64
            * self.channels() as u64
            * NUM_TRACKS as u64
            * BYTES_PER_SAMPLE
    }
}

/// Owns every track and its audio. Allocated once; never grows.
pub struct TrackStore {
    tracks: Vec<Track>,
    layout: TrackLayout,
}

impl TrackStore {
    pub fn allocate(layout: TrackLayout) -> Result<Self, AllocationError> {
        let len = layout.max_idx + layout.block_headroom;
        let mut tracks = Vec::with_capacity(NUM_TRACKS);
        for track in 0..NUM_TRACKS {
            let left = zeroed(track, len)?;
            let right = if layout.stereo {
                Some(zeroed(track, len)?)
            } else {
                None
            };
            tracks.push(Track::with_buffers(left, right));
        }
        Ok(Self { tracks, layout })
    }

    pub fn max_idx(&self) -> usize {
        self.layout.max_idx
    }

    pub fn get(&self, track: usize) -> &Track {
        &self.tracks[track]
    }

    pub fn get_mut(&mut self, track: usize) -> &mut Track {
        &mut self.tracks[track]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }
}

fn zeroed(track: usize, samples: usize) -> Result<Vec<f32>, AllocationError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(samples)
        .map_err(|_| AllocationError::ReserveFailed { track, samples })?;
    buffer.resize(samples, 0.0);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store(stereo: bool) -> TrackStore {
        TrackStore::allocate(TrackLayout {
            max_idx: 64,
            block_headroom: 8,
            stereo,
        })
        .unwrap()
    }

    #[test]
    fn allocates_every_track_with_headroom() {
        let store = small_store(true);
        assert_eq!(store.iter().count(), NUM_TRACKS);
        for track in store.iter() {
            assert_eq!(track.left.len(), 72);
            assert_eq!(track.right.as_ref().map(Vec::len), Some(72));
            assert_eq!(track.state, TrackState::Off);
        }
    }

    #[test]
    fn mono_tracks_have_no_right_buffer() {
        let store = small_store(false);
        assert!(store.get(0).right.is_none());
    }

    #[test]
    fn plan_respects_memory_budget() {
        let layout = TrackLayout::plan(60, 48_000, 512, true, Some(16 * 2 * 4 * 1_512)).unwrap();
        assert_eq!(layout.max_idx, 1_000);
        assert!(layout.total_bytes() <= 16 * 2 * 4 * 1_512);
    }

    #[test]
    fn plan_without_budget_uses_track_seconds() {
        let layout = TrackLayout::plan(2, 44_100, 512, false, None).unwrap();
        assert_eq!(layout.max_idx, 88_200);
    }

    #[test]
    fn plan_rejects_budget_below_headroom() {
        let err = TrackLayout::plan(60, 48_000, 512, true, Some(1024)).unwrap_err();
        assert!(matches!(err, AllocationError::BudgetTooSmall { .. }));
    }

    #[test]
    fn record_overwrites_and_clips_at_buffer_end() {
        let mut store = small_store(false);
        let track = store.get_mut(0);
        track.left.fill(0.5);
        track.curr_idx = 70;
        track.record_block(&[0.1, 0.2, 0.3, 0.4], None);
        assert_eq!(&track.left[68..72], &[0.5, 0.5, 0.1, 0.2]);
    }

    #[test]
    fn overdub_sums_into_existing_audio() {
        let mut store = small_store(true);
        let track = store.get_mut(1);
        track.curr_idx = 4;
        track.record_block(&[0.25, 0.25], Some(&[0.1, 0.1]));
        track.overdub_block(&[0.25, -0.25], Some(&[0.1, 0.0]));
        assert_eq!(&track.left[4..6], &[0.5, 0.0]);
        assert_eq!(&track.right.as_ref().unwrap()[4..6], &[0.2, 0.1]);
    }

    #[test]
    fn frame_at_only_inside_recorded_range() {
        let mut store = small_store(false);
        let track = store.get_mut(2);
        track.left[10] = 0.3;
        track.start_idx = 10;
        track.end_idx = 12;
        assert_eq!(track.frame_at(9), None);
        assert_eq!(track.frame_at(10), Some((0.3, 0.3)));
        assert_eq!(track.frame_at(12), None);
    }

    #[test]
    fn reset_keeps_buffers() {
        let mut store = small_store(false);
        let track = store.get_mut(3);
        track.state = TrackState::Playback;
        track.end_idx = 40;
        track.repeat = true;
        track.reset();
        assert_eq!(track.state, TrackState::Off);
        assert_eq!((track.curr_idx, track.start_idx, track.end_idx), (0, 0, 0));
        assert!(!track.repeat);
        assert_eq!(track.left.len(), 72);
    }
}
