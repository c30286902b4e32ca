// FILE: src\audio_engine\context.rs
// =================================

use super::group_table::GroupTable;
use super::track::{Track, TrackStore};
use crate::looper::{LooperStatus, SystemState, NUM_GROUPS};

/// All looper state. Owned by the audio thread; every operation on it
/// (commands, mixdown, index advance) runs serially inside a block.
pub struct LooperContext {
    pub tracks: TrackStore,
    pub groups: GroupTable,
    pub master_length: [usize; NUM_GROUPS],
    pub master_curr_idx: usize,
    pub selected_group: Option<usize>,
    pub selected_track: Option<usize>,
    pub state: SystemState,
}

impl LooperContext {
    pub fn new(tracks: TrackStore) -> Self {
        Self {
            tracks,
            groups: GroupTable::new(),
            master_length: [0; NUM_GROUPS],
            master_curr_idx: 0,
            selected_group: None,
            selected_track: None,
            state: SystemState::Passthrough,
        }
    }

    /// Capacity ceiling shared by every track and the master index.
    pub fn max_idx(&self) -> usize {
        self.tracks.max_idx()
    }

    pub fn track(&self, track: usize) -> &Track {
        self.tracks.get(track)
    }

    pub fn track_mut(&mut self, track: usize) -> &mut Track {
        self.tracks.get_mut(track)
    }

    /// Number of tracks in the selected group that hold a recording.
    pub fn recorded_tracks_in_selected_group(&self) -> usize {
        let Some(group) = self.selected_group else {
            return 0;
        };
        self.groups
            .tracks(group)
            .filter(|&t| self.tracks.get(t).end_idx > 0)
            .count()
    }

    /// Copies the current state into the shared status view.
    pub fn publish(&self, status: &LooperStatus) {
        status.set_system(
            self.state,
            self.selected_group,
            self.selected_track,
            self.master_curr_idx as u32,
        );
        for (group, &length) in self.master_length.iter().enumerate() {
            status.set_master_length(group, length as u32);
        }
        for (id, track) in self.tracks.iter().enumerate() {
            status.set_track(id, track.state, track.repeat, track.end_idx as u32);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::audio_engine::track::TrackLayout;

    pub fn context(max_idx: usize, stereo: bool) -> LooperContext {
        let store = TrackStore::allocate(TrackLayout {
            max_idx,
            block_headroom: 64,
            stereo,
        })
        .unwrap();
        LooperContext::new(store)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::looper::TrackState;

    #[test]
    fn counts_only_recorded_members_of_selected_group() {
        let mut ctx = context(1_000, false);
        assert_eq!(ctx.recorded_tracks_in_selected_group(), 0);

        ctx.selected_group = Some(1);
        ctx.groups.assign(1, 0);
        ctx.groups.assign(1, 1);
        ctx.groups.assign(2, 2);
        ctx.track_mut(0).end_idx = 100;
        ctx.track_mut(2).end_idx = 100;
        assert_eq!(ctx.recorded_tracks_in_selected_group(), 1);
    }

    #[test]
    fn publish_mirrors_context() {
        let mut ctx = context(1_000, false);
        ctx.state = SystemState::Playback;
        ctx.selected_group = Some(2);
        ctx.selected_track = Some(7);
        ctx.master_length[2] = 640;
        ctx.track_mut(7).state = TrackState::Playback;
        ctx.track_mut(7).repeat = true;
        ctx.track_mut(7).end_idx = 640;

        let status = LooperStatus::new();
        ctx.publish(&status);
        assert_eq!(status.state(), SystemState::Playback);
        assert_eq!(status.selected_group(), Some(2));
        assert_eq!(status.selected_track(), Some(7));
        assert_eq!(status.master_length(2), 640);
        assert_eq!(status.track_state(7), TrackState::Playback);
        assert!(status.track_repeat(7));
        assert_eq!(status.track_end_idx(7), 640);
    }
}
