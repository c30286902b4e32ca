// FILE: src\audio_engine\indices.rs
// =================================

use super::command::EngineNotice;
use super::context::LooperContext;
use crate::looper::{SystemState, TrackState};

impl LooperContext {
    /// Moves the transport and every live track of the selected group forward
    /// by one block, growing the take being recorded and wrapping loops.
    ///
    /// Returns a notice when the take being recorded hit the capacity ceiling
    /// and the looper was forced back to playback.
    pub fn advance(&mut self, nframes: usize) -> Option<EngineNotice> {
        let max_idx = self.max_idx();
        let mut notice = None;

        self.master_curr_idx = (self.master_curr_idx + nframes).min(max_idx);

        let group = self.selected_group?;
        let members = self.groups.clone();

        for id in members.tracks(group) {
            let master_curr_idx = self.master_curr_idx;
            let master_length = self.master_length[group];
            let taking = self.selected_track == Some(id)
                && matches!(self.state, SystemState::Recording | SystemState::Overdubbing);

            let track = self.tracks.get_mut(id);
            if track.state == TrackState::Off {
                continue;
            }
            // Playback may run past end_idx; mixdown skips it until it wraps.
            track.curr_idx += nframes;

            if taking {
                if track.curr_idx > max_idx {
                    track.curr_idx = max_idx;
                    track.state = TrackState::Playback;
                    self.state = SystemState::Playback;
                    notice = Some(EngineNotice::BufferFull { track: id });
                }
                if track.curr_idx > track.end_idx {
                    track.end_idx = track.curr_idx;
                }
                if track.end_idx > master_length {
                    self.master_length[group] = track.end_idx;
                }
            } else {
                if track.repeat && track.curr_idx > track.end_idx {
                    track.curr_idx = track.start_idx;
                }
                if master_curr_idx > master_length {
                    track.curr_idx = if track.repeat { track.start_idx } else { 0 };
                }
                track.curr_idx = track.curr_idx.min(max_idx);
            }
        }

        // Wrap last: the loop above needs the unwrapped transport to resync tracks.
        if self.state == SystemState::Playback && self.master_curr_idx > self.master_length[group] {
            self.master_curr_idx = 0;
        }

        notice
    }
}
