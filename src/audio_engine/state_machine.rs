// FILE: src\audio_engine\state_machine.rs
// =======================================

use super::command::{ControlCommand, EngineNotice, LooperEvent};
use super::context::LooperContext;
use crate::looper::{SystemState, TrackState};

/// Whether `event` does anything in `state`. `track_state` is the state of
/// the track the command names; only overdub and mute/unmute look at it.
pub fn accepts(state: SystemState, event: LooperEvent, track_state: TrackState) -> bool {
    use LooperEvent::*;

    match (state, event) {
        (SystemState::Passthrough, RecordTrack) => true,
        (SystemState::Passthrough, _) => false,
        // Overdub builds on an existing, playing take.
        (SystemState::Playback, OverdubTrack) => track_state == TrackState::Playback,
        (SystemState::Playback, MuteTrack | UnmuteTrack) => track_state != TrackState::Off,
        (SystemState::Playback, _) => true,
        (SystemState::Recording | SystemState::Overdubbing, Passthrough | PlayTrack) => true,
        (SystemState::Recording | SystemState::Overdubbing, _) => false,
    }
}

impl LooperContext {
    /// Applies one validated command. What an event means depends on the
    /// current system state; combinations with no meaning are ignored.
    pub fn apply(&mut self, command: &ControlCommand) -> EngineNotice {
        use LooperEvent::*;

        let event = command.event();
        if !accepts(self.state, event, self.track(command.track()).state) {
            return EngineNotice::Ignored {
                event,
                state: self.state,
            };
        }

        match event {
            Passthrough => self.reset_system(),
            RecordTrack => self.start_recording(command),
            OverdubTrack => self.start_overdubbing(command),
            PlayTrack => match self.state {
                SystemState::Recording => self.stop_take(command, false),
                SystemState::Overdubbing => self.stop_take(command, true),
                _ => self.update_repeat(command),
            },
            MuteTrack => self.set_muted(command.track(), true),
            UnmuteTrack => self.set_muted(command.track(), false),
            AddTrackToGroup => {
                self.groups.assign(command.group(), command.track());
                EngineNotice::Assigned {
                    track: command.track(),
                    group: command.group(),
                }
            }
            RemoveTrackFromGroup => {
                self.groups.unassign(command.group(), command.track());
                EngineNotice::Unassigned {
                    track: command.track(),
                    group: command.group(),
                }
            }
            SetActiveGroup => self.activate_group(command.group()),
        }
    }

    fn start_recording(&mut self, command: &ControlCommand) -> EngineNotice {
        let (track, group) = (command.track(), command.group());

        if !self.groups.contains(group, track) {
            self.groups.assign(group, track);
        }

        // Fresh loop: nothing recorded yet, a different group, or re-recording the only take.
        let recorded = self.recorded_tracks_in_selected_group();
        if recorded == 0
            || self.selected_group != Some(group)
            || (recorded == 1 && self.selected_track == Some(track))
        {
            self.master_curr_idx = 0;
            self.master_length[group] = 0;
        }

        // Start at the transport position so the take lines up without waiting for the wrap.
        let start = self.master_curr_idx;
        let t = self.track_mut(track);
        t.repeat = false;
        t.end_idx = 0;
        t.curr_idx = start;
        t.start_idx = start;
        t.state = TrackState::Recording;

        self.selected_group = Some(group);
        self.selected_track = Some(track);
        self.state = SystemState::Recording;

        EngineNotice::RecordingStarted {
            track,
            group,
            start_idx: start,
            frame_delay: command.frame_delay(),
        }
    }

    fn start_overdubbing(&mut self, command: &ControlCommand) -> EngineNotice {
        let track = command.track();
        self.selected_track = Some(track);
        self.track_mut(track).state = TrackState::Recording;
        self.state = SystemState::Overdubbing;
        EngineNotice::OverdubStarted { track }
    }

    /// Ends a recording or overdub. The target is always the selected
    /// track/group, whatever the stop command carried.
    fn stop_take(&mut self, command: &ControlCommand, overdub: bool) -> EngineNotice {
        let (Some(track), Some(group)) = (self.selected_track, self.selected_group) else {
            return EngineNotice::Ignored {
                event: command.event(),
                state: self.state,
            };
        };
        let delay = command.frame_delay() as usize;
        let max_idx = self.max_idx();

        let t = self.track_mut(track);
        if let Some(repeat) = command.repeat() {
            t.repeat = repeat;
        }
        // An overdub stopped mid-loop keeps the existing loop length.
        if !overdub || t.end_idx < t.curr_idx {
            t.end_idx = (t.curr_idx + delay).min(max_idx);
        }
        t.start_idx = t.start_idx.min(t.end_idx);
        t.state = TrackState::Playback;
        let end_idx = t.end_idx;

        if self.master_length[group] < self.master_curr_idx {
            self.master_length[group] = (self.master_curr_idx + delay).min(max_idx);
            self.master_curr_idx = 0;
        }

        self.state = SystemState::Playback;
        EngineNotice::Playing {
            track,
            end_idx,
            frame_delay: command.frame_delay(),
        }
    }

    /// Back to passthrough with every track empty. Always legal.
    pub fn reset_system(&mut self) -> EngineNotice {
        self.master_length = [0; crate::looper::NUM_GROUPS];
        self.master_curr_idx = 0;
        self.selected_track = None;
        self.selected_group = None;
        for track in self.tracks.iter_mut() {
            track.reset();
        }
        self.groups.clear();
        self.state = SystemState::Passthrough;
        EngineNotice::Reset
    }

    fn set_muted(&mut self, track: usize, mute: bool) -> EngineNotice {
        self.selected_track = Some(track);
        if mute {
            self.track_mut(track).state = TrackState::Mute;
            EngineNotice::Muted { track }
        } else {
            self.track_mut(track).state = TrackState::Playback;
            EngineNotice::Unmuted { track }
        }
    }

    /// Switches arrangement: every recorded member of the new group restarts
    /// together from the top of the loop.
    fn activate_group(&mut self, group: usize) -> EngineNotice {
        self.selected_group = Some(group);
        let members = self.groups.clone();

        for id in members.tracks(group) {
            let track = self.tracks.get_mut(id);
            if track.state != TrackState::Off {
                track.state = TrackState::Mute;
            }
        }
        for id in members.tracks(group) {
            let track = self.tracks.get_mut(id);
            if track.state != TrackState::Off {
                track.state = TrackState::Playback;
                track.curr_idx = if track.repeat { track.start_idx } else { 0 };
            }
        }

        // Tracks assigned from other groups bring their length with them.
        let longest = members
            .tracks(group)
            .map(|id| self.tracks.get(id))
            .filter(|t| t.state != TrackState::Off)
            .map(|t| t.end_idx)
            .max()
            .unwrap_or(0);
        self.master_length[group] = self.master_length[group].max(longest);

        self.master_curr_idx = 0;
        EngineNotice::GroupActivated { group }
    }

    fn update_repeat(&mut self, command: &ControlCommand) -> EngineNotice {
        let track = command.track();
        self.selected_track = Some(track);
        let t = self.track_mut(track);
        match command.repeat() {
            Some(repeat) if repeat != t.repeat => {
                t.repeat = repeat;
                EngineNotice::RepeatChanged { track, repeat }
            }
            _ => EngineNotice::Ignored {
                event: command.event(),
                state: self.state,
            },
        }
    }
}
