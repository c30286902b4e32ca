// FILE: src\audio_engine\mixdown.rs
// =================================

use super::context::LooperContext;

/// Full-scale magnitude of an f32 sample.
pub const FULL_SCALE: f32 = 1.0;
/// Samples below this magnitude pass the limiter untouched.
pub const SATURATION_THRESHOLD: f32 = 0.9 * FULL_SCALE;

/// Soft-knee limiter. Identity up to the threshold, then a tanh curve that
/// approaches full scale without ever reaching past it.
#[inline]
pub fn saturate(sample: f32) -> f32 {
    let magnitude = sample.abs();
    if magnitude <= SATURATION_THRESHOLD {
        return sample;
    }
    let knee = FULL_SCALE - SATURATION_THRESHOLD;
    let shaped = SATURATION_THRESHOLD + knee * ((magnitude - SATURATION_THRESHOLD) / knee).tanh();
    shaped.copysign(sample)
}

impl LooperContext {
    /// Sums every audible track of the selected group plus the live input
    /// into the output block.
    ///
    /// A track contributes only while `curr_idx + offset` is inside its
    /// recorded range. Mono input is fanned out to the right output; a
    /// missing right output is left alone.
    pub fn mixdown(
        &self,
        in_left: &[f32],
        in_right: Option<&[f32]>,
        out_left: &mut [f32],
        mut out_right: Option<&mut [f32]>,
    ) {
        let nframes = out_left.len();
        for offset in 0..nframes {
            let mut sum_left = 0.0f32;
            let mut sum_right = 0.0f32;

            if let Some(group) = self.selected_group {
                for id in self.groups.tracks(group) {
                    let track = self.tracks.get(id);
                    if !track.is_audible() {
                        continue;
                    }
                    if let Some((l, r)) = track.frame_at(track.curr_idx + offset) {
                        sum_left += l;
                        sum_right += r;
                    }
                }
            }

            let live_left = in_left.get(offset).copied().unwrap_or(0.0);
            let live_right = match in_right {
                Some(right) => right.get(offset).copied().unwrap_or(0.0),
                None => live_left,
            };
            sum_left += live_left;
            sum_right += live_right;

            out_left[offset] = saturate(sum_left);
            if let Some(right) = out_right.as_deref_mut() {
                if let Some(slot) = right.get_mut(offset) {
                    *slot = saturate(sum_right);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::context::test_support::context;
    use super::*;
    use crate::looper::{SystemState, TrackState};

    fn playing_track(ctx: &mut LooperContext, id: usize, group: usize, samples: &[f32]) {
        ctx.groups.assign(group, id);
        let track = ctx.track_mut(id);
        track.left[..samples.len()].copy_from_slice(samples);
        if let Some(right) = track.right.as_mut() {
            right[..samples.len()].copy_from_slice(samples);
        }
        track.start_idx = 0;
        track.end_idx = samples.len();
        track.curr_idx = 0;
        track.state = TrackState::Playback;
        ctx.selected_group = Some(group);
        ctx.state = SystemState::Playback;
    }

    #[test]
    fn limiter_is_identity_below_threshold() {
        for x in [-0.9, -0.5, 0.0, 0.3, 0.9] {
            assert_eq!(saturate(x), x);
        }
    }

    #[test]
    fn limiter_never_exceeds_full_scale() {
        for x in [0.95f32, 1.0, 2.0, 50.0, f32::MAX] {
            let y = saturate(x);
            assert!(y > SATURATION_THRESHOLD && y <= FULL_SCALE, "{x} -> {y}");
            assert_eq!(saturate(-x), -y);
        }
        assert!(saturate(0.95) < saturate(1.5));
    }

    #[test]
    fn single_track_reproduces_samples_exactly() {
        let mut ctx = context(1_000, true);
        let samples = [0.1, -0.2, 0.5, 0.89];
        playing_track(&mut ctx, 3, 0, &samples);
        let silence = [0.0; 4];
        let (mut l, mut r) = ([9.0; 4], [9.0; 4]);
        ctx.mixdown(&silence, Some(&silence), &mut l, Some(&mut r));
        assert_eq!(l, samples);
        assert_eq!(r, samples);
    }

    #[test]
    fn muted_off_and_foreign_tracks_are_silent() {
        let mut ctx = context(1_000, false);
        playing_track(&mut ctx, 0, 1, &[0.5; 4]);
        playing_track(&mut ctx, 1, 1, &[0.25; 4]);
        playing_track(&mut ctx, 2, 0, &[0.125; 4]);
        ctx.selected_group = Some(1);
        ctx.track_mut(1).state = TrackState::Mute;

        let mut out = [0.0; 4];
        ctx.mixdown(&[0.0; 4], None, &mut out, None);
        assert_eq!(out, [0.5; 4]);

        ctx.track_mut(0).state = TrackState::Off;
        ctx.mixdown(&[0.0; 4], None, &mut out, None);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn track_past_its_end_is_not_mixed() {
        let mut ctx = context(1_000, false);
        playing_track(&mut ctx, 0, 0, &[0.5; 4]);
        ctx.track_mut(0).curr_idx = 2;
        let mut out = [0.0; 4];
        ctx.mixdown(&[0.0; 4], None, &mut out, None);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn mono_input_fans_out_to_right() {
        let mut ctx = context(1_000, false);
        playing_track(&mut ctx, 0, 0, &[0.25; 2]);
        let (mut l, mut r) = ([0.0; 2], [0.0; 2]);
        ctx.mixdown(&[0.25, 0.5], None, &mut l, Some(&mut r));
        assert_eq!(l, [0.5, 0.75]);
        assert_eq!(r, [0.5, 0.75]);
    }

    #[test]
    fn hot_sum_is_limited() {
        let mut ctx = context(1_000, false);
        playing_track(&mut ctx, 0, 0, &[0.8; 2]);
        playing_track(&mut ctx, 1, 0, &[0.8; 2]);
        let mut out = [0.0; 2];
        ctx.mixdown(&[0.8; 2], None, &mut out, None);
        assert!(out.iter().all(|&s| s > SATURATION_THRESHOLD && s <= FULL_SCALE));
    }

    #[test]
    fn no_selected_group_passes_input_only() {
        let ctx = context(1_000, false);
        let mut out = [0.0; 3];
        ctx.mixdown(&[0.1, 0.2, 0.3], None, &mut out, None);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }
}
