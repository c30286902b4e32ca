// src/audio_engine.rs

pub mod command;
pub mod context;
pub mod frame_clock;
pub mod group_table;
pub mod indices;
pub mod mixdown;
pub mod state_machine;
pub mod track;

use crate::looper::{LooperStatus, SystemState};
use command::{CommandMailbox, EngineNotice};
use context::LooperContext;
use frame_clock::FrameClock;
use ringbuf::{HeapConsumer, HeapProducer};
use std::sync::Arc;

/// Channel layout of the streams the engine is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub stereo_in: bool,
    pub stereo_out: bool,
}

/// Runs on the audio thread, one call per block.
pub struct AudioEngine {
    context: LooperContext,
    mailbox: Arc<CommandMailbox>,
    status: LooperStatus,
    clock: Arc<FrameClock>,
    notice_producer: HeapProducer<EngineNotice>,
    pub input_consumer: HeapConsumer<f32>,
    layout: ChannelLayout,
    in_left: Vec<f32>,
    in_right: Vec<f32>,
    out_left: Vec<f32>,
    out_right: Vec<f32>,
    interleaved: Vec<f32>,
}

impl AudioEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: LooperContext,
        mailbox: Arc<CommandMailbox>,
        status: LooperStatus,
        clock: Arc<FrameClock>,
        notice_producer: HeapProducer<EngineNotice>,
        input_consumer: HeapConsumer<f32>,
        layout: ChannelLayout,
        max_block_frames: usize,
    ) -> Self {
        context.publish(&status);
        let input_channels = if layout.stereo_in { 2 } else { 1 };
        Self {
            context,
            mailbox,
            status,
            clock,
            notice_producer,
            input_consumer,
            layout,
            in_left: vec![0.0; max_block_frames],
            in_right: vec![0.0; max_block_frames],
            out_left: vec![0.0; max_block_frames],
            out_right: vec![0.0; max_block_frames],
            interleaved: vec![0.0; max_block_frames * input_channels],
        }
    }

    /// Pulls one block of input from the ring buffer, processes it and
    /// returns the left (and, for stereo outputs, right) output block.
    ///
    /// `max_queued` trims stale input so latency stays bounded.
    pub fn render(&mut self, nframes: usize, max_queued: usize) -> (&[f32], Option<&[f32]>) {
        let channels = if self.layout.stereo_in { 2 } else { 1 };
        if self.out_left.len() < nframes {
            // Only when the host hands us a bigger block than it promised.
            self.in_left.resize(nframes, 0.0);
            self.in_right.resize(nframes, 0.0);
            self.out_left.resize(nframes, 0.0);
            self.out_right.resize(nframes, 0.0);
            self.interleaved.resize(nframes * channels, 0.0);
        }

        let queued = self.input_consumer.len();
        if queued > max_queued.max(nframes * channels) {
            self.input_consumer.skip(queued - max_queued.max(nframes * channels));
        }
        let wanted = nframes * channels;
        let read = self.input_consumer.pop_slice(&mut self.interleaved[..wanted]);
        self.interleaved[read..wanted].fill(0.0);

        for (i, frame) in self.interleaved[..wanted].chunks(channels).enumerate() {
            self.in_left[i] = frame[0];
            if channels == 2 {
                self.in_right[i] = frame[1];
            }
        }

        let in_right = self.layout.stereo_in.then_some(&self.in_right[..nframes]);
        let out_right = if self.layout.stereo_out {
            Some(&mut self.out_right[..nframes])
        } else {
            None
        };
        process_block(
            &mut self.context,
            &self.mailbox,
            &self.status,
            &self.clock,
            &mut self.notice_producer,
            &self.in_left[..nframes],
            in_right,
            &mut self.out_left[..nframes],
            out_right,
        );

        let right = self.layout.stereo_out.then_some(&self.out_right[..nframes]);
        (&self.out_left[..nframes], right)
    }
}

/// One audio block: take a pending command, run the data path for the
/// current state, then move the indices.
#[allow(clippy::too_many_arguments)]
pub fn process_block(
    context: &mut LooperContext,
    mailbox: &CommandMailbox,
    status: &LooperStatus,
    clock: &FrameClock,
    notices: &mut HeapProducer<EngineNotice>,
    in_left: &[f32],
    in_right: Option<&[f32]>,
    out_left: &mut [f32],
    mut out_right: Option<&mut [f32]>,
) {
    let nframes = out_left.len();
    clock.mark_block_start(nframes);

    if let Some(command) = mailbox.take() {
        let notice = context.apply(&command);
        // A full notice queue only costs a log line.
        let _ = notices.push(notice);
    }

    status.set_control_locked(true);

    match context.state {
        SystemState::Passthrough => {
            passthrough(in_left, in_right, out_left, out_right.as_deref_mut());
        }
        SystemState::Recording => {
            if let Some(track) = context.selected_track {
                context.track_mut(track).record_block(in_left, in_right);
            }
            context.mixdown(in_left, in_right, out_left, out_right.as_deref_mut());
        }
        SystemState::Overdubbing => {
            if let Some(track) = context.selected_track {
                context.track_mut(track).overdub_block(in_left, in_right);
            }
            context.mixdown(in_left, in_right, out_left, out_right.as_deref_mut());
        }
        SystemState::Playback => {
            context.mixdown(in_left, in_right, out_left, out_right.as_deref_mut());
        }
    }

    if context.state != SystemState::Passthrough {
        if let Some(notice) = context.advance(nframes) {
            let _ = notices.push(notice);
        }
    }

    context.publish(status);
    status.set_control_locked(false);
}

fn passthrough(
    in_left: &[f32],
    in_right: Option<&[f32]>,
    out_left: &mut [f32],
    out_right: Option<&mut [f32]>,
) {
    let n = out_left.len().min(in_left.len());
    out_left[..n].copy_from_slice(&in_left[..n]);
    if let Some(out_right) = out_right {
        // Mono input is duplicated onto the right output.
        let src = in_right.unwrap_or(in_left);
        let n = out_right.len().min(src.len());
        out_right[..n].copy_from_slice(&src[..n]);
    }
}
