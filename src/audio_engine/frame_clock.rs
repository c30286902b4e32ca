// FILE: src\audio_engine\frame_clock.rs
// =====================================

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Lets the control thread ask "how many frames into the current block are we?".
///
/// The audio thread stamps the start of every block; the control thread turns
/// the wall time since that stamp into frames at the stream's sample rate.
pub struct FrameClock {
    epoch: Instant,
    block_start_ns: AtomicU64,
    block_frames: AtomicU32,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            epoch: Instant::now(),
            block_start_ns: AtomicU64::new(0),
            block_frames: AtomicU32::new(0),
            sample_rate,
        }
    }

    pub fn mark_block_start(&self, nframes: usize) {
        self.mark_block_start_at(Instant::now(), nframes);
    }

    pub fn frames_since_block_start(&self) -> u32 {
        self.frames_at(Instant::now())
    }

    fn mark_block_start_at(&self, now: Instant, nframes: usize) {
        let ns = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        self.block_frames.store(nframes as u32, Ordering::Relaxed);
        self.block_start_ns.store(ns, Ordering::Release);
    }

    /// Clamped to the block length: a command can't take effect later than
    /// the end of the block it arrived in.
    fn frames_at(&self, now: Instant) -> u32 {
        let start_ns = self.block_start_ns.load(Ordering::Acquire);
        let block_frames = self.block_frames.load(Ordering::Relaxed);
        let now_ns = now.saturating_duration_since(self.epoch).as_nanos() as u64;
        let elapsed_ns = now_ns.saturating_sub(start_ns);
        let frames = elapsed_ns as u128 * self.sample_rate as u128 / 1_000_000_000;
        frames.min(block_frames as u128) as u32
    }
}
