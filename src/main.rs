mod audio_device;
mod audio_engine;
mod audio_io;
mod control;
mod error;
mod looper;
mod settings;

use crate::audio_engine::command::{CommandMailbox, EngineNotice};
use crate::audio_engine::context::LooperContext;
use crate::audio_engine::frame_clock::FrameClock;
use crate::audio_engine::track::{TrackLayout, TrackStore};
use crate::audio_engine::AudioEngine;
use crate::looper::{LooperStatus, TrackState, NUM_GROUPS, NUM_TRACKS};
use ringbuf::{HeapConsumer, HeapRb};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NOTICE_QUEUE_LEN: usize = 256;
const MAIN_LOOP_SLEEP: Duration = Duration::from_millis(20);

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting looper ({} tracks, {} groups)", NUM_TRACKS, NUM_GROUPS);

    let explicit = std::env::args_os().nth(1).map(PathBuf::from);
    let settings_path = settings::settings_path(explicit.as_deref());
    let settings = settings::load_settings(settings_path.as_deref());
    if let Some(path) = settings_path.as_deref().filter(|p| explicit.is_none() && !p.exists()) {
        // First run: leave an editable copy of the defaults behind.
        if let Err(e) = settings::save_settings(&settings, path) {
            log::warn!("Failed to write settings to {}: {}", path.display(), e);
        }
    }

    let plan = audio_io::plan_streams(&settings)?;
    let layout = plan.layout();
    let sample_rate = plan.sample_rate();
    let max_block_frames = plan.max_block_frames();

    let track_layout = TrackLayout::plan(
        settings.max_track_seconds,
        sample_rate,
        max_block_frames,
        layout.stereo_in,
        settings.memory_budget_bytes(),
    )?;
    let store = TrackStore::allocate(track_layout)?;
    log::info!(
        "Allocated {} {} tracks of {:.1} s ({:.1} MiB)",
        NUM_TRACKS,
        if track_layout.stereo { "stereo" } else { "mono" },
        track_layout.max_idx as f64 / sample_rate as f64,
        track_layout.total_bytes() as f64 / (1024.0 * 1024.0)
    );

    let mailbox = Arc::new(CommandMailbox::new());
    let status = LooperStatus::new();
    let clock = Arc::new(FrameClock::new(sample_rate));
    let exit = Arc::new(AtomicBool::new(false));
    let xrun_count = Arc::new(AtomicUsize::new(0));

    let (notice_producer, mut notice_consumer) = HeapRb::<EngineNotice>::new(NOTICE_QUEUE_LEN).split();
    let audio_rb = HeapRb::<f32>::new(sample_rate as usize * 4);
    let (audio_producer, audio_consumer) = audio_rb.split();

    let engine = AudioEngine::new(
        LooperContext::new(store),
        mailbox.clone(),
        status.clone(),
        clock.clone(),
        notice_producer,
        audio_consumer,
        layout,
        max_block_frames,
    );
    let streams = audio_io::run_streams(
        plan,
        audio_producer,
        engine,
        settings.input_latency_compensation_ms,
        xrun_count.clone(),
    )?;

    let channel = control::open_channel(settings.control_device.as_deref())?;
    let control_thread = control::spawn(
        channel,
        mailbox,
        status.clone(),
        clock,
        exit.clone(),
        Duration::from_millis(settings.poll_timeout_ms),
    )?;

    while !exit.load(Ordering::Relaxed) && !control_thread.is_finished() {
        drain_notices(&mut notice_consumer);
        thread::sleep(MAIN_LOOP_SLEEP);
    }

    // Blocks run to completion; the engine just stops being called.
    drop(streams);
    drain_notices(&mut notice_consumer);
    exit.store(true, Ordering::Relaxed);
    match control_thread.join() {
        Ok(result) => result?,
        Err(_) => log::error!("Control thread panicked"),
    }

    log_summary(&status, sample_rate);
    log::info!("Stream errors during run: {}", xrun_count.load(Ordering::Relaxed));
    Ok(())
}

fn drain_notices(notices: &mut HeapConsumer<EngineNotice>) {
    while let Some(notice) = notices.pop() {
        log_notice(notice);
    }
}

fn log_notice(notice: EngineNotice) {
    match notice {
        EngineNotice::RecordingStarted {
            track,
            group,
            start_idx,
            frame_delay,
        } => log::info!(
            "Recording track {} on group {} from frame {}, frame delay {}",
            track,
            group,
            start_idx,
            frame_delay
        ),
        EngineNotice::OverdubStarted { track } => log::info!("Overdubbing track {}", track),
        EngineNotice::Playing {
            track,
            end_idx,
            frame_delay,
        } => log::info!(
            "Playing track {} ({} frames), frame delay {}",
            track,
            end_idx,
            frame_delay
        ),
        EngineNotice::Reset => log::info!("System reset"),
        EngineNotice::Muted { track } => log::info!("Muted track {}", track),
        EngineNotice::Unmuted { track } => log::info!("Unmuted track {}", track),
        EngineNotice::Assigned { track, group } => {
            log::info!("Added track {} to group {}", track, group)
        }
        EngineNotice::Unassigned { track, group } => {
            log::info!("Removed track {} from group {}", track, group)
        }
        EngineNotice::GroupActivated { group } => log::info!("Setting group to {}", group),
        EngineNotice::RepeatChanged { track, repeat } => log::info!(
            "Repeat {} for track {}",
            if repeat { "enabled" } else { "disabled" },
            track
        ),
        EngineNotice::Ignored { event, state } => {
            log::debug!("Ignored {:?} while {:?}", event, state)
        }
        EngineNotice::BufferFull { track } => {
            log::warn!("Track {} is full, switching to playback", track)
        }
    }
}

fn log_summary(status: &LooperStatus, sample_rate: u32) {
    log::info!(
        "Final state {:?}, group {:?}, track {:?}, master index {}",
        status.state(),
        status.selected_group(),
        status.selected_track(),
        status.master_curr_idx()
    );
    for group in 0..NUM_GROUPS {
        let length = status.master_length(group);
        if length > 0 {
            log::info!("Group {}: {} frames", group, length);
        }
    }
    for track in 0..NUM_TRACKS {
        let state = status.track_state(track);
        if state == TrackState::Off {
            continue;
        }
        let end_idx = status.track_end_idx(track);
        log::info!(
            "Track {:2}: {:?}, {} frames ({:.2} s), repeat {}",
            track,
            state,
            end_idx,
            end_idx as f64 / sample_rate as f64,
            status.track_repeat(track)
        );
    }
}
