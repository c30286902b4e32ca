// src/audio_io.rs

use crate::audio_device;
use crate::audio_engine::{AudioEngine, ChannelLayout};
use crate::settings::LooperSettings;
use anyhow::Result;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::HeapProducer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Assumed upper bound on the block size when the host picks it.
const DEFAULT_MAX_BLOCK_FRAMES: usize = 4096;

/// Devices and configs chosen for a run, known before any track memory is allocated.
pub struct StreamPlan {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_format: SampleFormat,
    output_format: SampleFormat,
}

impl StreamPlan {
    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate.0
    }

    pub fn layout(&self) -> ChannelLayout {
        ChannelLayout {
            stereo_in: self.input_config.channels >= 2,
            stereo_out: self.output_config.channels >= 2,
        }
    }

    pub fn max_block_frames(&self) -> usize {
        match self.output_config.buffer_size {
            BufferSize::Fixed(size) => size as usize,
            BufferSize::Default => DEFAULT_MAX_BLOCK_FRAMES,
        }
    }

    /// Interleaved samples per input frame pushed into the ring buffer.
    pub fn ring_channels(&self) -> usize {
        if self.layout().stereo_in {
            2
        } else {
            1
        }
    }
}

pub fn plan_streams(settings: &LooperSettings) -> Result<StreamPlan> {
    let host = audio_device::find_host(settings.host_name.as_deref())?;
    let input_device = audio_device::get_input_device(&host, settings.input_device.as_deref())?;
    let output_device = audio_device::get_output_device(&host, settings.output_device.as_deref())?;
    log::info!("Using audio host: {}", host.id().name());
    log::info!("Using input device: {}", input_device.name()?);
    log::info!("Using output device: {}", output_device.name()?);

    let default_input_config = input_device.default_input_config()?;
    let default_output_config = output_device.default_output_config()?;
    let input_format = default_input_config.sample_format();
    let output_format = default_output_config.sample_format();

    let mut input_config: StreamConfig = default_input_config.into();
    let mut output_config: StreamConfig = default_output_config.into();
    // The engine pairs input and output blocks one to one, so both sides run at one rate.
    let sample_rate = settings.sample_rate.unwrap_or(output_config.sample_rate.0);
    input_config.sample_rate = cpal::SampleRate(sample_rate);
    output_config.sample_rate = cpal::SampleRate(sample_rate);
    if let Some(bs) = settings.buffer_size {
        input_config.buffer_size = BufferSize::Fixed(bs);
        output_config.buffer_size = BufferSize::Fixed(bs);
    }

    Ok(StreamPlan {
        input_device,
        output_device,
        input_config,
        output_config,
        input_format,
        output_format,
    })
}

/// Builds and starts both streams. The engine moves into the output callback,
/// which becomes the real-time audio thread.
pub fn run_streams(
    plan: StreamPlan,
    audio_producer: HeapProducer<f32>,
    engine: AudioEngine,
    input_latency_compensation_ms: f32,
    xrun_count: Arc<AtomicUsize>,
) -> Result<(Stream, Stream)> {
    let ring_channels = plan.ring_channels();
    let max_queued = (input_latency_compensation_ms / 1000.0 * plan.sample_rate() as f32).round()
        as usize
        * ring_channels;

    let input_stream = match plan.input_format {
        SampleFormat::F32 => build_input_stream::<f32>(&plan, audio_producer, xrun_count.clone())?,
        SampleFormat::I16 => build_input_stream::<i16>(&plan, audio_producer, xrun_count.clone())?,
        SampleFormat::U16 => build_input_stream::<u16>(&plan, audio_producer, xrun_count.clone())?,
        format => return Err(anyhow::anyhow!("Unsupported input sample format {}", format)),
    };
    let output_stream = match plan.output_format {
        SampleFormat::F32 => build_output_stream::<f32>(&plan, engine, max_queued, xrun_count)?,
        SampleFormat::I16 => build_output_stream::<i16>(&plan, engine, max_queued, xrun_count)?,
        SampleFormat::U16 => build_output_stream::<u16>(&plan, engine, max_queued, xrun_count)?,
        format => return Err(anyhow::anyhow!("Unsupported output sample format {}", format)),
    };

    input_stream.play()?;
    output_stream.play()?;

    let block = match plan.output_config.buffer_size {
        BufferSize::Fixed(size) => size.to_string(),
        BufferSize::Default => "host default".to_string(),
    };
    log::info!(
        "Started streams: {} Hz, buffer {}, {} in / {} out channels",
        plan.sample_rate(),
        block,
        plan.input_config.channels,
        plan.output_config.channels
    );

    Ok((input_stream, output_stream))
}

fn build_input_stream<T>(
    plan: &StreamPlan,
    mut producer: HeapProducer<f32>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_fn = move |err: cpal::StreamError| {
        log::error!("an error occurred on input stream: {}", err);
        xrun_count.fetch_add(1, Ordering::Relaxed);
    };
    let channels = plan.input_config.channels as usize;
    let stereo = channels >= 2;

    let stream = plan.input_device.build_input_stream(
        &plan.input_config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                // A full ring means the output side stalled; drop the frame.
                let _ = producer.push(f32::from_sample(frame[0]));
                if stereo {
                    let _ = producer.push(f32::from_sample(frame[1]));
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn build_output_stream<T>(
    plan: &StreamPlan,
    mut engine: AudioEngine,
    max_queued: usize,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = plan.output_config.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        log::error!("an error occurred on output stream: {}", err);
        xrun_count.fetch_add(1, Ordering::Relaxed);
    };

    let stream = plan.output_device.build_output_stream(
        &plan.output_config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let nframes = data.len() / channels;
            let (left, right) = engine.render(nframes, max_queued);
            for (i, frame) in data.chunks_mut(channels).enumerate() {
                frame[0] = T::from_sample(left[i]);
                if let (Some(right), Some(slot)) = (right, frame.get_mut(1)) {
                    *slot = T::from_sample(right[i]);
                }
                for extra in frame.iter_mut().skip(2) {
                    *extra = T::EQUILIBRIUM;
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
