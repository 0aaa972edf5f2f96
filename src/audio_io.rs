// src/audio_io.rs

use crate::audio_engine::buffer::PlanarBuffer;
use crate::audio_engine::AudioEngine;
use crate::param::AtomicF32;
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, HostId, Sample, SampleFormat, Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Assumed callback size when the host picks the buffer size.
const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Devices and configs chosen for a session, before any stream runs.
pub struct OpenedDevices {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    sample_format: SampleFormat,
    pub sample_rate: u32,
    pub block_size: u32,
    pub input_channels: usize,
    pub output_channels: usize,
}

pub fn open_devices(
    host_id: HostId,
    input_device_name: Option<&str>,
    output_device_name: Option<&str>,
    requested_sample_rate: Option<u32>,
    requested_buffer_size: Option<u32>,
) -> Result<OpenedDevices> {
    let host = cpal::host_from_id(host_id)?;
    let input_device = if let Some(name) = input_device_name {
        host.input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {}", name))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device"))?
    };
    let output_device = if let Some(name) = output_device_name {
        host.output_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name))?
    } else {
        host.default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?
    };
    log::info!("Using input device: {}", input_device.name()?);
    log::info!("Using output device: {}", output_device.name()?);

    let default_input_config = input_device.default_input_config()?;
    let default_output_config = output_device.default_output_config()?;
    let sample_format = default_output_config.sample_format();

    let mut input_config: StreamConfig = default_input_config.into();
    let mut output_config: StreamConfig = default_output_config.into();
    for config in [&mut input_config, &mut output_config] {
        if let Some(sr) = requested_sample_rate {
            config.sample_rate = cpal::SampleRate(sr);
        }
        if let Some(bs) = requested_buffer_size {
            config.buffer_size = BufferSize::Fixed(bs);
        }
    }
    // Both streams share the output clock.
    input_config.sample_rate = output_config.sample_rate;

    let block_size = match output_config.buffer_size {
        BufferSize::Fixed(size) => size,
        BufferSize::Default => DEFAULT_BLOCK_SIZE,
    };

    Ok(OpenedDevices {
        sample_rate: output_config.sample_rate.0,
        block_size,
        input_channels: input_config.channels as usize,
        output_channels: output_config.channels as usize,
        input_device,
        output_device,
        input_config,
        output_config,
        sample_format,
    })
}

/// Starts both streams. The engine moves into the output callback.
pub fn start_streams(
    devices: OpenedDevices,
    engine: AudioEngine,
    input_latency_compensation_ms: Arc<AtomicF32>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<(Stream, Stream)> {
    fn run<T>(
        devices: &OpenedDevices,
        engine: AudioEngine,
        input_latency_compensation_ms: Arc<AtomicF32>,
        xrun_count: Arc<AtomicUsize>,
    ) -> Result<(Stream, Stream)>
    where
        T: Sample + cpal::SizedSample + FromSample<f32>,
        f32: FromSample<T>,
    {
        // One second of interleaved input.
        let capacity = devices.sample_rate as usize * devices.input_channels.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let input_stream = build_input_stream::<T>(
            &devices.input_device,
            &devices.input_config,
            producer,
            xrun_count.clone(),
        )?;
        let output_stream = build_output_stream::<T>(
            &devices.output_device,
            &devices.output_config,
            devices.input_channels,
            engine,
            consumer,
            xrun_count,
            input_latency_compensation_ms,
        )?;
        input_stream.play()?;
        output_stream.play()?;
        Ok((input_stream, output_stream))
    }

    let streams = match devices.sample_format {
        SampleFormat::F32 => run::<f32>(&devices, engine, input_latency_compensation_ms, xrun_count)?,
        SampleFormat::I16 => run::<i16>(&devices, engine, input_latency_compensation_ms, xrun_count)?,
        SampleFormat::U16 => run::<u16>(&devices, engine, input_latency_compensation_ms, xrun_count)?,
        format => return Err(anyhow::anyhow!("Unsupported sample format {}", format)),
    };

    log::info!(
        "Successfully started streams with Sample Rate: {} Hz, Buffer Size: {} Samples",
        devices.sample_rate,
        devices.block_size
    );
    Ok(streams)
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProducer<f32>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            log::error!("an error occurred on input stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    let channels = (config.channels as usize).max(1);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Whole frames only, so channels never slip.
            let room = producer.free_len() / channels * channels;
            if room < data.len() {
                xrun_count.fetch_add(1, Ordering::Relaxed);
            }
            for sample in data.iter().take(room) {
                let _ = producer.push(f32::from_sample(*sample));
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Number of interleaved samples to keep queued for `latency_ms`.
fn latency_target(latency_ms: f32, sample_rate: u32, channels: usize) -> usize {
    let frames = (latency_ms.max(0.0) / 1000.0 * sample_rate as f32).round() as usize;
    frames * channels
}

/// Drains queued input beyond the latency target, in whole frames.
fn trim_input_queue(consumer: &mut HeapConsumer<f32>, target_len: usize, channels: usize) {
    let queued = consumer.len();
    if queued > target_len {
        let excess = (queued - target_len) / channels * channels;
        consumer.skip(excess);
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    input_channels: usize,
    mut engine: AudioEngine,
    mut consumer: HeapConsumer<f32>,
    xrun_count: Arc<AtomicUsize>,
    input_latency_compensation_ms: Arc<AtomicF32>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let input_channels = input_channels.max(1);
    let sample_rate = config.sample_rate.0;
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            log::error!("an error occurred on output stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };

    let max_block = engine.max_block_size().max(1);
    engine.prepare_to_play(sample_rate as f32);
    let mut interleaved_in = vec![0.0f32; max_block * input_channels];
    let mut input = PlanarBuffer::new(input_channels, max_block);
    let mut output = PlanarBuffer::new(channels, max_block);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let total_frames = data.len() / channels;

            // --- Smart Latency Manager ---
            let latency_ms = input_latency_compensation_ms.load_relaxed();
            let target_len = latency_target(latency_ms, sample_rate, input_channels)
                + total_frames * input_channels;
            trim_input_queue(&mut consumer, target_len, input_channels);

            let mut start = 0;
            while start < total_frames {
                let frames = (total_frames - start).min(max_block);
                let wanted = frames * input_channels;
                let read = consumer.pop_slice(&mut interleaved_in[..wanted]);
                interleaved_in[read..wanted].fill(0.0);
                input.deinterleave_from(&interleaved_in[..wanted], input_channels);

                engine.process_block(&input, &mut output);

                let out_frames = output.frames();
                for (i, frame) in data[start * channels..(start + frames) * channels]
                    .chunks_mut(channels)
                    .enumerate()
                {
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        let value = if i < out_frames { output.sample(ch, i) } else { 0.0 };
                        *sample = T::from_sample(value);
                    }
                }
                start += frames;
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
