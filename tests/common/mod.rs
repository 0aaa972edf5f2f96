//! Single-threaded harness: the test plays both the control thread and the
//! audio callback.

#![allow(dead_code)]

use looprig::audio_engine::buffer::PlanarBuffer;
use looprig::audio_engine::command::Quantize;
use looprig::audio_engine::{AudioEngine, ChannelSetup, EngineConfig};
use looprig::control::LooperControl;
use looprig::looper::{ChannelKind, ChannelRouting};
use looprig::plugins::{NativePluginHost, PluginHost};

pub const BLOCK: usize = 64;
pub const SAMPLE_RATE: f32 = 48_000.0;

pub fn audio_channel(input: usize, output: usize) -> ChannelSetup {
    ChannelSetup {
        kind: ChannelKind::Audio,
        routing: ChannelRouting::from_indices(&[input], &[output]),
        midi_channel: None,
    }
}

pub fn config(channels: Vec<ChannelSetup>, quantize: Quantize) -> EngineConfig {
    EngineConfig {
        sample_rate: SAMPLE_RATE,
        max_block_size: BLOCK,
        input_channels: 2,
        output_channels: 2,
        max_loop_seconds: 1.0,
        quantize,
        channels,
        ..Default::default()
    }
}

pub struct Harness {
    pub engine: AudioEngine,
    pub control: LooperControl,
    input: PlanarBuffer,
    output: PlanarBuffer,
    /// Samples fed so far, for generated input.
    pub clock: usize,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_host(config, Box::new(NativePluginHost))
    }

    pub fn with_host(config: EngineConfig, host: Box<dyn PluginHost>) -> Self {
        let (engine, handles) = AudioEngine::new(&config);
        Self {
            engine,
            control: LooperControl::new(handles, host),
            input: PlanarBuffer::new(config.input_channels, config.max_block_size),
            output: PlanarBuffer::new(config.output_channels, config.max_block_size),
            clock: 0,
        }
    }

    /// Runs one block of `frames` with input channel `c` produced by `f(c, sample_index)`.
    pub fn run_with(&mut self, frames: usize, f: impl Fn(usize, usize) -> f32) -> Vec<Vec<f32>> {
        self.input.set_frames(frames);
        for c in 0..self.input.channels() {
            for (i, s) in self.input.channel_mut(c).iter_mut().enumerate() {
                *s = f(c, self.clock + i);
            }
        }
        self.engine.process_block(&self.input, &mut self.output);
        self.clock += frames;
        (0..self.output.channels())
            .map(|c| self.output.channel(c).to_vec())
            .collect()
    }

    /// One full block with constant input per input channel.
    pub fn block(&mut self, inputs: &[f32]) -> Vec<Vec<f32>> {
        let inputs = inputs.to_vec();
        self.run_with(BLOCK, move |c, _| inputs.get(c).copied().unwrap_or(0.0))
    }

    pub fn silence(&mut self) -> Vec<Vec<f32>> {
        self.block(&[0.0, 0.0])
    }
}

/// Indices where a silent stretch turns non-silent.
pub fn onsets(samples: &[f32]) -> Vec<usize> {
    samples
        .iter()
        .enumerate()
        .filter(|&(i, &s)| s != 0.0 && (i == 0 || samples[i - 1] == 0.0))
        .map(|(i, _)| i)
        .collect()
}

pub fn all_close(samples: &[f32], expected: f32) -> bool {
    samples.iter().all(|s| (s - expected).abs() < 1e-6)
}
