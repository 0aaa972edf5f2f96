// FILE: src/audio_engine/metronome.rs
// ===================================

use crate::audio_engine::buffer::PlanarBuffer;
use crate::param::AtomicF32;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, TAU};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    pub enabled: bool,
    pub bpm: f32,
    pub left_output: u16,
    pub right_output: u16,
    pub frequency_hz: f32,
    pub duration_ms: f32,
    pub amplitude: f32,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bpm: 120.0,
            left_output: 0,
            right_output: 1,
            frequency_hz: 880.0,
            duration_ms: 10.0,
            amplitude: 0.5,
        }
    }
}

/// Click parameters, written by the control thread and read every block.
#[derive(Debug)]
pub struct MetronomeParams {
    pub enabled: AtomicBool,
    pub bpm: AtomicF32,
    pub left_output: AtomicU16,
    pub right_output: AtomicU16,
    pub frequency_hz: AtomicF32,
    pub duration_ms: AtomicF32,
    pub amplitude: AtomicF32,
}

impl MetronomeParams {
    pub fn new(settings: &MetronomeSettings) -> Self {
        Self {
            enabled: AtomicBool::new(settings.enabled),
            bpm: AtomicF32::new(settings.bpm),
            left_output: AtomicU16::new(settings.left_output),
            right_output: AtomicU16::new(settings.right_output),
            frequency_hz: AtomicF32::new(settings.frequency_hz),
            duration_ms: AtomicF32::new(settings.duration_ms),
            amplitude: AtomicF32::new(settings.amplitude),
        }
    }

    pub fn settings(&self) -> MetronomeSettings {
        MetronomeSettings {
            enabled: self.enabled.load(Ordering::Acquire),
            bpm: self.bpm.load(),
            left_output: self.left_output.load(Ordering::Acquire),
            right_output: self.right_output.load(Ordering::Acquire),
            frequency_hz: self.frequency_hz.load(),
            duration_ms: self.duration_ms.load(),
            amplitude: self.amplitude.load(),
        }
    }

    pub fn apply(&self, settings: &MetronomeSettings) {
        self.enabled.store(settings.enabled, Ordering::Release);
        self.bpm.store(settings.bpm);
        self.left_output.store(settings.left_output, Ordering::Release);
        self.right_output.store(settings.right_output, Ordering::Release);
        self.frequency_hz.store(settings.frequency_hz);
        self.duration_ms.store(settings.duration_ms);
        self.amplitude.store(settings.amplitude);
    }

    /// Beat length in samples for the current BPM.
    pub fn samples_per_beat(&self, sample_rate: f32) -> f64 {
        samples_per_beat(sample_rate, self.bpm.load())
    }
}

pub fn samples_per_beat(sample_rate: f32, bpm: f32) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        sample_rate as f64 * 60.0 / bpm as f64
    } else {
        0.0
    }
}

/// Sample-accurate click generator. Writes straight into hardware outputs and
/// never reaches a loop buffer.
pub struct Metronome {
    params: Arc<MetronomeParams>,
    sample_rate: f32,
    samples_per_beat: f64,
    beat_phase: f64,
    click_countdown: usize,
    osc_phase: f64,
}

impl Metronome {
    pub fn new(params: Arc<MetronomeParams>, sample_rate: f32) -> Self {
        let mut metronome = Self {
            params,
            sample_rate,
            samples_per_beat: 0.0,
            beat_phase: 0.0,
            click_countdown: 0,
            osc_phase: 0.0,
        };
        metronome.prepare_to_play(sample_rate);
        metronome
    }

    pub fn params(&self) -> &Arc<MetronomeParams> {
        &self.params
    }

    pub fn prepare_to_play(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.samples_per_beat = self.params.samples_per_beat(sample_rate);
        self.reset();
    }

    /// Puts the next processed sample on a beat.
    pub fn reset(&mut self) {
        self.beat_phase = self.samples_per_beat;
        self.click_countdown = 0;
        self.osc_phase = 0.0;
    }

    /// Makes sample `offset` of the next processed block fall on a beat.
    pub fn align_beat_to(&mut self, offset: usize) {
        self.beat_phase = self.samples_per_beat - offset as f64;
    }

    fn click_duration_samples(&self) -> usize {
        let ms = self.params.duration_ms.load().max(0.0) as f64;
        (ms * 0.001 * self.sample_rate as f64).round() as usize
    }

    /// Adds clicks to the configured output pair. The beat accumulator only
    /// moves while the transport rolls.
    pub fn process_block(&mut self, output: &mut PlanarBuffer, rolling: bool) {
        let spb = self.params.samples_per_beat(self.sample_rate);
        if spb > 0.0 {
            self.samples_per_beat = spb;
        }
        let enabled = self.params.enabled.load(Ordering::Acquire);
        let amplitude = self.params.amplitude.load() as f64;
        let phase_inc = self.params.frequency_hz.load() as f64 / self.sample_rate as f64;
        let duration = self.click_duration_samples();
        let fade_len = (duration / 4).max(1);
        let left = self.params.left_output.load(Ordering::Acquire) as usize;
        let right = self.params.right_output.load(Ordering::Acquire) as usize;
        let channels = output.channels();

        for i in 0..output.frames() {
            if rolling && self.samples_per_beat > 0.0 && self.beat_phase >= self.samples_per_beat {
                self.beat_phase -= self.samples_per_beat;
                self.click_countdown = duration;
                self.osc_phase = 0.0;
            }

            if self.click_countdown > 0 {
                if enabled {
                    let fade = (self.click_countdown as f64 / fade_len as f64).min(1.0);
                    let sample = ((TAU * self.osc_phase + FRAC_PI_2).sin() * amplitude * fade) as f32;
                    if left < channels {
                        output.channel_mut(left)[i] += sample;
                    }
                    if right < channels && right != left {
                        output.channel_mut(right)[i] += sample;
                    }
                }
                self.osc_phase = (self.osc_phase + phase_inc).fract();
                self.click_countdown -= 1;
            }

            if rolling {
                self.beat_phase += 1.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metronome(sample_rate: f32) -> Metronome {
        let params = Arc::new(MetronomeParams::new(&MetronomeSettings {
            enabled: true,
            ..Default::default()
        }));
        Metronome::new(params, sample_rate)
    }

    fn click_onsets(output: &[f32]) -> Vec<usize> {
        output
            .iter()
            .enumerate()
            .filter(|&(i, &s)| s != 0.0 && (i == 0 || output[i - 1] == 0.0))
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_clicks_every_beat_at_120_bpm() {
        let mut metronome = metronome(44_100.0);
        let mut out = PlanarBuffer::new(2, 512);
        let mut left = Vec::new();
        for _ in 0..200 {
            out.clear();
            metronome.process_block(&mut out, true);
            left.extend_from_slice(out.channel(0));
        }
        let onsets = click_onsets(&left);
        assert_eq!(&onsets[..4], &[0, 22_050, 44_100, 66_150]);
    }

    #[test]
    fn test_ten_ms_click_is_441_samples() {
        let mut metronome = metronome(44_100.0);
        let mut out = PlanarBuffer::new(2, 1024);
        metronome.process_block(&mut out, true);
        let non_silent = out.channel(0).iter().filter(|&&s| s != 0.0).count();
        assert_eq!(non_silent, 441);
        assert_eq!(out.channel(0), out.channel(1));
    }

    #[test]
    fn test_every_click_is_identical() {
        let mut metronome = metronome(44_100.0);
        let mut out = PlanarBuffer::new(2, 22_050);
        metronome.process_block(&mut out, true);
        let first: Vec<f32> = out.channel(0)[..441].to_vec();
        out.clear();
        metronome.process_block(&mut out, true);
        assert_eq!(&out.channel(0)[..441], &first[..]);
    }

    #[test]
    fn test_disabled_is_silent() {
        let mut metronome = metronome(48_000.0);
        metronome.params().enabled.store(false, Ordering::Release);
        let mut out = PlanarBuffer::new(2, 4096);
        metronome.process_block(&mut out, true);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stopped_transport_does_not_click() {
        let mut metronome = metronome(48_000.0);
        let mut out = PlanarBuffer::new(2, 4096);
        metronome.process_block(&mut out, false);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_align_beat_to_offset() {
        let mut metronome = metronome(44_100.0);
        let mut out = PlanarBuffer::new(2, 256);
        metronome.process_block(&mut out, true);
        out.clear();
        metronome.align_beat_to(100);
        metronome.process_block(&mut out, true);
        assert_eq!(click_onsets(out.channel(0)), vec![100]);
    }
}
