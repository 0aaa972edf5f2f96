// src/plugins/sine_synth.rs

//! A small polyphonic sine instrument for instrument channels.
use crate::midi::MidiEvent;
use crate::param::AtomicF32;
use crate::plugins::{decode_state, encode_state, PluginError, PluginNode, PluginState};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::sync::Arc;

pub const PLUGIN_ID: &str = "native.sine";

const NUM_VOICES: usize = 8;

#[derive(Debug)]
pub struct Params {
    pub level: AtomicF32,
    pub release_ms: AtomicF32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            level: AtomicF32::new(0.3),
            release_ms: AtomicF32::new(80.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SineState {
    pub level: f32,
    pub release_ms: f32,
}

impl PluginState for Params {
    fn get_state_base64(&self) -> String {
        encode_state(&SineState {
            level: self.level.load(),
            release_ms: self.release_ms.load(),
        })
    }

    fn set_state_base64(&self, state: &str) -> Result<(), PluginError> {
        let decoded: SineState = decode_state(state)?;
        if !decoded.level.is_finite() || !decoded.release_ms.is_finite() {
            return Err(PluginError::InvalidState("non-finite parameter".to_string()));
        }
        self.level.store(decoded.level.clamp(0.0, 1.0));
        self.release_ms.store(decoded.release_ms.clamp(1.0, 5000.0));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    note: u8,
    phase: f32,
    phase_inc: f32,
    velocity: f32,
    envelope: f32,
    releasing: bool,
    active: bool,
}

pub struct SineSynth {
    params: Arc<Params>,
    voices: [Voice; NUM_VOICES],
    sample_rate: f32,
}

impl SineSynth {
    pub fn new(params: Arc<Params>) -> Self {
        Self {
            params,
            voices: [Voice::default(); NUM_VOICES],
            sample_rate: 48000.0,
        }
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        let freq = 440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0);
        // Reuse a voice already playing this note, then a free one, then steal the quietest.
        let index = self
            .voices
            .iter()
            .position(|v| v.active && v.note == note)
            .or_else(|| self.voices.iter().position(|v| !v.active))
            .unwrap_or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .fold((0, f32::MAX), |(best, level), (i, v)| {
                        if v.envelope < level {
                            (i, v.envelope)
                        } else {
                            (best, level)
                        }
                    })
                    .0
            });
        self.voices[index] = Voice {
            note,
            phase: 0.0,
            phase_inc: freq / self.sample_rate,
            velocity: velocity as f32 / 127.0,
            envelope: 1.0,
            releasing: false,
            active: true,
        };
    }

    fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut().filter(|v| v.active && v.note == note) {
            voice.releasing = true;
        }
    }

    fn handle_event(&mut self, event: &MidiEvent) {
        if event.is_note_on() {
            self.note_on(event.data1, event.data2);
        } else if event.is_note_off() {
            self.note_off(event.data1);
        }
    }
}

impl PluginNode for SineSynth {
    fn prepare(&mut self, sample_rate: f32, _max_block_size: usize) {
        self.sample_rate = sample_rate.max(1.0);
        self.reset();
    }

    fn process(&mut self, audio: &mut [f32], midi: &[MidiEvent]) -> Result<(), PluginError> {
        let level = self.params.level.load();
        let release_samples = (self.params.release_ms.load() * 0.001 * self.sample_rate).max(1.0);
        let release_step = 1.0 / release_samples;

        let mut next_event = 0;
        for (i, sample) in audio.iter_mut().enumerate() {
            while next_event < midi.len() && midi[next_event].offset as usize <= i {
                let event = midi[next_event];
                self.handle_event(&event);
                next_event += 1;
            }

            let mut acc = 0.0;
            for voice in self.voices.iter_mut().filter(|v| v.active) {
                acc += (voice.phase * TAU).sin() * voice.velocity * voice.envelope;
                voice.phase = (voice.phase + voice.phase_inc) % 1.0;
                if voice.releasing {
                    voice.envelope -= release_step;
                    if voice.envelope <= 0.0 {
                        voice.active = false;
                    }
                }
            }
            *sample += acc * level;
        }

        // Events stamped past the end of the block still take effect.
        for event in &midi[next_event..] {
            self.handle_event(event);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.voices = [Voice::default(); NUM_VOICES];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(offset: u32, note: u8) -> MidiEvent {
        MidiEvent::new(offset, 0x90, note, 100)
    }

    #[test]
    fn test_silent_without_notes() {
        let mut synth = SineSynth::new(Arc::new(Params::default()));
        synth.prepare(48000.0, 64);
        let mut block = [0.0f32; 64];
        synth.process(&mut block, &[]).unwrap();
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_note_starts_at_offset() {
        let mut synth = SineSynth::new(Arc::new(Params::default()));
        synth.prepare(48000.0, 64);
        let mut block = [0.0f32; 64];
        synth.process(&mut block, &[note_on(16, 69)]).unwrap();
        assert!(block[..17].iter().all(|&s| s == 0.0));
        assert!(block[17..].iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_release_silences_voice() {
        let params = Arc::new(Params::default());
        params.release_ms.store(1.0);
        let mut synth = SineSynth::new(params);
        synth.prepare(48000.0, 256);
        let mut block = [0.0f32; 256];
        synth.process(&mut block, &[note_on(0, 60)]).unwrap();
        let mut block = [0.0f32; 256];
        synth
            .process(&mut block, &[MidiEvent::new(0, 0x80, 60, 0)])
            .unwrap();
        let mut tail = [0.0f32; 64];
        synth.process(&mut tail, &[]).unwrap();
        assert!(tail.iter().all(|&s| s == 0.0));
    }
}
