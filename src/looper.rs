// src/looper.rs
use crate::mixer::MixerTrackState;
use crate::param::AtomicF32;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Highest hardware channel index a routing mask can address.
pub const MAX_HARDWARE_CHANNELS: usize = 64;

const MIDI_OMNI: u8 = 0xFF;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Idle,
    Monitoring,
    Recording,
    Playing,
    Overdubbing,
}

impl From<u8> for ChannelState {
    fn from(val: u8) -> Self {
        match val {
            0 => ChannelState::Idle,
            1 => ChannelState::Monitoring,
            2 => ChannelState::Recording,
            3 => ChannelState::Playing,
            4 => ChannelState::Overdubbing,
            _ => ChannelState::Idle,
        }
    }
}

/// Where a channel's signal comes from.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Hardware input channels summed to mono.
    #[default]
    Audio,
    /// A MIDI-driven instrument node.
    Instrument,
}

impl From<u8> for ChannelKind {
    fn from(val: u8) -> Self {
        match val {
            1 => ChannelKind::Instrument,
            _ => ChannelKind::Audio,
        }
    }
}

/// Hardware routing as bit masks over channel indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRouting {
    pub inputs: u64,
    pub outputs: u64,
}

impl ChannelRouting {
    /// Builds a routing from index lists, ignoring indices that do not fit the mask.
    pub fn from_indices(inputs: &[usize], outputs: &[usize]) -> Self {
        Self {
            inputs: mask_from_indices(inputs),
            outputs: mask_from_indices(outputs),
        }
    }
}

pub fn mask_from_indices(indices: &[usize]) -> u64 {
    indices
        .iter()
        .filter(|&&i| i < MAX_HARDWARE_CHANNELS)
        .fold(0u64, |mask, &i| mask | (1u64 << i))
}

#[derive(Debug)]
struct ChannelCells {
    state: AtomicU8,
    kind: AtomicU8,
    stopped: AtomicBool,
    pending: AtomicBool,
    has_content: AtomicBool,
    gain: AtomicF32,
    muted: AtomicBool,
    soloed: AtomicBool,
    inputs: AtomicU64,
    outputs: AtomicU64,
    midi_channel: AtomicU8,
    peak: AtomicF32,
}

/// State that is shared between the control and audio threads.
///
/// Scalars the control side may set directly (gain, mute, solo, routing, MIDI
/// filter) are read by the audio thread every block. State, pending, content and
/// peak are published by the audio thread only.
#[derive(Clone, Debug)]
pub struct SharedChannelState {
    cells: Arc<ChannelCells>,
}

impl SharedChannelState {
    pub fn new(kind: ChannelKind, routing: ChannelRouting, midi_channel: Option<u8>) -> Self {
        Self {
            cells: Arc::new(ChannelCells {
                state: AtomicU8::new(ChannelState::Idle as u8),
                kind: AtomicU8::new(kind as u8),
                stopped: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                has_content: AtomicBool::new(false),
                gain: AtomicF32::new(1.0),
                muted: AtomicBool::new(false),
                soloed: AtomicBool::new(false),
                inputs: AtomicU64::new(routing.inputs),
                outputs: AtomicU64::new(routing.outputs),
                midi_channel: AtomicU8::new(midi_channel.unwrap_or(MIDI_OMNI)),
                peak: AtomicF32::new(0.0),
            }),
        }
    }

    pub fn get(&self) -> ChannelState {
        self.cells.state.load(Ordering::Acquire).into()
    }

    pub(crate) fn set(&self, state: ChannelState) {
        self.cells.state.store(state as u8, Ordering::Release);
    }

    pub fn kind(&self) -> ChannelKind {
        self.cells.kind.load(Ordering::Acquire).into()
    }

    pub(crate) fn set_kind(&self, kind: ChannelKind) {
        self.cells.kind.store(kind as u8, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.cells.stopped.load(Ordering::Acquire)
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.cells.stopped.store(stopped, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.cells.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        self.cells.pending.store(pending, Ordering::Relaxed);
    }

    pub fn has_content(&self) -> bool {
        self.cells.has_content.load(Ordering::Acquire)
    }

    pub(crate) fn set_has_content(&self, has_content: bool) {
        self.cells.has_content.store(has_content, Ordering::Release);
    }

    pub fn gain(&self) -> f32 {
        self.cells.gain.load()
    }

    pub fn set_gain(&self, gain: f32) {
        self.cells.gain.store(gain);
    }

    pub fn is_muted(&self) -> bool {
        self.cells.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.cells.muted.store(muted, Ordering::Release);
    }

    pub fn is_soloed(&self) -> bool {
        self.cells.soloed.load(Ordering::Acquire)
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.cells.soloed.store(soloed, Ordering::Release);
    }

    pub fn routing(&self) -> ChannelRouting {
        ChannelRouting {
            inputs: self.cells.inputs.load(Ordering::Acquire),
            outputs: self.cells.outputs.load(Ordering::Acquire),
        }
    }

    pub fn set_routing(&self, routing: ChannelRouting) {
        self.cells.inputs.store(routing.inputs, Ordering::Release);
        self.cells.outputs.store(routing.outputs, Ordering::Release);
    }

    /// `None` means the channel listens to every MIDI channel.
    pub fn midi_channel(&self) -> Option<u8> {
        match self.cells.midi_channel.load(Ordering::Acquire) {
            MIDI_OMNI => None,
            ch => Some(ch),
        }
    }

    pub fn set_midi_channel(&self, channel: Option<u8>) {
        let raw = match channel {
            Some(ch) if ch < 16 => ch,
            _ => MIDI_OMNI,
        };
        self.cells.midi_channel.store(raw, Ordering::Release);
    }

    pub fn peak(&self) -> f32 {
        self.cells.peak.load_relaxed()
    }

    pub(crate) fn set_peak(&self, peak: f32) {
        self.cells.peak.store_relaxed(peak);
    }

    pub fn mixer_state(&self) -> MixerTrackState {
        MixerTrackState {
            volume: self.gain(),
            is_muted: self.is_muted(),
            is_soloed: self.is_soloed(),
        }
    }

    pub fn set_mixer_state(&self, state: MixerTrackState) {
        self.set_gain(state.volume);
        self.set_muted(state.is_muted);
        self.set_soloed(state.is_soloed);
    }
}
