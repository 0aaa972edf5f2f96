// FILE: src/audio_engine/channel.rs
// =================================

//! One looper channel: its source, insert chain, loop buffer and the
//! record/play/overdub state machine.
//!
//! Every read and write cursor is the shared playhead's loop position. A
//! channel only remembers *when* (as an absolute frame) a pending transition
//! should fire.

use crate::audio_engine::buffer::PlanarBuffer;
use crate::audio_engine::fx_chain::{FxChain, FxSlot};
use crate::audio_engine::loop_engine::LoopEngine;
use crate::audio_engine::telemetry::EngineCounters;
use crate::audio_engine::command::Quantize;
use crate::error::LooperError;
use crate::looper::{ChannelKind, ChannelState, SharedChannelState};
use crate::midi::MidiEvent;
use crate::plugins::PluginNode;

/// Input level that starts recording on an armed channel.
pub const LOOPER_ARM_THRESHOLD: f32 = 0.05;

const MAX_MIDI_EVENTS_PER_BLOCK: usize = 256;

/// Where a channel's signal comes from.
pub enum ChannelSource {
    /// Hardware inputs selected by the routing mask, summed to mono.
    HardwareInput,
    /// An instrument node fed with the channel's filtered MIDI.
    MidiInstrument(Option<Box<dyn PluginNode>>),
}

impl ChannelSource {
    pub fn for_kind(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Audio => ChannelSource::HardwareInput,
            ChannelKind::Instrument => ChannelSource::MidiInstrument(None),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelSource::HardwareInput => ChannelKind::Audio,
            ChannelSource::MidiInstrument(_) => ChannelKind::Instrument,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transition {
    StartRecording { at: u64 },
    CloseLoop { at: u64 },
    StartOverdub { at: u64 },
    StopOverdub { at: u64 },
}

impl Transition {
    fn at(&self) -> u64 {
        match *self {
            Transition::StartRecording { at }
            | Transition::CloseLoop { at }
            | Transition::StartOverdub { at }
            | Transition::StopOverdub { at } => at,
        }
    }
}

/// How the loop length follows from the first recording pass.
#[derive(Clone, Copy, Debug)]
pub struct TempoRules {
    pub sample_rate: f32,
    pub tempo_from_first_loop: bool,
    pub bpm_rounding: bool,
    pub beats_per_loop: u32,
}

impl TempoRules {
    /// Loop length and derived tempo for a first pass of `recorded` samples.
    pub fn loop_length_for(&self, recorded: usize, capacity: usize) -> (usize, Option<f32>) {
        if !self.tempo_from_first_loop || recorded == 0 {
            return (recorded, None);
        }
        let beat_samples = self.sample_rate as f64 * 60.0 * self.beats_per_loop.max(1) as f64;
        let mut bpm = beat_samples / recorded as f64;
        let mut len = recorded;
        if self.bpm_rounding {
            bpm = bpm.round().max(1.0);
            len = ((beat_samples / bpm).round() as usize).clamp(1, capacity);
        }
        (len, Some(bpm as f32))
    }
}

/// Per-block state shared by all channels, in processing order.
pub struct BlockContext<'a> {
    pub clock: &'a mut LoopEngine,
    /// Channels currently on a first pass with no loop defined.
    pub free_recorders: usize,
    pub counters: &'a EngineCounters,
    pub tempo: TempoRules,
    pub any_soloed: bool,
    /// Tempo derived by a first loop that closed during this block.
    pub derived_bpm: Option<f32>,
}

pub struct Channel {
    shared: SharedChannelState,
    source: ChannelSource,
    fx: FxChain,
    state: ChannelState,
    pending: Option<Transition>,
    /// True while recording with no loop defined when the pass started.
    free_pass: bool,
    record_end: u64,
    last_write_pos: u64,
    auto_record: bool,
    loop_buffer: Vec<f32>,
    /// Highest written index + 1; `clear` zeroes up to here.
    dirty_len: usize,
    scratch: Vec<f32>,
    loop_out: Vec<f32>,
    midi_scratch: Vec<MidiEvent>,
}

impl Channel {
    pub fn new(shared: SharedChannelState, loop_capacity: usize, max_block_size: usize) -> Self {
        let source = ChannelSource::for_kind(shared.kind());
        Self {
            shared,
            source,
            fx: FxChain::new(),
            state: ChannelState::Idle,
            pending: None,
            free_pass: false,
            record_end: 0,
            last_write_pos: 0,
            auto_record: false,
            loop_buffer: vec![0.0; loop_capacity.max(1)],
            dirty_len: 0,
            scratch: vec![0.0; max_block_size],
            loop_out: vec![0.0; max_block_size],
            midi_scratch: Vec::with_capacity(MAX_MIDI_EVENTS_PER_BLOCK),
        }
    }

    pub fn shared(&self) -> &SharedChannelState {
        &self.shared
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn kind(&self) -> ChannelKind {
        self.source.kind()
    }

    pub fn loop_capacity(&self) -> usize {
        self.loop_buffer.len()
    }

    pub fn has_content(&self) -> bool {
        matches!(self.state, ChannelState::Playing | ChannelState::Overdubbing)
            || (self.state == ChannelState::Recording && !self.free_pass)
    }

    pub fn is_free_recording(&self) -> bool {
        self.state == ChannelState::Recording && self.free_pass
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The loop as it plays now. Empty until the channel has content.
    pub fn loop_audio(&self, loop_length: usize) -> &[f32] {
        if self.has_content() {
            &self.loop_buffer[..loop_length.min(self.loop_buffer.len())]
        } else {
            &[]
        }
    }

    fn set_state(&mut self, state: ChannelState) {
        self.state = state;
        self.shared.set(state);
        self.shared.set_has_content(self.has_content());
    }

    fn schedule(&mut self, transition: Transition) {
        self.pending = Some(transition);
        self.shared.set_pending(true);
    }

    fn cancel_pending(&mut self) {
        self.pending = None;
        self.shared.set_pending(false);
    }

    // --- Commands ---

    pub fn arm(&mut self) {
        if self.state == ChannelState::Idle {
            self.auto_record = true;
            self.set_state(ChannelState::Monitoring);
        }
    }

    pub fn disarm(&mut self) {
        self.auto_record = false;
        if self.state == ChannelState::Monitoring {
            self.cancel_pending();
            self.set_state(ChannelState::Idle);
        }
    }

    /// Starts a recording pass, or closes a first pass that is running.
    pub fn record(&mut self, clock: &LoopEngine) {
        let now = clock.frames();
        match self.state {
            ChannelState::Idle | ChannelState::Monitoring if self.pending.is_none() => {
                // With no loop yet the pass starts right away; it defines the grid.
                let at = if clock.has_loop() {
                    clock.quantized_boundary(now)
                } else {
                    now
                };
                self.schedule(Transition::StartRecording { at });
            }
            ChannelState::Recording if self.free_pass => {
                self.schedule(Transition::CloseLoop { at: now });
            }
            _ => {}
        }
    }

    pub fn overdub(&mut self, clock: &LoopEngine) {
        if self.state == ChannelState::Playing && self.pending.is_none() {
            let at = clock.quantized_boundary(clock.frames());
            self.schedule(Transition::StartOverdub { at });
        }
    }

    pub fn stop_overdub(&mut self, clock: &LoopEngine) {
        if self.state != ChannelState::Overdubbing {
            return;
        }
        let now = clock.frames();
        let at = match clock.quantize() {
            Quantize::Off => now,
            _ => clock.next_loop_start(now),
        };
        self.schedule(Transition::StopOverdub { at });
    }

    /// Single-button cycle. A press while a transition waits cancels it.
    pub fn press(&mut self, clock: &LoopEngine) {
        if self.pending.is_some() {
            self.cancel_pending();
            return;
        }
        match self.state {
            ChannelState::Idle | ChannelState::Monitoring | ChannelState::Recording => {
                self.record(clock)
            }
            ChannelState::Playing => self.overdub(clock),
            ChannelState::Overdubbing => self.stop_overdub(clock),
        }
    }

    /// Back to `Idle` with a silent loop buffer.
    pub fn clear(&mut self) {
        self.loop_buffer[..self.dirty_len].fill(0.0);
        self.dirty_len = 0;
        self.free_pass = false;
        self.auto_record = false;
        self.last_write_pos = 0;
        self.cancel_pending();
        self.set_state(ChannelState::Idle);
    }

    /// Switches source. A displaced instrument is handed back.
    pub fn set_kind(&mut self, kind: ChannelKind) -> Option<Box<dyn PluginNode>> {
        if self.source.kind() == kind {
            return None;
        }
        let old = std::mem::replace(&mut self.source, ChannelSource::for_kind(kind));
        self.shared.set_kind(kind);
        match old {
            ChannelSource::MidiInstrument(node) => node,
            ChannelSource::HardwareInput => None,
        }
    }

    /// Installs an instrument. On an audio channel the node comes straight back.
    pub fn install_instrument(
        &mut self,
        node: Box<dyn PluginNode>,
    ) -> Result<Option<Box<dyn PluginNode>>, Box<dyn PluginNode>> {
        match &mut self.source {
            ChannelSource::MidiInstrument(slot) => Ok(slot.replace(node)),
            ChannelSource::HardwareInput => Err(node),
        }
    }

    pub fn take_instrument(&mut self) -> Option<Box<dyn PluginNode>> {
        match &mut self.source {
            ChannelSource::MidiInstrument(slot) => slot.take(),
            ChannelSource::HardwareInput => None,
        }
    }

    pub fn install_fx(&mut self, slot: usize, fx: FxSlot) -> Result<Option<FxSlot>, FxSlot> {
        self.fx.install(slot, fx)
    }

    pub fn take_fx(&mut self, slot: usize) -> Option<FxSlot> {
        self.fx.take(slot)
    }

    /// Silences held notes and effect tails.
    pub fn reset_plugins(&mut self) {
        self.fx.reset();
        if let ChannelSource::MidiInstrument(Some(node)) = &mut self.source {
            node.reset();
        }
    }

    pub fn prepare(&mut self, sample_rate: f32, max_block_size: usize) {
        self.fx.prepare(sample_rate, max_block_size);
        if let ChannelSource::MidiInstrument(Some(node)) = &mut self.source {
            node.prepare(sample_rate, max_block_size);
        }
    }

    /// Copies the loop into `buffer` without growing it. Returns false when the
    /// buffer's capacity is too small.
    pub fn capture_into(&self, buffer: &mut Vec<f32>, loop_length: usize) -> bool {
        buffer.clear();
        let audio = self.loop_audio(loop_length);
        if buffer.capacity() < audio.len() {
            return false;
        }
        buffer.extend_from_slice(audio);
        true
    }

    /// Loads a stored loop. An empty `audio` leaves the channel idle.
    pub fn restore(&mut self, audio: &[f32], loop_length: usize) {
        self.clear();
        if audio.is_empty() || loop_length == 0 {
            return;
        }
        let n = audio.len().min(loop_length).min(self.loop_buffer.len());
        self.loop_buffer[..n].copy_from_slice(&audio[..n]);
        self.dirty_len = n;
        self.set_state(ChannelState::Playing);
    }

    // --- Audio ---

    fn fill_source(&mut self, input: &PlanarBuffer, midi: &[MidiEvent], n: usize, counters: &EngineCounters) {
        let scratch = &mut self.scratch[..n];
        scratch.fill(0.0);
        match &mut self.source {
            ChannelSource::HardwareInput => {
                let mut mask = self.shared.routing().inputs;
                while mask != 0 {
                    let ch = mask.trailing_zeros() as usize;
                    mask &= mask - 1;
                    if ch >= input.channels() {
                        break;
                    }
                    for (d, s) in scratch.iter_mut().zip(input.channel(ch)) {
                        *d += *s;
                    }
                }
            }
            ChannelSource::MidiInstrument(node) => {
                let filter = self.shared.midi_channel();
                self.midi_scratch.clear();
                for event in midi {
                    if self.midi_scratch.len() == self.midi_scratch.capacity() {
                        break;
                    }
                    if filter.map_or(true, |ch| ch == event.channel()) {
                        self.midi_scratch.push(*event);
                    }
                }
                if let Some(node) = node {
                    if node.process(scratch, &self.midi_scratch).is_err() {
                        scratch.fill(0.0);
                        EngineCounters::bump(&counters.plugin_failures);
                    }
                }
            }
        }
        if self.fx.process_buffer(scratch).is_err() {
            EngineCounters::bump(&counters.plugin_failures);
        }
    }

    fn start_pass(&mut self, ctx: &mut BlockContext, offset: usize) {
        if ctx.clock.has_loop() {
            self.free_pass = false;
            self.record_end = ctx.clock.frame_at(offset) + ctx.clock.loop_length() as u64;
            self.dirty_len = self.dirty_len.max(ctx.clock.loop_length());
        } else {
            if ctx.free_recorders == 0 {
                ctx.clock.reset_origin_at(offset);
            }
            ctx.free_recorders += 1;
            self.free_pass = true;
            self.last_write_pos = 0;
        }
        self.auto_record = false;
        self.set_state(ChannelState::Recording);
    }

    fn end_free_pass(&mut self, ctx: &mut BlockContext, state: ChannelState) {
        self.free_pass = false;
        ctx.free_recorders = ctx.free_recorders.saturating_sub(1);
        if state == ChannelState::Idle {
            self.clear();
        } else {
            self.set_state(state);
        }
    }

    /// Closes a first pass at `offset`, fixing the loop if it is still free.
    fn close_loop(&mut self, ctx: &mut BlockContext, offset: usize, recorded: usize) {
        if ctx.clock.has_loop() {
            // Someone else fixed it first; this channel just starts playing.
            if let Err(LooperError::LoopLengthAlreadySet { .. }) =
                ctx.clock.request_loop_length(recorded)
            {
                EngineCounters::bump(&ctx.counters.loop_length_rejections);
            }
            self.end_free_pass(ctx, ChannelState::Playing);
            return;
        }
        if recorded == 0 {
            self.end_free_pass(ctx, ChannelState::Idle);
            return;
        }
        let (len, bpm) = ctx.tempo.loop_length_for(recorded, self.loop_buffer.len());
        match ctx.clock.close_loop_at(len, offset) {
            Ok(_) => {
                ctx.derived_bpm = bpm;
                self.dirty_len = self.dirty_len.max(len);
                self.end_free_pass(ctx, ChannelState::Playing);
            }
            Err(_) => {
                EngineCounters::bump(&ctx.counters.loop_length_rejections);
                self.end_free_pass(ctx, ChannelState::Idle);
            }
        }
    }

    fn apply_transition(&mut self, transition: Transition, ctx: &mut BlockContext, offset: usize) {
        self.cancel_pending();
        match transition {
            Transition::StartRecording { .. } => {
                if matches!(self.state, ChannelState::Idle | ChannelState::Monitoring) {
                    self.start_pass(ctx, offset);
                }
            }
            Transition::CloseLoop { .. } => {
                if self.is_free_recording() {
                    let recorded = ctx.clock.position_at(offset) as usize;
                    self.close_loop(ctx, offset, recorded);
                }
            }
            Transition::StartOverdub { .. } => {
                if self.state == ChannelState::Playing {
                    self.set_state(ChannelState::Overdubbing);
                }
            }
            Transition::StopOverdub { .. } => {
                if self.state == ChannelState::Overdubbing {
                    self.set_state(ChannelState::Playing);
                }
            }
        }
    }

    /// Runs the channel's whole signal path for one block and mixes it into
    /// `output`.
    pub fn process_block(
        &mut self,
        input: &PlanarBuffer,
        midi: &[MidiEvent],
        output: &mut PlanarBuffer,
        ctx: &mut BlockContext,
    ) {
        let n = output.frames().min(self.scratch.len());
        self.fill_source(input, midi, n, ctx.counters);
        self.loop_out[..n].fill(0.0);

        let rolling = ctx.clock.is_rolling();
        let stopped = self.shared.is_stopped();

        if !rolling {
            // Frozen clock: only transitions that are already due can fire.
            if let Some(t) = self.pending {
                if t.at() <= ctx.clock.block_start_frame() {
                    self.apply_transition(t, ctx, 0);
                }
            }
        } else {
            for i in 0..n {
                let frame = ctx.clock.frame_at(i);
                if let Some(t) = self.pending {
                    if frame >= t.at() {
                        self.apply_transition(t, ctx, i);
                    }
                }

                let x = self.scratch[i];
                if self.state == ChannelState::Monitoring
                    && self.auto_record
                    && !ctx.clock.has_loop()
                    && x.abs() > LOOPER_ARM_THRESHOLD
                {
                    self.cancel_pending();
                    self.start_pass(ctx, i);
                }

                match self.state {
                    ChannelState::Recording if self.free_pass => {
                        let pos = ctx.clock.position_at(i) as usize;
                        if ctx.clock.has_loop() && (pos as u64) < self.last_write_pos {
                            // The loop was fixed elsewhere; this pass ends at the wrap.
                            self.end_free_pass(ctx, ChannelState::Playing);
                            if !stopped {
                                self.loop_out[i] = self.loop_buffer[pos];
                            }
                        } else if pos >= self.loop_buffer.len() {
                            let capacity = self.loop_buffer.len();
                            self.close_loop(ctx, i, capacity);
                            if self.state == ChannelState::Playing && !stopped {
                                let pos = ctx.clock.position_at(i) as usize;
                                self.loop_out[i] = self.loop_buffer[pos];
                            }
                        } else {
                            if !stopped {
                                self.loop_buffer[pos] = x;
                                self.dirty_len = self.dirty_len.max(pos + 1);
                            }
                            self.last_write_pos = pos as u64;
                        }
                    }
                    ChannelState::Recording => {
                        let pos = ctx.clock.position_at(i) as usize;
                        if frame >= self.record_end {
                            self.set_state(ChannelState::Playing);
                            if !stopped {
                                self.loop_out[i] = self.loop_buffer[pos];
                            }
                        } else if !stopped {
                            self.loop_buffer[pos] = x;
                        }
                    }
                    ChannelState::Overdubbing => {
                        if !stopped {
                            let pos = ctx.clock.position_at(i) as usize;
                            let old = self.loop_buffer[pos];
                            self.loop_out[i] = old;
                            self.loop_buffer[pos] = (old + x).clamp(-1.0, 1.0);
                        }
                    }
                    ChannelState::Playing => {
                        if !stopped {
                            let pos = ctx.clock.position_at(i) as usize;
                            self.loop_out[i] = self.loop_buffer[pos];
                        }
                    }
                    ChannelState::Idle | ChannelState::Monitoring => {}
                }
            }
        }

        self.mix_into(output, n, ctx.any_soloed);
    }

    fn mix_into(&mut self, output: &mut PlanarBuffer, n: usize, any_soloed: bool) {
        let mixer = self.shared.mixer_state();
        let gain = mixer.volume;
        let loop_gain = if mixer.is_audible(any_soloed) { gain } else { 0.0 };

        let mut peak = 0.0f32;
        let monitor = &self.scratch[..n];
        let looped = &self.loop_out[..n];
        for (m, l) in monitor.iter().zip(looped) {
            peak = peak.max((m * gain + l * loop_gain).abs());
        }
        self.shared.set_peak(peak);

        let mut mask = self.shared.routing().outputs;
        while mask != 0 {
            let ch = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            if ch >= output.channels() {
                break;
            }
            let out = &mut output.channel_mut(ch)[..n];
            for ((o, m), l) in out.iter_mut().zip(monitor).zip(looped) {
                *o += m * gain + l * loop_gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::ChannelRouting;

    const BLOCK: usize = 64;

    struct Rig {
        clock: LoopEngine,
        counters: EngineCounters,
        channel: Channel,
        input: PlanarBuffer,
        output: PlanarBuffer,
    }

    impl Rig {
        fn new(capacity: usize) -> Self {
            let shared = SharedChannelState::new(
                ChannelKind::Audio,
                ChannelRouting::from_indices(&[0], &[0]),
                None,
            );
            Self {
                clock: LoopEngine::new(24_000.0, 4, Quantize::Off),
                counters: EngineCounters::default(),
                channel: Channel::new(shared, capacity, BLOCK),
                input: PlanarBuffer::new(1, BLOCK),
                output: PlanarBuffer::new(1, BLOCK),
            }
        }

        fn block(&mut self, value: f32) -> Vec<f32> {
            self.input.channel_mut(0).fill(value);
            self.output.clear();
            self.clock.advance(BLOCK);
            let free = usize::from(self.channel.is_free_recording());
            let mut ctx = BlockContext {
                clock: &mut self.clock,
                free_recorders: free,
                counters: &self.counters,
                tempo: TempoRules {
                    sample_rate: 48_000.0,
                    tempo_from_first_loop: false,
                    bpm_rounding: false,
                    beats_per_loop: 4,
                },
                any_soloed: false,
                derived_bpm: None,
            };
            self.channel
                .process_block(&self.input, &[], &mut self.output, &mut ctx);
            self.output.channel(0).to_vec()
        }
    }

    #[test]
    fn test_first_pass_defines_loop_length() {
        let mut rig = Rig::new(4096);
        rig.channel.record(&rig.clock);
        rig.block(0.25);
        rig.block(0.25);
        assert_eq!(rig.channel.state(), ChannelState::Recording);
        rig.channel.record(&rig.clock);
        rig.block(0.0);
        assert_eq!(rig.channel.state(), ChannelState::Playing);
        assert_eq!(rig.clock.loop_length(), 2 * BLOCK);
    }

    #[test]
    fn test_pass_with_nothing_recorded_returns_to_idle() {
        let mut rig = Rig::new(4096);
        rig.clock.set_rolling(false);
        rig.channel.record(&rig.clock);
        rig.block(0.5);
        assert_eq!(rig.channel.state(), ChannelState::Recording);
        rig.channel.record(&rig.clock);
        rig.block(0.5);
        assert_eq!(rig.channel.state(), ChannelState::Idle);
        assert_eq!(rig.clock.loop_length(), 0);
    }

    #[test]
    fn test_full_buffer_closes_pass() {
        let mut rig = Rig::new(100);
        rig.channel.record(&rig.clock);
        rig.block(0.1);
        rig.block(0.1);
        assert_eq!(rig.clock.loop_length(), 100);
        assert_eq!(rig.channel.state(), ChannelState::Playing);
    }

    #[test]
    fn test_overdub_is_additive_and_clamped() {
        let mut rig = Rig::new(4096);
        rig.channel.record(&rig.clock);
        rig.block(1.0);
        rig.channel.record(&rig.clock);
        let out = rig.block(1.0);
        assert_eq!(rig.channel.state(), ChannelState::Playing);
        // Monitor (1.0) plus loop playback (1.0).
        assert!(out.iter().all(|&s| (s - 2.0).abs() < 1e-6));

        rig.channel.overdub(&rig.clock);
        rig.block(1.0);
        assert_eq!(rig.channel.state(), ChannelState::Overdubbing);
        assert!(rig.channel.loop_audio(BLOCK).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_clear_zeroes_loop_and_goes_idle() {
        let mut rig = Rig::new(4096);
        rig.channel.record(&rig.clock);
        rig.block(0.5);
        rig.channel.record(&rig.clock);
        rig.block(0.0);
        rig.channel.clear();
        assert_eq!(rig.channel.state(), ChannelState::Idle);
        assert!(rig.channel.loop_buffer[..BLOCK].iter().all(|&s| s == 0.0));
        // The loop length stays.
        assert_eq!(rig.clock.loop_length(), BLOCK);
    }

    #[test]
    fn test_armed_channel_records_on_threshold() {
        let mut rig = Rig::new(4096);
        rig.channel.arm();
        rig.block(0.01);
        assert_eq!(rig.channel.state(), ChannelState::Monitoring);
        rig.block(0.2);
        assert_eq!(rig.channel.state(), ChannelState::Recording);
    }

    #[test]
    fn test_stopped_flag_silences_playback() {
        let mut rig = Rig::new(4096);
        rig.channel.record(&rig.clock);
        rig.block(0.5);
        rig.channel.record(&rig.clock);
        rig.block(0.0);
        rig.channel.shared().set_stopped(true);
        let out = rig.block(0.0);
        assert!(out.iter().all(|&s| s == 0.0));
        rig.channel.shared().set_stopped(false);
        let out = rig.block(0.0);
        assert!(out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_press_cancels_pending_transition() {
        let mut rig = Rig::new(4096);
        rig.clock.request_loop_length(1000).unwrap();
        rig.clock.set_quantize(Quantize::Loop);
        rig.block(0.0);
        rig.channel.press(&rig.clock);
        assert!(rig.channel.has_pending());
        rig.channel.press(&rig.clock);
        assert!(!rig.channel.has_pending());
        assert_eq!(rig.channel.state(), ChannelState::Idle);
    }

    #[test]
    fn test_tempo_rounding() {
        let rules = TempoRules {
            sample_rate: 48_000.0,
            tempo_from_first_loop: true,
            bpm_rounding: true,
            beats_per_loop: 4,
        };
        // 95_000 samples is 121.26 BPM; rounded to 121 the loop is 95_207 samples.
        let (len, bpm) = rules.loop_length_for(95_000, 1_000_000);
        assert_eq!(bpm, Some(121.0));
        assert_eq!(len, 95_207);
    }
}
