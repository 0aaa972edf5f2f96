// src/audio_engine.rs

pub mod buffer;
pub mod channel;
pub mod command;
pub mod fx_chain;
pub mod handoff;
pub mod loop_engine;
pub mod metronome;
pub mod telemetry;

use crate::audio_engine::buffer::PlanarBuffer;
use crate::audio_engine::channel::{BlockContext, Channel, TempoRules};
use crate::audio_engine::command::{
    command_queue, Command, CommandOp, CommandReceiver, CommandSender, CommandTarget, Quantize,
};
use crate::audio_engine::handoff::{handoff_queues, AudioHandoff, ControlHandoff, Handoff, Returned};
use crate::audio_engine::loop_engine::LoopEngine;
use crate::audio_engine::metronome::{Metronome, MetronomeParams, MetronomeSettings};
use crate::audio_engine::telemetry::{EngineCounters, Telemetry};
use crate::looper::{ChannelKind, ChannelRouting, SharedChannelState};
use crate::midi::{block_offset, micros_since, MidiEvent, MidiEventSender, StampedMidi};
use ringbuf::{HeapConsumer, HeapRb};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Upper bound on commands applied per callback, across all queues.
pub const MAX_COMMANDS_PER_BLOCK: usize = 256;
const MAX_HANDOFFS_PER_BLOCK: usize = 16;
const MAX_MIDI_EVENTS_PER_BLOCK: usize = 512;
const HANDOFF_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSetup {
    pub kind: ChannelKind,
    pub routing: ChannelRouting,
    pub midi_channel: Option<u8>,
}

/// Everything the engine needs to size its buffers up front.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub max_loop_seconds: f32,
    pub beats_per_bar: u32,
    pub beats_per_loop: u32,
    pub quantize: Quantize,
    pub tempo_from_first_loop: bool,
    pub bpm_rounding: bool,
    pub command_queue_capacity: usize,
    pub metronome: MetronomeSettings,
    pub channels: Vec<ChannelSetup>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_block_size: 512,
            input_channels: 2,
            output_channels: 2,
            max_loop_seconds: 60.0,
            beats_per_bar: 4,
            beats_per_loop: 4,
            quantize: Quantize::Bar,
            tempo_from_first_loop: false,
            bpm_rounding: false,
            command_queue_capacity: 1024,
            metronome: MetronomeSettings::default(),
            channels: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn loop_capacity(&self) -> usize {
        ((self.max_loop_seconds.max(0.0) * self.sample_rate) as usize).max(1)
    }
}

/// The control thread's ends of everything the engine exposes.
pub struct ControlHandles {
    pub commands: CommandSender,
    pub handoff: ControlHandoff,
    pub channels: Vec<SharedChannelState>,
    pub telemetry: Arc<Telemetry>,
    pub metronome: Arc<MetronomeParams>,
    pub sample_rate: f32,
    pub max_block_size: usize,
    /// Samples each channel's loop buffer holds.
    pub loop_capacity: usize,
}

/// Owns the clock, the metronome and every channel. `process_block` is the
/// whole audio callback; nothing in it allocates, locks or blocks.
pub struct AudioEngine {
    command_receivers: Vec<CommandReceiver>,
    handoff: AudioHandoff,
    midi_consumers: Vec<HeapConsumer<StampedMidi>>,
    midi_pending: Vec<StampedMidi>,
    midi_events: Vec<MidiEvent>,
    midi_epoch: Instant,
    last_block_us: Option<u64>,
    clock: LoopEngine,
    metronome: Metronome,
    channels: Vec<Channel>,
    telemetry: Arc<Telemetry>,
    sample_rate: f32,
    max_block_size: usize,
    loop_capacity: usize,
    beats_per_bar: u32,
    tempo: TempoRules,
}

impl AudioEngine {
    pub fn new(config: &EngineConfig) -> (Self, ControlHandles) {
        let telemetry = Arc::new(Telemetry::default());
        let (commands, receiver) = command_queue(
            config.command_queue_capacity,
            telemetry.counters.commands_dropped.clone(),
        );
        let (control_handoff, audio_handoff) = handoff_queues(HANDOFF_CAPACITY);
        let metronome_params = Arc::new(MetronomeParams::new(&config.metronome));

        let shared: Vec<SharedChannelState> = config
            .channels
            .iter()
            .map(|c| SharedChannelState::new(c.kind, c.routing, c.midi_channel))
            .collect();
        let loop_capacity = config.loop_capacity();
        let channels = shared
            .iter()
            .map(|s| Channel::new(s.clone(), loop_capacity, config.max_block_size))
            .collect();

        let clock = LoopEngine::new(
            metronome_params.samples_per_beat(config.sample_rate),
            config.beats_per_bar,
            config.quantize,
        );
        telemetry.rolling.store(clock.is_rolling(), Ordering::Release);
        telemetry.quantize.store(config.quantize as u8, Ordering::Release);

        let engine = Self {
            command_receivers: vec![receiver],
            handoff: audio_handoff,
            midi_consumers: Vec::new(),
            midi_pending: Vec::with_capacity(MAX_MIDI_EVENTS_PER_BLOCK),
            midi_events: Vec::with_capacity(MAX_MIDI_EVENTS_PER_BLOCK),
            midi_epoch: Instant::now(),
            last_block_us: None,
            clock,
            metronome: Metronome::new(metronome_params.clone(), config.sample_rate),
            channels,
            telemetry: telemetry.clone(),
            sample_rate: config.sample_rate,
            max_block_size: config.max_block_size,
            loop_capacity,
            beats_per_bar: config.beats_per_bar,
            tempo: TempoRules {
                sample_rate: config.sample_rate,
                tempo_from_first_loop: config.tempo_from_first_loop,
                bpm_rounding: config.bpm_rounding,
                beats_per_loop: config.beats_per_loop,
            },
        };

        let handles = ControlHandles {
            commands,
            handoff: control_handoff,
            channels: shared,
            telemetry,
            metronome: metronome_params,
            sample_rate: config.sample_rate,
            max_block_size: config.max_block_size,
            loop_capacity,
        };
        (engine, handles)
    }

    /// Adds another command producer (one per control caller). Call before the
    /// engine moves to the audio thread.
    pub fn open_command_queue(&mut self, capacity: usize) -> CommandSender {
        let (sender, receiver) =
            command_queue(capacity, self.telemetry.counters.commands_dropped.clone());
        self.command_receivers.push(receiver);
        sender
    }

    /// Adds a MIDI source. Events received during one callback interval are
    /// played in the next block at the same relative position.
    pub fn open_midi_input(&mut self, capacity: usize) -> MidiEventSender {
        let (producer, consumer) = HeapRb::<StampedMidi>::new(capacity.max(1)).split();
        self.midi_consumers.push(consumer);
        MidiEventSender::new(producer, self.midi_epoch)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Re-derives rate-dependent state and resets oscillators.
    pub fn prepare_to_play(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.tempo.sample_rate = sample_rate;
        self.metronome.prepare_to_play(sample_rate);
        for channel in self.channels.iter_mut() {
            channel.prepare(sample_rate, self.max_block_size);
        }
    }

    pub fn handle_commands(&mut self) {
        let mut budget = MAX_COMMANDS_PER_BLOCK;
        for q in 0..self.command_receivers.len() {
            while budget > 0 {
                let Some(command) = self.command_receivers[q].pop() else {
                    break;
                };
                budget -= 1;
                self.apply_command(command);
            }
        }
    }

    fn apply_command(&mut self, command: Command) {
        if !command.is_well_formed() {
            EngineCounters::bump(&self.telemetry.counters.commands_malformed);
            return;
        }
        match command.target {
            CommandTarget::Transport => self.apply_transport(command.op),
            CommandTarget::Metronome => self.apply_metronome(command.op),
            CommandTarget::Channel(index) => {
                let index = index as usize;
                if index >= self.channels.len() {
                    EngineCounters::bump(&self.telemetry.counters.commands_malformed);
                    return;
                }
                self.apply_channel(index, command.op);
            }
        }
        EngineCounters::bump(&self.telemetry.counters.commands_applied);
    }

    fn apply_transport(&mut self, op: CommandOp) {
        match op {
            CommandOp::Play => self.clock.set_rolling(true),
            CommandOp::Stop => self.clock.set_rolling(false),
            CommandOp::ResetSong => self.reset_song(),
            CommandOp::SetQuantize(q) => self.clock.set_quantize(q),
            _ => {}
        }
    }

    fn apply_metronome(&mut self, op: CommandOp) {
        let params = self.metronome.params().clone();
        match op {
            CommandOp::SetMetronomeEnabled(on) => params.enabled.store(on, Ordering::Release),
            CommandOp::ToggleMetronome => {
                params.enabled.fetch_xor(true, Ordering::AcqRel);
            }
            CommandOp::SetBpm(bpm) => params.bpm.store(bpm),
            CommandOp::SetClickOutputs { left, right } => {
                params.left_output.store(left, Ordering::Release);
                params.right_output.store(right, Ordering::Release);
            }
            CommandOp::SetClickFrequency(hz) => params.frequency_hz.store(hz),
            CommandOp::SetClickDurationMs(ms) => params.duration_ms.store(ms),
            CommandOp::SetClickAmplitude(a) => params.amplitude.store(a),
            _ => {}
        }
    }

    fn apply_channel(&mut self, index: usize, op: CommandOp) {
        let clock = &self.clock;
        let channel = &mut self.channels[index];
        match op {
            CommandOp::Arm => channel.arm(),
            CommandOp::Disarm => channel.disarm(),
            CommandOp::Record => channel.record(clock),
            CommandOp::Overdub => channel.overdub(clock),
            CommandOp::StopOverdub => channel.stop_overdub(clock),
            CommandOp::Press => channel.press(clock),
            CommandOp::Clear => channel.clear(),
            CommandOp::SetStopped(stopped) => channel.shared().set_stopped(stopped),
            CommandOp::SetGain(gain) => channel.shared().set_gain(gain),
            CommandOp::SetMuted(muted) => channel.shared().set_muted(muted),
            CommandOp::ToggleMuted => {
                let muted = channel.shared().is_muted();
                channel.shared().set_muted(!muted);
            }
            CommandOp::SetSoloed(soloed) => channel.shared().set_soloed(soloed),
            CommandOp::ToggleSoloed => {
                let soloed = channel.shared().is_soloed();
                channel.shared().set_soloed(!soloed);
            }
            CommandOp::SetRouting { inputs, outputs } => {
                channel.shared().set_routing(ChannelRouting { inputs, outputs })
            }
            CommandOp::SetMidiChannel(ch) => channel.shared().set_midi_channel(ch),
            CommandOp::SetKind(kind) => {
                if let Some(node) = channel.set_kind(kind) {
                    self.handoff.give_back(
                        Returned::RetiredInstrument(node),
                        &self.telemetry.counters.returns_overflowed,
                    );
                }
            }
            CommandOp::ClearFxSlot(slot) => {
                if let Some(fx) = channel.take_fx(slot as usize) {
                    self.handoff.give_back(
                        Returned::RetiredFx(fx),
                        &self.telemetry.counters.returns_overflowed,
                    );
                }
            }
            CommandOp::ClearInstrument => {
                if let Some(node) = channel.take_instrument() {
                    self.handoff.give_back(
                        Returned::RetiredInstrument(node),
                        &self.telemetry.counters.returns_overflowed,
                    );
                }
            }
            _ => {}
        }
    }

    fn reset_song(&mut self) {
        self.clock.reset();
        for channel in self.channels.iter_mut() {
            channel.clear();
            channel.reset_plugins();
        }
        self.metronome.reset();
    }

    fn handle_handoffs(&mut self) {
        for _ in 0..MAX_HANDOFFS_PER_BLOCK {
            let Some(item) = self.handoff.pop() else {
                break;
            };
            let telemetry = self.telemetry.clone();
            let overflowed = &telemetry.counters.returns_overflowed;
            match item {
                Handoff::InstallFx { channel, slot, fx } => {
                    let retired = match self.channels.get_mut(channel) {
                        Some(ch) => match ch.install_fx(slot, fx) {
                            Ok(old) => old,
                            Err(fx) => Some(fx),
                        },
                        None => Some(fx),
                    };
                    if let Some(fx) = retired {
                        self.handoff.give_back(Returned::RetiredFx(fx), overflowed);
                    }
                }
                Handoff::InstallInstrument { channel, node } => {
                    let retired = match self.channels.get_mut(channel) {
                        Some(ch) => match ch.install_instrument(node) {
                            Ok(old) => old,
                            Err(node) => Some(node),
                        },
                        None => Some(node),
                    };
                    if let Some(node) = retired {
                        self.handoff
                            .give_back(Returned::RetiredInstrument(node), overflowed);
                    }
                }
                Handoff::Capture { mut buffers } => {
                    let loop_length = self.clock.loop_length();
                    let mut complete = buffers.len() >= self.channels.len();
                    for (channel, buffer) in self.channels.iter().zip(buffers.iter_mut()) {
                        complete &= channel.capture_into(buffer, loop_length);
                    }
                    self.handoff.give_back(
                        Returned::Captured {
                            loop_length,
                            buffers,
                            complete,
                        },
                        overflowed,
                    );
                }
                Handoff::Restore { loop_length, loops } => {
                    if loop_length > self.loop_capacity {
                        // Would read past the loop buffers; keep the current song.
                        EngineCounters::bump(&telemetry.counters.loop_length_rejections);
                        self.handoff.give_back(Returned::RestoreSpent(loops), overflowed);
                        continue;
                    }
                    self.reset_song();
                    if loop_length > 0 && self.clock.request_loop_length(loop_length).is_err() {
                        EngineCounters::bump(&telemetry.counters.loop_length_rejections);
                    }
                    let loop_length = self.clock.loop_length();
                    for (channel, audio) in self.channels.iter_mut().zip(loops.iter()) {
                        if let Some(audio) = audio {
                            channel.restore(audio, loop_length);
                        }
                    }
                    self.handoff.give_back(Returned::RestoreSpent(loops), overflowed);
                }
            }
        }
    }

    fn collect_midi(&mut self, block_start: Instant, frames: usize) {
        let now_us = micros_since(self.midi_epoch, block_start);
        let window_start = self.last_block_us.replace(now_us).unwrap_or(now_us);

        self.midi_pending.clear();
        for consumer in self.midi_consumers.iter_mut() {
            while self.midi_pending.len() < self.midi_pending.capacity() {
                let Some(stamped) = consumer.pop() else {
                    break;
                };
                self.midi_pending.push(stamped);
            }
        }
        if self.midi_consumers.len() > 1 {
            self.midi_pending.sort_unstable_by_key(|s| s.micros);
        }

        self.midi_events.clear();
        for stamped in self.midi_pending.iter() {
            let offset = block_offset(stamped.micros, window_start, now_us, frames);
            self.midi_events.push(MidiEvent { offset, ..stamped.event });
        }
    }

    /// One audio callback. `output` is overwritten. Blocks longer than
    /// `max_block_size` are truncated; callers split them.
    pub fn process_block(&mut self, input: &PlanarBuffer, output: &mut PlanarBuffer) {
        let start_time = Instant::now();
        let num_samples = input.frames().min(output.capacity()).min(self.max_block_size);
        output.set_frames(num_samples);
        output.clear();

        self.handoff.flush();
        // Commands first so kind changes and slot clears precede installs.
        self.handle_commands();
        self.handle_handoffs();
        self.collect_midi(start_time, num_samples);

        let spb = self.metronome.params().samples_per_beat(self.sample_rate);
        self.clock.set_grid(spb, self.beats_per_bar);
        self.clock.advance(num_samples);

        let mut ctx = BlockContext {
            clock: &mut self.clock,
            free_recorders: self.channels.iter().filter(|c| c.is_free_recording()).count(),
            counters: &self.telemetry.counters,
            tempo: self.tempo,
            any_soloed: self.channels.iter().any(|c| c.shared().is_soloed()),
            derived_bpm: None,
        };
        for channel in self.channels.iter_mut() {
            channel.process_block(input, &self.midi_events, output, &mut ctx);
        }

        if let Some(bpm) = ctx.derived_bpm {
            self.metronome.params().bpm.store(bpm);
            self.metronome.prepare_to_play(self.sample_rate);
        }
        // Clicks follow the quantize grid, which starts at loop position 0.
        if let Some(offset) = self.clock.origin_in_block() {
            self.metronome.align_beat_to(offset);
        }
        let rolling = self.clock.is_rolling();
        self.metronome.process_block(output, rolling);

        self.publish_telemetry(start_time, num_samples);
    }

    fn publish_telemetry(&self, start_time: Instant, num_samples: usize) {
        let t = &self.telemetry;
        t.playhead.store(self.clock.playhead(), Ordering::Relaxed);
        t.frames.store(self.clock.frames(), Ordering::Relaxed);
        t.loop_length
            .store(self.clock.loop_length() as u64, Ordering::Release);
        t.rolling.store(self.clock.is_rolling(), Ordering::Release);
        t.quantize.store(self.clock.quantize() as u8, Ordering::Release);

        let elapsed = start_time.elapsed();
        if num_samples > 0 {
            let buffer_duration_seconds = num_samples as f32 / self.sample_rate;
            let load_ratio = elapsed.as_secs_f32() / buffer_duration_seconds;
            t.cpu_load.store_relaxed(load_ratio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::ChannelState;
    use crate::plugins::sine_synth::{Params, SineSynth};
    use std::time::Duration;

    fn config(channels: usize) -> EngineConfig {
        EngineConfig {
            max_block_size: 64,
            input_channels: 1,
            output_channels: 2,
            max_loop_seconds: 1.0,
            quantize: Quantize::Off,
            channels: (0..channels)
                .map(|_| ChannelSetup {
                    kind: ChannelKind::Audio,
                    routing: ChannelRouting::from_indices(&[0], &[0]),
                    midi_channel: None,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn run(engine: &mut AudioEngine, value: f32) -> PlanarBuffer {
        let mut input = PlanarBuffer::new(1, 64);
        input.channel_mut(0).fill(value);
        let mut output = PlanarBuffer::new(2, 64);
        engine.process_block(&input, &mut output);
        output
    }

    #[test]
    fn test_commands_apply_in_order() {
        let (mut engine, mut handles) = AudioEngine::new(&config(1));
        handles
            .commands
            .send(Command::channel(0, CommandOp::SetGain(0.5)))
            .unwrap();
        handles
            .commands
            .send(Command::channel(0, CommandOp::SetGain(0.8)))
            .unwrap();
        run(&mut engine, 0.0);
        assert_eq!(handles.channels[0].gain(), 0.8);
    }

    #[test]
    fn test_malformed_commands_are_counted() {
        let (mut engine, mut handles) = AudioEngine::new(&config(1));
        handles
            .commands
            .send(Command::channel(7, CommandOp::Record))
            .unwrap();
        handles
            .commands
            .send(Command::metronome(CommandOp::Press))
            .unwrap();
        run(&mut engine, 0.0);
        let counters = handles.telemetry.counters.snapshot();
        assert_eq!(counters.commands_malformed, 2);
        assert_eq!(counters.commands_applied, 0);
    }

    #[test]
    fn test_telemetry_tracks_clock() {
        let (mut engine, handles) = AudioEngine::new(&config(0));
        run(&mut engine, 0.0);
        run(&mut engine, 0.0);
        assert_eq!(handles.telemetry.frames(), 128);
        assert_eq!(handles.telemetry.playhead(), 128);
        assert_eq!(handles.telemetry.loop_length(), 0);
    }

    #[test]
    fn test_oversized_restore_is_rejected_on_audio_thread() {
        let (mut engine, mut handles) = AudioEngine::new(&config(1));
        let too_long = handles.loop_capacity + 1;
        assert!(handles
            .handoff
            .to_audio
            .push(Handoff::Restore {
                loop_length: too_long,
                loops: vec![Some(vec![0.25; too_long])],
            })
            .is_ok());
        for _ in 0..(too_long / 64 + 2) {
            run(&mut engine, 0.0);
        }
        assert_eq!(handles.telemetry.loop_length(), 0);
        assert_eq!(handles.channels[0].get(), ChannelState::Idle);
        assert_eq!(handles.telemetry.counters.snapshot().loop_length_rejections, 1);
        assert!(matches!(
            handles.handoff.from_audio.pop(),
            Some(Returned::RestoreSpent(_))
        ));
    }

    fn instrument_engine() -> (AudioEngine, ControlHandles, MidiEventSender) {
        let mut cfg = config(1);
        cfg.channels[0].kind = ChannelKind::Instrument;
        let (mut engine, mut handles) = AudioEngine::new(&cfg);
        let midi = engine.open_midi_input(16);
        assert!(handles
            .handoff
            .to_audio
            .push(Handoff::InstallInstrument {
                channel: 0,
                node: Box::new(SineSynth::new(Arc::new(Params::default()))),
            })
            .is_ok());
        run(&mut engine, 0.0);
        (engine, handles, midi)
    }

    #[test]
    fn test_midi_lands_at_arrival_offset() {
        let (mut engine, _handles, mut midi) = instrument_engine();
        let note = MidiEvent::new(0, 0x90, 69, 100);

        // Arrived before the previous block started: plays from the top.
        assert!(midi.send_at(note, engine.midi_epoch));
        let out = run(&mut engine, 0.0);
        assert_eq!(out.channel(0)[0], 0.0);
        assert!(out.channel(0)[1] != 0.0);

        // Arrived after this block started: last sample of the block.
        let (mut engine, _handles, mut midi) = instrument_engine();
        assert!(midi.send_at(note, Instant::now() + Duration::from_secs(60)));
        let out = run(&mut engine, 0.0);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
        let out = run(&mut engine, 0.0);
        assert!(out.channel(0).iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_reset_song_silences_held_notes() {
        let (mut engine, mut handles, mut midi) = instrument_engine();
        assert!(midi.send(MidiEvent::new(0, 0x90, 60, 100)));
        run(&mut engine, 0.0);
        let out = run(&mut engine, 0.0);
        assert!(out.channel(0).iter().any(|&s| s != 0.0));

        handles.commands.send(Command::transport(CommandOp::ResetSong)).unwrap();
        let out = run(&mut engine, 0.0);
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stop_freezes_frames() {
        let (mut engine, mut handles) = AudioEngine::new(&config(0));
        handles.commands.send(Command::transport(CommandOp::Stop)).unwrap();
        run(&mut engine, 0.0);
        assert_eq!(handles.telemetry.frames(), 0);
        assert!(!handles.telemetry.is_rolling());
    }
}
