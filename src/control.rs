// src/control.rs

//! The control-thread side of the engine.
//!
//! `LooperControl` validates requests, turns them into commands or handoffs
//! and keeps the plugin bookkeeping the audio thread has no room for. It is
//! the only place audio-thread counters are turned into log lines.

use crate::audio_engine::command::{Command, CommandOp, CommandSender, Quantize};
use crate::audio_engine::fx_chain::{FxSlot, FX_SLOTS};
use crate::audio_engine::handoff::{ControlHandoff, Handoff, Returned};
use crate::audio_engine::metronome::{MetronomeParams, MetronomeSettings};
use crate::audio_engine::telemetry::{CounterSnapshot, Telemetry};
use crate::audio_engine::ControlHandles;
use crate::error::LooperError;
use crate::looper::{ChannelKind, ChannelRouting, ChannelState, SharedChannelState};
use crate::plugins::{PluginHost, PluginState};
use crate::session::{ChannelSnapshot, EngineSnapshot, PluginSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Addresses one plugin position on a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginSlot {
    Fx(usize),
    Instrument,
}

struct MountedPlugin {
    plugin_id: String,
    state: Arc<dyn PluginState>,
    bypassed: Arc<AtomicBool>,
}

impl MountedPlugin {
    fn snapshot(&self) -> PluginSnapshot {
        PluginSnapshot {
            plugin_id: self.plugin_id.clone(),
            state: self.state.get_state_base64(),
            bypassed: self.bypassed.load(Ordering::Acquire),
        }
    }
}

#[derive(Default)]
struct ChannelPlugins {
    fx: [Option<MountedPlugin>; FX_SLOTS],
    instrument: Option<MountedPlugin>,
}

impl ChannelPlugins {
    fn get(&self, slot: PluginSlot) -> Option<&MountedPlugin> {
        match slot {
            PluginSlot::Fx(i) => self.fx.get(i).and_then(Option::as_ref),
            PluginSlot::Instrument => self.instrument.as_ref(),
        }
    }
}

/// One row of `LooperControl::status`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub kind: ChannelKind,
    pub pending: bool,
    pub stopped: bool,
    pub gain: f32,
    pub muted: bool,
    pub soloed: bool,
    pub peak: f32,
}

pub struct LooperControl {
    commands: CommandSender,
    handoff: ControlHandoff,
    channels: Vec<SharedChannelState>,
    telemetry: Arc<Telemetry>,
    metronome: Arc<MetronomeParams>,
    sample_rate: f32,
    max_block_size: usize,
    loop_capacity: usize,
    host: Box<dyn PluginHost>,
    plugins: Vec<ChannelPlugins>,
    capture_pending: bool,
    last_counters: CounterSnapshot,
}

impl LooperControl {
    pub fn new(handles: ControlHandles, host: Box<dyn PluginHost>) -> Self {
        let plugins = handles.channels.iter().map(|_| ChannelPlugins::default()).collect();
        Self {
            commands: handles.commands,
            handoff: handles.handoff,
            channels: handles.channels,
            telemetry: handles.telemetry,
            metronome: handles.metronome,
            sample_rate: handles.sample_rate,
            max_block_size: handles.max_block_size,
            loop_capacity: handles.loop_capacity,
            host,
            plugins,
            capture_pending: false,
            last_counters: CounterSnapshot::default(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Longest loop, in samples, the engine can hold.
    pub fn loop_capacity(&self) -> usize {
        self.loop_capacity
    }

    pub fn channel(&self, index: usize) -> Result<&SharedChannelState, LooperError> {
        self.channels
            .get(index)
            .ok_or(LooperError::ChannelOutOfRange(index))
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels
            .iter()
            .map(|c| ChannelStatus {
                state: c.get(),
                kind: c.kind(),
                pending: c.is_pending(),
                stopped: c.is_stopped(),
                gain: c.gain(),
                muted: c.is_muted(),
                soloed: c.is_soloed(),
                peak: c.peak(),
            })
            .collect()
    }

    pub fn send(&mut self, command: Command) -> Result<(), LooperError> {
        self.commands.send(command)
    }

    fn channel_command(&mut self, index: usize, op: CommandOp) -> Result<(), LooperError> {
        self.channel(index)?;
        self.send(Command::channel(index, op))
    }

    // --- Transport ---

    pub fn play(&mut self) -> Result<(), LooperError> {
        self.send(Command::transport(CommandOp::Play))
    }

    pub fn stop(&mut self) -> Result<(), LooperError> {
        self.send(Command::transport(CommandOp::Stop))
    }

    /// Clears every channel and forgets the loop length.
    pub fn reset_song(&mut self) -> Result<(), LooperError> {
        self.send(Command::transport(CommandOp::ResetSong))
    }

    pub fn set_quantize(&mut self, quantize: Quantize) -> Result<(), LooperError> {
        self.send(Command::transport(CommandOp::SetQuantize(quantize)))
    }

    // --- Channels ---

    pub fn press(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::Press)
    }

    pub fn record(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::Record)
    }

    pub fn overdub(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::Overdub)
    }

    pub fn stop_overdub(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::StopOverdub)
    }

    pub fn arm(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::Arm)
    }

    pub fn disarm(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::Disarm)
    }

    pub fn clear(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::Clear)
    }

    pub fn set_gain(&mut self, index: usize, gain: f32) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::SetGain(gain))
    }

    pub fn set_muted(&mut self, index: usize, muted: bool) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::SetMuted(muted))
    }

    pub fn toggle_mute(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::ToggleMuted)
    }

    pub fn set_soloed(&mut self, index: usize, soloed: bool) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::SetSoloed(soloed))
    }

    pub fn toggle_solo(&mut self, index: usize) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::ToggleSoloed)
    }

    /// Silences a channel's loop without losing it.
    pub fn set_stopped(&mut self, index: usize, stopped: bool) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::SetStopped(stopped))
    }

    pub fn set_routing(&mut self, index: usize, routing: ChannelRouting) -> Result<(), LooperError> {
        self.channel_command(
            index,
            CommandOp::SetRouting {
                inputs: routing.inputs,
                outputs: routing.outputs,
            },
        )
    }

    pub fn set_midi_channel(&mut self, index: usize, channel: Option<u8>) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::SetMidiChannel(channel))
    }

    /// Switching away from an instrument drops its bookkeeping; the node
    /// itself comes back on the return queue.
    pub fn set_kind(&mut self, index: usize, kind: ChannelKind) -> Result<(), LooperError> {
        self.channel_command(index, CommandOp::SetKind(kind))?;
        if kind == ChannelKind::Audio {
            self.plugins[index].instrument = None;
        }
        Ok(())
    }

    // --- Metronome ---

    pub fn set_metronome_enabled(&mut self, enabled: bool) -> Result<(), LooperError> {
        self.send(Command::metronome(CommandOp::SetMetronomeEnabled(enabled)))
    }

    pub fn toggle_metronome(&mut self) -> Result<(), LooperError> {
        self.send(Command::metronome(CommandOp::ToggleMetronome))
    }

    /// Only accepted while the transport is stopped.
    pub fn set_bpm(&mut self, bpm: f32) -> Result<(), LooperError> {
        if self.telemetry.is_rolling() {
            return Err(LooperError::TransportRolling);
        }
        self.send(Command::metronome(CommandOp::SetBpm(bpm)))
    }

    pub fn set_click_outputs(&mut self, left: u16, right: u16) -> Result<(), LooperError> {
        self.send(Command::metronome(CommandOp::SetClickOutputs { left, right }))
    }

    pub fn set_click_frequency(&mut self, hz: f32) -> Result<(), LooperError> {
        self.send(Command::metronome(CommandOp::SetClickFrequency(hz)))
    }

    pub fn set_click_duration_ms(&mut self, ms: f32) -> Result<(), LooperError> {
        self.send(Command::metronome(CommandOp::SetClickDurationMs(ms)))
    }

    pub fn set_click_amplitude(&mut self, amplitude: f32) -> Result<(), LooperError> {
        self.send(Command::metronome(CommandOp::SetClickAmplitude(amplitude)))
    }

    pub fn metronome_settings(&self) -> MetronomeSettings {
        self.metronome.settings()
    }

    // --- Plugins ---

    /// Instantiates `plugin_id` and sends it to FX `slot` of channel `index`.
    pub fn install_plugin(
        &mut self,
        index: usize,
        slot: usize,
        plugin_id: &str,
    ) -> Result<(), LooperError> {
        self.channel(index)?;
        if slot >= FX_SLOTS {
            return Err(LooperError::SlotOutOfRange(slot));
        }
        let instance = self
            .host
            .instantiate(plugin_id, self.sample_rate, self.max_block_size)?;
        let mounted = MountedPlugin {
            plugin_id: instance.plugin_id,
            state: instance.state,
            bypassed: instance.bypassed.clone(),
        };
        let fx = FxSlot {
            node: instance.node,
            bypassed: instance.bypassed,
        };
        self.push_handoff(Handoff::InstallFx {
            channel: index,
            slot,
            fx,
        })?;
        log::info!("Channel {}: '{}' installed in FX slot {}", index, mounted.plugin_id, slot);
        self.plugins[index].fx[slot] = Some(mounted);
        Ok(())
    }

    /// Makes channel `index` an instrument channel playing `plugin_id`.
    pub fn set_instrument(&mut self, index: usize, plugin_id: &str) -> Result<(), LooperError> {
        if self.channel(index)?.kind() != ChannelKind::Instrument {
            self.channel_command(index, CommandOp::SetKind(ChannelKind::Instrument))?;
        }
        let instance = self
            .host
            .instantiate(plugin_id, self.sample_rate, self.max_block_size)?;
        let mounted = MountedPlugin {
            plugin_id: instance.plugin_id,
            state: instance.state,
            bypassed: instance.bypassed,
        };
        self.push_handoff(Handoff::InstallInstrument {
            channel: index,
            node: instance.node,
        })?;
        log::info!("Channel {}: instrument '{}' installed", index, mounted.plugin_id);
        self.plugins[index].instrument = Some(mounted);
        Ok(())
    }

    pub fn remove_plugin(&mut self, index: usize, slot: PluginSlot) -> Result<(), LooperError> {
        self.channel(index)?;
        match slot {
            PluginSlot::Fx(i) if i >= FX_SLOTS => return Err(LooperError::SlotOutOfRange(i)),
            PluginSlot::Fx(i) => {
                self.channel_command(index, CommandOp::ClearFxSlot(i as u8))?;
                self.plugins[index].fx[i] = None;
            }
            PluginSlot::Instrument => {
                self.channel_command(index, CommandOp::ClearInstrument)?;
                self.plugins[index].instrument = None;
            }
        }
        Ok(())
    }

    pub fn plugin_id(&self, index: usize, slot: PluginSlot) -> Result<Option<&str>, LooperError> {
        self.channel(index)?;
        Ok(self.plugins[index].get(slot).map(|p| p.plugin_id.as_str()))
    }

    pub fn set_bypassed(
        &self,
        index: usize,
        slot: PluginSlot,
        bypassed: bool,
    ) -> Result<(), LooperError> {
        self.mounted(index, slot)?
            .bypassed
            .store(bypassed, Ordering::Release);
        Ok(())
    }

    pub fn plugin_state(&self, index: usize, slot: PluginSlot) -> Result<String, LooperError> {
        Ok(self.mounted(index, slot)?.state.get_state_base64())
    }

    pub fn set_plugin_state(
        &self,
        index: usize,
        slot: PluginSlot,
        state: &str,
    ) -> Result<(), LooperError> {
        self.mounted(index, slot)?
            .state
            .set_state_base64(state)
            .map_err(LooperError::from)
    }

    fn mounted(&self, index: usize, slot: PluginSlot) -> Result<&MountedPlugin, LooperError> {
        self.channel(index)?;
        if let PluginSlot::Fx(i) = slot {
            if i >= FX_SLOTS {
                return Err(LooperError::SlotOutOfRange(i));
            }
        }
        self.plugins[index].get(slot).ok_or_else(|| {
            LooperError::InvalidPluginState(format!("no plugin at {:?} on channel {}", slot, index))
        })
    }

    fn push_handoff(&mut self, item: Handoff) -> Result<(), LooperError> {
        self.handoff
            .to_audio
            .push(item)
            .map_err(|_| LooperError::HandoffQueueFull)
    }

    // --- Snapshots ---

    /// Asks the audio thread to copy every loop. The result arrives through `poll`.
    pub fn request_snapshot(&mut self) -> Result<(), LooperError> {
        if self.capture_pending {
            return Ok(());
        }
        self.request_capture(self.telemetry.loop_length())
    }

    fn request_capture(&mut self, loop_length: usize) -> Result<(), LooperError> {
        let buffers = self
            .channels
            .iter()
            .map(|_| Vec::with_capacity(loop_length))
            .collect();
        self.push_handoff(Handoff::Capture { buffers })?;
        self.capture_pending = true;
        Ok(())
    }

    /// Drains the return queue and logs new audio-thread diagnostics. Returns
    /// a snapshot once a requested capture completes.
    pub fn poll(&mut self) -> Option<EngineSnapshot> {
        self.log_counter_deltas();
        let mut snapshot = None;
        while let Some(returned) = self.handoff.from_audio.pop() {
            match returned {
                Returned::RetiredFx(fx) => drop(fx),
                Returned::RetiredInstrument(node) => drop(node),
                Returned::RestoreSpent(loops) => drop(loops),
                Returned::Captured {
                    loop_length,
                    buffers,
                    complete,
                } => {
                    self.capture_pending = false;
                    if complete {
                        snapshot = Some(self.build_snapshot(loop_length, buffers));
                        continue;
                    }
                    // The loop was defined after the request; retry with room for it.
                    if let Err(e) = self.request_capture(loop_length) {
                        log::warn!("Snapshot retry failed: {}", e);
                    }
                }
            }
        }
        snapshot
    }

    /// Blocking convenience around `request_snapshot` and `poll`. Needs a
    /// running audio callback.
    pub fn snapshot(&mut self, timeout: Duration) -> Result<EngineSnapshot, LooperError> {
        self.request_snapshot()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.poll() {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(LooperError::SnapshotTimeout);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn build_snapshot(&self, loop_length: usize, buffers: Vec<Vec<f32>>) -> EngineSnapshot {
        let channels = self
            .channels
            .iter()
            .zip(self.plugins.iter())
            .zip(buffers)
            .map(|((shared, plugins), audio)| ChannelSnapshot {
                kind: shared.kind(),
                routing: shared.routing(),
                mixer: shared.mixer_state(),
                midi_channel: shared.midi_channel(),
                stopped: shared.is_stopped(),
                fx: std::array::from_fn(|i| plugins.fx[i].as_ref().map(MountedPlugin::snapshot)),
                instrument: plugins.instrument.as_ref().map(MountedPlugin::snapshot),
                audio,
                audio_file: None,
            })
            .collect();
        EngineSnapshot {
            sample_rate: self.sample_rate,
            loop_length,
            quantize: self.telemetry.quantize(),
            metronome: self.metronome.settings(),
            channels,
        }
    }

    /// Replaces the running song with `snapshot`. Playback restarts at loop
    /// position 0 on the block that picks up the restore. A loop longer than
    /// the loop buffers is refused before anything changes.
    pub fn apply_snapshot(&mut self, snapshot: &EngineSnapshot) -> Result<(), LooperError> {
        if snapshot.loop_length > self.loop_capacity {
            return Err(LooperError::LoopExceedsCapacity {
                length: snapshot.loop_length,
                capacity: self.loop_capacity,
            });
        }
        if (snapshot.sample_rate - self.sample_rate).abs() > 1e-3 {
            log::warn!(
                "Snapshot recorded at {} Hz applied at {} Hz without resampling",
                snapshot.sample_rate,
                self.sample_rate
            );
        }
        if snapshot.channels.len() != self.channels.len() {
            log::warn!(
                "Snapshot has {} channels, engine has {}",
                snapshot.channels.len(),
                self.channels.len()
            );
        }

        for (index, channel) in snapshot.channels.iter().enumerate().take(self.channels.len()) {
            self.channel_command(index, CommandOp::SetKind(channel.kind))?;
            let shared = &self.channels[index];
            shared.set_routing(channel.routing);
            shared.set_mixer_state(channel.mixer);
            shared.set_midi_channel(channel.midi_channel);
            shared.set_stopped(channel.stopped);

            for slot in 0..FX_SLOTS {
                match &channel.fx[slot] {
                    Some(plugin) => {
                        self.install_plugin(index, slot, &plugin.plugin_id)?;
                        self.restore_plugin(index, PluginSlot::Fx(slot), plugin)?;
                    }
                    None if self.plugins[index].fx[slot].is_some() => {
                        self.remove_plugin(index, PluginSlot::Fx(slot))?;
                    }
                    None => {}
                }
            }
            match &channel.instrument {
                Some(plugin) if channel.kind == ChannelKind::Instrument => {
                    self.set_instrument(index, &plugin.plugin_id)?;
                    self.restore_plugin(index, PluginSlot::Instrument, plugin)?;
                }
                _ => self.plugins[index].instrument = None,
            }
        }

        self.metronome.apply(&snapshot.metronome);
        self.set_quantize(snapshot.quantize)?;

        let loops = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, _)| {
                snapshot
                    .channels
                    .get(i)
                    .filter(|c| !c.audio.is_empty())
                    .map(|c| c.audio.clone())
            })
            .collect();
        self.push_handoff(Handoff::Restore {
            loop_length: snapshot.loop_length,
            loops,
        })
    }

    fn restore_plugin(
        &self,
        index: usize,
        slot: PluginSlot,
        plugin: &PluginSnapshot,
    ) -> Result<(), LooperError> {
        if !plugin.state.is_empty() {
            self.set_plugin_state(index, slot, &plugin.state)?;
        }
        self.set_bypassed(index, slot, plugin.bypassed)
    }

    fn log_counter_deltas(&mut self) {
        let now = self.telemetry.counters.snapshot();
        let last = self.last_counters;
        let report = |name: &str, current: u64, previous: u64| {
            if current > previous {
                log::warn!("{}: {} new", name, current - previous);
            }
        };
        report("Commands dropped (queue full)", now.commands_dropped, last.commands_dropped);
        report("Malformed commands", now.commands_malformed, last.commands_malformed);
        report("Plugin processing failures", now.plugin_failures, last.plugin_failures);
        report(
            "Loop length requests rejected",
            now.loop_length_rejections,
            last.loop_length_rejections,
        );
        report("Returns freed on the audio thread", now.returns_overflowed, last.returns_overflowed);
        self.last_counters = now;
    }
}
