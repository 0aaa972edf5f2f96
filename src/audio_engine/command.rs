// FILE: src/audio_engine/command.rs
// =================================

//! Control → audio commands.
//!
//! A [`Command`] is plain `Copy` data: a target, an opcode and an inline
//! payload. Each control caller owns its own bounded SPSC queue; the audio
//! thread drains every queue once per block.

use crate::error::LooperError;
use crate::looper::ChannelKind;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How start/stop intents are snapped to the loop grid.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantize {
    /// Transitions happen at the start of the next block.
    Off,
    Beat,
    #[default]
    Bar,
    /// Transitions wait for the loop to wrap.
    Loop,
}

impl From<u8> for Quantize {
    fn from(val: u8) -> Self {
        match val {
            0 => Quantize::Off,
            1 => Quantize::Beat,
            3 => Quantize::Loop,
            _ => Quantize::Bar,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Transport,
    Channel(u16),
    Metronome,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandOp {
    // --- Transport ---
    Play,
    Stop,
    /// Clears every channel and the global loop (new song).
    ResetSong,
    SetQuantize(Quantize),

    // --- Channel ---
    Arm,
    Disarm,
    Record,
    Overdub,
    StopOverdub,
    /// Single-button cycle: record, close, overdub, play.
    Press,
    Clear,
    SetStopped(bool),
    SetGain(f32),
    SetMuted(bool),
    ToggleMuted,
    SetSoloed(bool),
    ToggleSoloed,
    SetRouting { inputs: u64, outputs: u64 },
    SetMidiChannel(Option<u8>),
    SetKind(ChannelKind),
    ClearFxSlot(u8),
    ClearInstrument,

    // --- Metronome ---
    SetMetronomeEnabled(bool),
    ToggleMetronome,
    SetBpm(f32),
    SetClickOutputs { left: u16, right: u16 },
    SetClickFrequency(f32),
    SetClickDurationMs(f32),
    SetClickAmplitude(f32),
}

impl CommandOp {
    fn target_class(&self) -> TargetClass {
        use CommandOp::*;
        match self {
            Play | Stop | ResetSong | SetQuantize(_) => TargetClass::Transport,
            Arm | Disarm | Record | Overdub | StopOverdub | Press | Clear | SetStopped(_)
            | SetGain(_) | SetMuted(_) | ToggleMuted | SetSoloed(_) | ToggleSoloed
            | SetRouting { .. } | SetMidiChannel(_) | SetKind(_) | ClearFxSlot(_)
            | ClearInstrument => TargetClass::Channel,
            SetMetronomeEnabled(_) | ToggleMetronome | SetBpm(_) | SetClickOutputs { .. }
            | SetClickFrequency(_) | SetClickDurationMs(_) | SetClickAmplitude(_) => {
                TargetClass::Metronome
            }
        }
    }

    fn payload_is_valid(&self) -> bool {
        match *self {
            CommandOp::SetGain(g) => g.is_finite() && g >= 0.0,
            CommandOp::SetBpm(bpm) => bpm.is_finite() && bpm > 0.0,
            CommandOp::SetClickFrequency(hz) => hz.is_finite() && hz > 0.0,
            CommandOp::SetClickDurationMs(ms) => ms.is_finite() && ms >= 0.0,
            CommandOp::SetClickAmplitude(a) => a.is_finite() && a >= 0.0,
            CommandOp::SetMidiChannel(Some(ch)) => ch < 16,
            _ => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TargetClass {
    Transport,
    Channel,
    Metronome,
}

/// One control-thread request, consumed exactly once by the audio thread.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub target: CommandTarget,
    pub op: CommandOp,
}

// Commands travel by value through the ring buffer.
const _: () = assert!(std::mem::size_of::<Command>() <= 32);

impl Command {
    pub fn transport(op: CommandOp) -> Self {
        Self {
            target: CommandTarget::Transport,
            op,
        }
    }

    pub fn channel(index: usize, op: CommandOp) -> Self {
        Self {
            target: CommandTarget::Channel(index.min(u16::MAX as usize) as u16),
            op,
        }
    }

    pub fn metronome(op: CommandOp) -> Self {
        Self {
            target: CommandTarget::Metronome,
            op,
        }
    }

    /// Target and opcode agree and the payload is in range. Channel indices are
    /// checked by the engine, which knows how many channels exist.
    pub fn is_well_formed(&self) -> bool {
        let class_matches = matches!(
            (self.target, self.op.target_class()),
            (CommandTarget::Transport, TargetClass::Transport)
                | (CommandTarget::Channel(_), TargetClass::Channel)
                | (CommandTarget::Metronome, TargetClass::Metronome)
        );
        class_matches && self.op.payload_is_valid()
    }
}

/// Producer half of a command queue. One per control caller.
pub struct CommandSender {
    producer: HeapProducer<Command>,
    dropped: Arc<AtomicU64>,
}

impl CommandSender {
    /// Best-effort enqueue. A full queue drops the command; callers resend
    /// idempotent state on their next tick.
    pub fn send(&mut self, command: Command) -> Result<(), LooperError> {
        if self.producer.push(command).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(LooperError::CommandQueueFull);
        }
        Ok(())
    }
}

/// Consumer half, owned by the audio engine.
pub struct CommandReceiver {
    consumer: HeapConsumer<Command>,
}

impl CommandReceiver {
    #[inline]
    pub fn pop(&mut self) -> Option<Command> {
        self.consumer.pop()
    }
}

/// Creates a bounded queue. `dropped` counts failed enqueues.
pub fn command_queue(capacity: usize, dropped: Arc<AtomicU64>) -> (CommandSender, CommandReceiver) {
    let (producer, consumer) = HeapRb::<Command>::new(capacity.max(1)).split();
    (
        CommandSender { producer, dropped },
        CommandReceiver { consumer },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_preserves_order() {
        let (mut tx, mut rx) = command_queue(8, Arc::new(AtomicU64::new(0)));
        tx.send(Command::channel(0, CommandOp::SetGain(0.5))).unwrap();
        tx.send(Command::channel(0, CommandOp::SetGain(0.8))).unwrap();
        assert_eq!(rx.pop().unwrap().op, CommandOp::SetGain(0.5));
        assert_eq!(rx.pop().unwrap().op, CommandOp::SetGain(0.8));
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let dropped = Arc::new(AtomicU64::new(0));
        let (mut tx, mut rx) = command_queue(2, dropped.clone());
        tx.send(Command::transport(CommandOp::Play)).unwrap();
        tx.send(Command::transport(CommandOp::Stop)).unwrap();
        assert_eq!(
            tx.send(Command::transport(CommandOp::ResetSong)),
            Err(LooperError::CommandQueueFull)
        );
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.pop().unwrap().op, CommandOp::Play);
        assert_eq!(rx.pop().unwrap().op, CommandOp::Stop);
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_target_opcode_mismatch_is_malformed() {
        assert!(Command::channel(1, CommandOp::Record).is_well_formed());
        assert!(!Command::metronome(CommandOp::Record).is_well_formed());
        assert!(!Command::channel(0, CommandOp::SetBpm(120.0)).is_well_formed());
        assert!(!Command::channel(0, CommandOp::SetGain(f32::NAN)).is_well_formed());
        assert!(!Command::metronome(CommandOp::SetBpm(0.0)).is_well_formed());
    }
}
