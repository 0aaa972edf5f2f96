use crate::audio_engine::command::{Command, CommandOp, CommandSender};
use anyhow::Result;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use ringbuf::HeapProducer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const APP_NAME: &str = "looprig";

const DEBOUNCE_DURATION: Duration = Duration::from_millis(50);
const CC_BUTTON_THRESHOLD: u8 = 64;
const CC_GAIN_RANGE: f32 = 1.5;

/// A short MIDI message stamped with its sample offset inside the current block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MidiEvent {
    pub offset: u32,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEvent {
    pub fn new(offset: u32, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            offset,
            status,
            data1,
            data2,
        }
    }

    /// Parses a channel voice message. System messages are ignored.
    pub fn from_bytes(offset: u32, message: &[u8]) -> Option<Self> {
        let status = *message.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }
        Some(Self {
            offset,
            status,
            data1: message.get(1).copied().unwrap_or(0),
            data2: message.get(2).copied().unwrap_or(0),
        })
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    #[inline]
    pub fn kind(&self) -> u8 {
        self.status & 0xF0
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.kind() == 0x90 && self.data2 > 0
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.kind() == 0x80 || (self.kind() == 0x90 && self.data2 == 0)
    }
}

/// An event as it sits in the queue: arrival time in microseconds since the
/// engine's MIDI epoch. The offset is filled in on the audio thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StampedMidi {
    pub micros: u64,
    pub event: MidiEvent,
}

/// Producer half of a MIDI input queue. Stamps each event on arrival against
/// the clock the engine uses to place it inside a block.
pub struct MidiEventSender {
    producer: HeapProducer<StampedMidi>,
    epoch: Instant,
}

impl MidiEventSender {
    pub fn new(producer: HeapProducer<StampedMidi>, epoch: Instant) -> Self {
        Self { producer, epoch }
    }

    /// Returns false if the queue is full.
    pub fn send(&mut self, event: MidiEvent) -> bool {
        self.send_at(event, Instant::now())
    }

    pub fn send_at(&mut self, event: MidiEvent, arrived: Instant) -> bool {
        let micros = micros_since(self.epoch, arrived);
        self.producer.push(StampedMidi { micros, event }).is_ok()
    }
}

pub(crate) fn micros_since(epoch: Instant, t: Instant) -> u64 {
    t.saturating_duration_since(epoch).as_micros() as u64
}

/// Maps an arrival time inside the previous callback interval
/// `[window_start, window_end)` onto a sample offset in a block of `frames`.
/// Events land one block late but keep their spacing.
pub fn block_offset(stamp_us: u64, window_start_us: u64, window_end_us: u64, frames: usize) -> u32 {
    if frames == 0 || stamp_us <= window_start_us || window_end_us <= window_start_us {
        return 0;
    }
    let span = (window_end_us - window_start_us) as f64;
    let pos = (stamp_us - window_start_us) as f64 / span * frames as f64;
    (pos as usize).min(frames - 1) as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MidiTrigger {
    Note { channel: u8, note: u8 },
    ControlChange { channel: u8, cc: u8 },
}

/// What a bound control does. Channel actions carry the channel index.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum MidiAction {
    Press(usize),
    Record(usize),
    Overdub(usize),
    StopOverdub(usize),
    Clear(usize),
    ToggleMute(usize),
    ToggleSolo(usize),
    /// Continuous: CC value maps to 0.0..=1.5.
    Gain(usize),
    Play,
    Stop,
    ToggleMetronome,
    ResetSong,
}

impl MidiAction {
    pub fn is_continuous(&self) -> bool {
        matches!(self, MidiAction::Gain(_))
    }

    fn to_command(self, value: u8) -> Command {
        match self {
            MidiAction::Press(ch) => Command::channel(ch, CommandOp::Press),
            MidiAction::Record(ch) => Command::channel(ch, CommandOp::Record),
            MidiAction::Overdub(ch) => Command::channel(ch, CommandOp::Overdub),
            MidiAction::StopOverdub(ch) => Command::channel(ch, CommandOp::StopOverdub),
            MidiAction::Clear(ch) => Command::channel(ch, CommandOp::Clear),
            MidiAction::ToggleMute(ch) => Command::channel(ch, CommandOp::ToggleMuted),
            MidiAction::ToggleSolo(ch) => Command::channel(ch, CommandOp::ToggleSoloed),
            MidiAction::Gain(ch) => Command::channel(
                ch,
                CommandOp::SetGain(value as f32 / 127.0 * CC_GAIN_RANGE),
            ),
            MidiAction::Play => Command::transport(CommandOp::Play),
            MidiAction::Stop => Command::transport(CommandOp::Stop),
            MidiAction::ToggleMetronome => Command::metronome(CommandOp::ToggleMetronome),
            MidiAction::ResetSong => Command::transport(CommandOp::ResetSong),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiBinding {
    pub trigger: MidiTrigger,
    pub action: MidiAction,
}

/// Turns incoming MIDI into Commands according to the configured bindings.
pub struct MidiBindingRouter {
    bindings: BTreeMap<MidiTrigger, MidiAction>,
    last_press_times: BTreeMap<MidiTrigger, Instant>,
}

impl MidiBindingRouter {
    pub fn new(bindings: &[MidiBinding]) -> Self {
        Self {
            bindings: bindings.iter().map(|b| (b.trigger, b.action)).collect(),
            last_press_times: BTreeMap::new(),
        }
    }

    pub fn translate(&mut self, event: &MidiEvent, now: Instant) -> Option<Command> {
        let (trigger, value, is_press) = match event.kind() {
            0x90 | 0x80 => (
                MidiTrigger::Note {
                    channel: event.channel(),
                    note: event.data1,
                },
                event.data2,
                event.is_note_on(),
            ),
            0xB0 => (
                MidiTrigger::ControlChange {
                    channel: event.channel(),
                    cc: event.data1,
                },
                event.data2,
                event.data2 > CC_BUTTON_THRESHOLD,
            ),
            _ => return None,
        };
        let action = *self.bindings.get(&trigger)?;

        if action.is_continuous() {
            return Some(action.to_command(value));
        }
        if !is_press {
            return None;
        }

        let last_press = self
            .last_press_times
            .entry(trigger)
            .or_insert_with(|| now.checked_sub(DEBOUNCE_DURATION * 2).unwrap_or(now));
        if now.duration_since(*last_press) <= DEBOUNCE_DURATION {
            return None;
        }
        *last_press = now;
        Some(action.to_command(value))
    }
}

pub fn get_midi_ports() -> Result<Vec<(String, MidiInputPort)>> {
    let midi_in = MidiInput::new(APP_NAME)?;
    let ports = midi_in.ports();
    let mut result = Vec::with_capacity(ports.len());
    for port in ports.iter() {
        let name = midi_in.port_name(port)?;
        result.push((name, port.clone()));
    }
    Ok(result)
}

/// Opens a MIDI input. Every voice message goes to the audio thread for
/// instrument channels; bound controls also become Commands.
///
/// midir's own timestamp has no defined origin, so events are stamped with
/// the engine's clock on arrival instead.
pub fn connect_midi(
    port: &MidiInputPort,
    bindings: &[MidiBinding],
    mut command_sender: CommandSender,
    mut events: MidiEventSender,
) -> Result<MidiInputConnection<()>> {
    let mut midi_in = MidiInput::new(APP_NAME)?;
    midi_in.ignore(Ignore::All);

    let port_name = midi_in.port_name(port)?;
    log::info!("Opening MIDI connection to: {}", port_name);

    let mut router = MidiBindingRouter::new(bindings);
    let conn = midi_in
        .connect(
            port,
            &format!("looprig-midi-in-{}", port_name),
            move |_stamp, message, _| {
                let now = Instant::now();
                let Some(event) = MidiEvent::from_bytes(0, message) else {
                    return;
                };
                if !events.send_at(event, now) {
                    log::debug!("MIDI event queue full, dropping {:?}", event);
                }
                if let Some(command) = router.translate(&event, now) {
                    if let Err(e) = command_sender.send(command) {
                        log::warn!("MIDI command {:?} dropped: {}", command.op, e);
                    }
                }
            },
            (),
        )
        .map_err(|e| anyhow::anyhow!("Failed to connect to MIDI port '{}': {}", port_name, e))?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::command::CommandTarget;

    fn router() -> MidiBindingRouter {
        MidiBindingRouter::new(&[
            MidiBinding {
                trigger: MidiTrigger::Note { channel: 0, note: 36 },
                action: MidiAction::Press(2),
            },
            MidiBinding {
                trigger: MidiTrigger::ControlChange { channel: 0, cc: 7 },
                action: MidiAction::Gain(1),
            },
        ])
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let event = MidiEvent::new(0, 0x91, 60, 0);
        assert!(event.is_note_off());
        assert!(!event.is_note_on());
        assert_eq!(event.channel(), 1);
    }

    #[test]
    fn test_system_messages_are_ignored() {
        assert!(MidiEvent::from_bytes(0, &[0xF8]).is_none());
        assert!(MidiEvent::from_bytes(0, &[]).is_none());
        assert_eq!(
            MidiEvent::from_bytes(5, &[0xC0, 3]),
            Some(MidiEvent::new(5, 0xC0, 3, 0))
        );
    }

    #[test]
    fn test_bound_note_becomes_press() {
        let mut router = router();
        let cmd = router
            .translate(&MidiEvent::new(0, 0x90, 36, 100), Instant::now())
            .unwrap();
        assert_eq!(cmd.target, CommandTarget::Channel(2));
        assert_eq!(cmd.op, CommandOp::Press);
        assert!(router
            .translate(&MidiEvent::new(0, 0x90, 37, 100), Instant::now())
            .is_none());
    }

    #[test]
    fn test_button_presses_are_debounced() {
        let mut router = router();
        let t0 = Instant::now();
        let press = MidiEvent::new(0, 0x90, 36, 100);
        assert!(router.translate(&press, t0).is_some());
        assert!(router
            .translate(&press, t0 + Duration::from_millis(10))
            .is_none());
        assert!(router
            .translate(&press, t0 + Duration::from_millis(120))
            .is_some());
    }

    #[test]
    fn test_block_offset_keeps_spacing() {
        // Previous callback covered 1000..2000 us; block is 64 frames.
        assert_eq!(block_offset(1000, 1000, 2000, 64), 0);
        assert_eq!(block_offset(1500, 1000, 2000, 64), 32);
        assert_eq!(block_offset(1750, 1000, 2000, 64), 48);
        assert_eq!(block_offset(1999, 1000, 2000, 64), 63);
        // Late arrivals and stale events are clamped into the block.
        assert_eq!(block_offset(2600, 1000, 2000, 64), 63);
        assert_eq!(block_offset(400, 1000, 2000, 64), 0);
        assert_eq!(block_offset(1500, 2000, 2000, 64), 0);
        assert_eq!(block_offset(1500, 1000, 2000, 0), 0);
    }

    #[test]
    fn test_sender_stamps_against_epoch() {
        let (producer, mut consumer) = ringbuf::HeapRb::<StampedMidi>::new(1).split();
        let epoch = Instant::now();
        let mut sender = MidiEventSender::new(producer, epoch);
        let note = MidiEvent::new(0, 0x90, 60, 100);
        assert!(sender.send_at(note, epoch + Duration::from_micros(2500)));
        assert!(!sender.send(note));
        assert_eq!(
            consumer.pop(),
            Some(StampedMidi {
                micros: 2500,
                event: note
            })
        );
    }

    #[test]
    fn test_cc_gain_scales_to_range() {
        let mut router = router();
        let cmd = router
            .translate(&MidiEvent::new(0, 0xB0, 7, 127), Instant::now())
            .unwrap();
        assert_eq!(cmd.op, CommandOp::SetGain(1.5));
    }
}
