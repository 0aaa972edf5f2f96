// src/console.rs

//! Line-oriented control surface read from stdin.

use crate::audio_engine::command::Quantize;
use crate::control::{LooperControl, PluginSlot};
use crate::error::LooperError;
use anyhow::{anyhow, Result};
use std::path::PathBuf;

pub const HELP: &str = "\
commands:
  press N | rec N | dub N | undub N | arm N | disarm N | clear N
  gain N X | mute N | solo N | hold N on|off
  fx N SLOT ID | unfx N SLOT | bypass N SLOT on|off | inst N ID
  play | stop | reset | quantize off|beat|bar|loop
  bpm X | click [on|off] | click freq HZ | click len MS | click level X | click out L R
  save DIR | load DIR | show FILE | next
  status | help | quit";

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleAction {
    Press(usize),
    Record(usize),
    Overdub(usize),
    StopOverdub(usize),
    Arm(usize),
    Disarm(usize),
    Clear(usize),
    Gain(usize, f32),
    ToggleMute(usize),
    ToggleSolo(usize),
    /// Silences a channel's loop without clearing it.
    Hold(usize, bool),
    InstallFx(usize, usize, String),
    RemoveFx(usize, usize),
    Bypass(usize, usize, bool),
    Instrument(usize, String),
    Play,
    Stop,
    ResetSong,
    Quantize(Quantize),
    Bpm(f32),
    Click(bool),
    ToggleClick,
    ClickFrequency(f32),
    ClickLength(f32),
    ClickLevel(f32),
    ClickOutputs(u16, u16),
    Save(PathBuf),
    Load(PathBuf),
    LoadShow(PathBuf),
    NextSong,
    Status,
    Help,
    Quit,
}

impl ConsoleAction {
    /// Forwards actions that map straight onto the engine. Returns `Ok(false)`
    /// for actions the caller handles itself (files, status, quit).
    pub fn apply(&self, control: &mut LooperControl) -> Result<bool, LooperError> {
        match self {
            ConsoleAction::Press(n) => control.press(*n)?,
            ConsoleAction::Record(n) => control.record(*n)?,
            ConsoleAction::Overdub(n) => control.overdub(*n)?,
            ConsoleAction::StopOverdub(n) => control.stop_overdub(*n)?,
            ConsoleAction::Arm(n) => control.arm(*n)?,
            ConsoleAction::Disarm(n) => control.disarm(*n)?,
            ConsoleAction::Clear(n) => control.clear(*n)?,
            ConsoleAction::Gain(n, gain) => control.set_gain(*n, *gain)?,
            ConsoleAction::ToggleMute(n) => control.toggle_mute(*n)?,
            ConsoleAction::ToggleSolo(n) => control.toggle_solo(*n)?,
            ConsoleAction::Hold(n, on) => control.set_stopped(*n, *on)?,
            ConsoleAction::InstallFx(n, slot, id) => control.install_plugin(*n, *slot, id)?,
            ConsoleAction::RemoveFx(n, slot) => control.remove_plugin(*n, PluginSlot::Fx(*slot))?,
            ConsoleAction::Bypass(n, slot, on) => {
                control.set_bypassed(*n, PluginSlot::Fx(*slot), *on)?
            }
            ConsoleAction::Instrument(n, id) => control.set_instrument(*n, id)?,
            ConsoleAction::Play => control.play()?,
            ConsoleAction::Stop => control.stop()?,
            ConsoleAction::ResetSong => control.reset_song()?,
            ConsoleAction::Quantize(q) => control.set_quantize(*q)?,
            ConsoleAction::Bpm(bpm) => control.set_bpm(*bpm)?,
            ConsoleAction::Click(on) => control.set_metronome_enabled(*on)?,
            ConsoleAction::ToggleClick => control.toggle_metronome()?,
            ConsoleAction::ClickFrequency(hz) => control.set_click_frequency(*hz)?,
            ConsoleAction::ClickLength(ms) => control.set_click_duration_ms(*ms)?,
            ConsoleAction::ClickLevel(a) => control.set_click_amplitude(*a)?,
            ConsoleAction::ClickOutputs(l, r) => control.set_click_outputs(*l, *r)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleAction>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let action = match verb.to_ascii_lowercase().as_str() {
        "press" | "p" => ConsoleAction::Press(index(args, 0)?),
        "rec" | "record" => ConsoleAction::Record(index(args, 0)?),
        "dub" | "overdub" => ConsoleAction::Overdub(index(args, 0)?),
        "undub" => ConsoleAction::StopOverdub(index(args, 0)?),
        "arm" => ConsoleAction::Arm(index(args, 0)?),
        "disarm" => ConsoleAction::Disarm(index(args, 0)?),
        "clear" => ConsoleAction::Clear(index(args, 0)?),
        "gain" => ConsoleAction::Gain(index(args, 0)?, number(args, 1)?),
        "mute" => ConsoleAction::ToggleMute(index(args, 0)?),
        "solo" => ConsoleAction::ToggleSolo(index(args, 0)?),
        "hold" => ConsoleAction::Hold(index(args, 0)?, switch(args, 1)?),
        "fx" => ConsoleAction::InstallFx(index(args, 0)?, index(args, 1)?, word(args, 2)?),
        "unfx" => ConsoleAction::RemoveFx(index(args, 0)?, index(args, 1)?),
        "bypass" => ConsoleAction::Bypass(index(args, 0)?, index(args, 1)?, switch(args, 2)?),
        "inst" | "instrument" => ConsoleAction::Instrument(index(args, 0)?, word(args, 1)?),
        "play" => ConsoleAction::Play,
        "stop" => ConsoleAction::Stop,
        "reset" => ConsoleAction::ResetSong,
        "quantize" | "q" => ConsoleAction::Quantize(quantize(args)?),
        "bpm" => ConsoleAction::Bpm(number(args, 0)?),
        "click" => click(args)?,
        "save" => ConsoleAction::Save(PathBuf::from(word(args, 0)?)),
        "load" => ConsoleAction::Load(PathBuf::from(word(args, 0)?)),
        "show" => ConsoleAction::LoadShow(PathBuf::from(word(args, 0)?)),
        "next" => ConsoleAction::NextSong,
        "status" | "s" => ConsoleAction::Status,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(anyhow!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(action))
}

fn word(args: &[&str], i: usize) -> Result<String> {
    args.get(i)
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("missing argument {}", i + 1))
}

fn index(args: &[&str], i: usize) -> Result<usize> {
    let s = word(args, i)?;
    s.parse().map_err(|_| anyhow!("'{}' is not an index", s))
}

fn number(args: &[&str], i: usize) -> Result<f32> {
    let s = word(args, i)?;
    match s.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(anyhow!("'{}' is not a number", s)),
    }
}

fn switch(args: &[&str], i: usize) -> Result<bool> {
    match word(args, i)?.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(anyhow!("expected on/off, got '{}'", other)),
    }
}

fn output(args: &[&str], i: usize) -> Result<u16> {
    let s = word(args, i)?;
    s.parse().map_err(|_| anyhow!("'{}' is not an output index", s))
}

fn click(args: &[&str]) -> Result<ConsoleAction> {
    let Some(&setting) = args.first() else {
        return Ok(ConsoleAction::ToggleClick);
    };
    Ok(match setting.to_ascii_lowercase().as_str() {
        "freq" => ConsoleAction::ClickFrequency(number(args, 1)?),
        "len" => ConsoleAction::ClickLength(number(args, 1)?),
        "level" => ConsoleAction::ClickLevel(number(args, 1)?),
        "out" => ConsoleAction::ClickOutputs(output(args, 1)?, output(args, 2)?),
        _ => ConsoleAction::Click(switch(args, 0)?),
    })
}

fn quantize(args: &[&str]) -> Result<Quantize> {
    match word(args, 0)?.to_ascii_lowercase().as_str() {
        "off" => Ok(Quantize::Off),
        "beat" => Ok(Quantize::Beat),
        "bar" => Ok(Quantize::Bar),
        "loop" => Ok(Quantize::Loop),
        other => Err(anyhow!("unknown quantize mode '{}'", other)),
    }
}
