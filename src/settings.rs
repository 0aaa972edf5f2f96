use crate::audio_engine::command::Quantize;
use crate::audio_engine::fx_chain::FX_SLOTS;
use crate::audio_engine::metronome::MetronomeSettings;
use crate::audio_engine::{ChannelSetup, EngineConfig};
use crate::looper::{ChannelKind, ChannelRouting};
use crate::midi::MidiBinding;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub midi_channel: Option<u8>,
    /// Plugin ids loaded into the FX slots at startup.
    pub fx: [Option<String>; FX_SLOTS],
    pub instrument: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::Audio,
            inputs: vec![0],
            outputs: vec![0, 1],
            midi_channel: None,
            fx: Default::default(),
            instrument: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub host_name: Option<String>,
    pub midi_port_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
    pub input_latency_compensation_ms: f32,
    pub bpm_rounding: bool,
    pub tempo_from_first_loop: bool,
    pub beats_per_loop: u32,
    pub beats_per_bar: u32,
    pub quantize: Quantize,
    pub max_loop_seconds: f32,
    pub command_queue_capacity: usize,
    pub channels: Vec<ChannelConfig>,
    pub metronome: MetronomeSettings,
    pub midi_bindings: Vec<MidiBinding>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            midi_port_name: None,
            input_device: None,
            output_device: None,
            sample_rate: None,
            buffer_size: None,
            input_latency_compensation_ms: 5.0, // Default to 5ms safety buffer
            bpm_rounding: false,
            tempo_from_first_loop: false,
            beats_per_loop: 4,
            beats_per_bar: 4,
            quantize: Quantize::Bar,
            max_loop_seconds: 60.0,
            command_queue_capacity: 1024,
            channels: vec![ChannelConfig::default(); 4],
            metronome: MetronomeSettings::default(),
            midi_bindings: Vec::new(),
        }
    }
}

impl AppSettings {
    /// Engine configuration for an opened device.
    pub fn engine_config(
        &self,
        sample_rate: f32,
        max_block_size: usize,
        input_channels: usize,
        output_channels: usize,
    ) -> EngineConfig {
        EngineConfig {
            sample_rate,
            max_block_size,
            input_channels,
            output_channels,
            max_loop_seconds: self.max_loop_seconds,
            beats_per_bar: self.beats_per_bar,
            beats_per_loop: self.beats_per_loop,
            quantize: self.quantize,
            tempo_from_first_loop: self.tempo_from_first_loop || self.bpm_rounding,
            bpm_rounding: self.bpm_rounding,
            command_queue_capacity: self.command_queue_capacity,
            metronome: self.metronome,
            channels: self
                .channels
                .iter()
                .map(|c| ChannelSetup {
                    kind: c.kind,
                    routing: ChannelRouting::from_indices(&c.inputs, &c.outputs),
                    midi_channel: c.midi_channel,
                })
                .collect(),
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let app_settings_dir = exe_dir.join("AppSettings");

            for dir in [&app_settings_dir, &app_settings_dir.join("Songs")] {
                if !dir.exists() {
                    if let Err(e) = fs::create_dir_all(dir) {
                        log::error!("Failed to create directory at {}: {}", dir.display(), e);
                        return None;
                    }
                }
            }
            return Some(app_settings_dir);
        }
    }
    log::error!("Could not determine application directory.");
    None
}

/// `settings.json` in the application settings directory.
pub fn default_settings_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(SETTINGS_FILE))
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    let json_string = serde_json::to_string_pretty(settings)?;
    fs::write(path, json_string)
        .map_err(|e| anyhow!("Failed to write settings to {}: {}", path.display(), e))
}

/// Reads settings from `path`. A missing or unreadable file falls back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    if !path.exists() {
        log::info!("No settings at {}, using defaults.", path.display());
        return AppSettings::default();
    }
    match fs::read_to_string(path) {
        Ok(json_string) => match serde_json::from_str(&json_string) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to parse settings file, using defaults. Error: {}", e);
                AppSettings::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to read settings file, using defaults. Error: {}", e);
            AppSettings::default()
        }
    }
}
