// src/session.rs

//! Snapshots of the engine and their on-disk form.
//!
//! A song directory holds `song.json` plus one mono 32-bit float WAV per
//! channel with loop content. A show is a `show.json` listing song directories.

use crate::audio_engine::command::Quantize;
use crate::audio_engine::fx_chain::FX_SLOTS;
use crate::audio_engine::metronome::MetronomeSettings;
use crate::looper::{ChannelKind, ChannelRouting};
use crate::mixer::MixerTrackState;
use anyhow::{anyhow, Result};
use chrono::Local;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

const SONG_FILE: &str = "song.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub plugin_id: String,
    /// Opaque base64 blob from the plugin.
    pub state: String,
    pub bypassed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSnapshot {
    pub kind: ChannelKind,
    pub routing: ChannelRouting,
    pub mixer: MixerTrackState,
    pub midi_channel: Option<u8>,
    pub stopped: bool,
    pub fx: [Option<PluginSnapshot>; FX_SLOTS],
    pub instrument: Option<PluginSnapshot>,
    /// Loop audio, exactly `loop_length` samples or empty.
    #[serde(skip)]
    pub audio: Vec<f32>,
    /// WAV file inside the song directory holding `audio`.
    pub audio_file: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSnapshot {
    pub sample_rate: f32,
    pub loop_length: usize,
    pub quantize: Quantize,
    pub metronome: MetronomeSettings,
    pub channels: Vec<ChannelSnapshot>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            loop_length: 0,
            quantize: Quantize::default(),
            metronome: MetronomeSettings::default(),
            channels: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    #[serde(default)]
    pub saved_at: Option<String>,
    pub snapshot: EngineSnapshot,
}

impl Song {
    pub fn new(name: impl Into<String>, snapshot: EngineSnapshot) -> Self {
        Self {
            name: name.into(),
            saved_at: None,
            snapshot,
        }
    }
}

/// An ordered set list of song directories.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub name: String,
    pub songs: Vec<PathBuf>,
}

/// Timestamped directory name for a song saved without one.
pub fn default_song_dir_name() -> String {
    format!("Song_{}", Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

pub struct SongStore;

impl SongStore {
    pub fn save_song(dir: &Path, song: &Song) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut song = song.clone();
        song.saved_at = Some(Local::now().to_rfc3339());

        let sample_rate = song.snapshot.sample_rate;
        for (i, channel) in song.snapshot.channels.iter_mut().enumerate() {
            if channel.audio.is_empty() {
                channel.audio_file = None;
                continue;
            }
            let file_name = format!("channel_{}.wav", i);
            write_wav_file(&dir.join(&file_name), &channel.audio, sample_rate)?;
            channel.audio_file = Some(file_name);
        }

        let json = serde_json::to_string_pretty(&song)?;
        fs::write(dir.join(SONG_FILE), json)?;
        log::info!("Saved song '{}' to {}", song.name, dir.display());
        Ok(())
    }

    /// Loads a song, resampling loop audio to `target_sample_rate` if needed.
    pub fn load_song(dir: &Path, target_sample_rate: f32) -> Result<Song> {
        let json_path = dir.join(SONG_FILE);
        let json = fs::read_to_string(&json_path)
            .map_err(|e| anyhow!("Failed to read song file {}: {}", json_path.display(), e))?;
        let mut song: Song = serde_json::from_str(&json)
            .map_err(|e| anyhow!("Failed to parse song file {}: {}", json_path.display(), e))?;

        let source_sr = song.snapshot.sample_rate;
        let resampling = (source_sr - target_sample_rate).abs() > 1e-3;
        let loop_length = if resampling {
            (song.snapshot.loop_length as f64 * target_sample_rate as f64 / source_sr as f64)
                .round() as usize
        } else {
            song.snapshot.loop_length
        };

        for channel in song.snapshot.channels.iter_mut() {
            let Some(file_name) = &channel.audio_file else {
                continue;
            };
            let mut audio =
                load_and_resample_wav(&dir.join(file_name), source_sr, target_sample_rate)?;
            audio.resize(loop_length, 0.0);
            channel.audio = audio;
        }
        song.snapshot.sample_rate = target_sample_rate;
        song.snapshot.loop_length = loop_length;
        Ok(song)
    }

    pub fn save_show(path: &Path, show: &Show) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(show)?)?;
        Ok(())
    }

    /// Reads a show. Relative song paths resolve against the show file's directory.
    pub fn load_show(path: &Path) -> Result<Show> {
        let json = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read show file {}: {}", path.display(), e))?;
        let mut show: Show = serde_json::from_str(&json)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for song in show.songs.iter_mut() {
            if song.is_relative() {
                *song = base.join(&*song);
            }
        }
        Ok(show)
    }
}

fn write_wav_file(path: &Path, audio: &[f32], sample_rate: f32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in audio {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn load_and_resample_wav(path: &Path, source_sr: f32, target_sr: f32) -> Result<Vec<f32>> {
    let file = BufReader::new(File::open(path)?);
    let reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(anyhow!("Expected mono WAV file for song loop: {}", path.display()));
    }

    let mono_samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    if (source_sr - target_sr).abs() <= 1e-3 || mono_samples.is_empty() {
        return Ok(mono_samples);
    }

    log::info!(
        "Resampling song loop from {} Hz to {} Hz",
        source_sr,
        target_sr
    );
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        target_sr as f64 / source_sr as f64,
        2.0,
        params,
        mono_samples.len(),
        1,
    )?;
    let waves_in = vec![mono_samples];
    let waves_out = resampler.process(&waves_in, None)?;
    Ok(waves_out.into_iter().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_with_audio(audio: Vec<f32>) -> Song {
        let mut snapshot = EngineSnapshot {
            sample_rate: 48_000.0,
            loop_length: audio.len(),
            ..Default::default()
        };
        snapshot.channels.push(ChannelSnapshot {
            routing: ChannelRouting::from_indices(&[0], &[0, 1]),
            audio,
            ..Default::default()
        });
        snapshot.channels.push(ChannelSnapshot::default());
        Song::new("test", snapshot)
    }

    #[test]
    fn test_song_round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let audio: Vec<f32> = (0..1000).map(|i| ((i as f32) * 0.013).sin() * 0.7).collect();
        let song = song_with_audio(audio.clone());
        SongStore::save_song(dir.path(), &song).unwrap();

        let loaded = SongStore::load_song(dir.path(), 48_000.0).unwrap();
        assert_eq!(loaded.name, "test");
        assert!(loaded.saved_at.is_some());
        let loaded_audio = &loaded.snapshot.channels[0].audio;
        assert_eq!(loaded_audio.len(), audio.len());
        assert!(loaded_audio
            .iter()
            .zip(&audio)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
        assert!(loaded.snapshot.channels[1].audio.is_empty());
        assert_eq!(loaded.snapshot.channels[0].routing, song.snapshot.channels[0].routing);
    }

    #[test]
    fn test_load_resamples_to_engine_rate() {
        let dir = tempfile::tempdir().unwrap();
        let song = song_with_audio(vec![0.25; 4800]);
        SongStore::save_song(dir.path(), &song).unwrap();

        let loaded = SongStore::load_song(dir.path(), 44_100.0).unwrap();
        assert_eq!(loaded.snapshot.loop_length, 4410);
        assert_eq!(loaded.snapshot.channels[0].audio.len(), 4410);
        assert_eq!(loaded.snapshot.sample_rate, 44_100.0);
    }

    #[test]
    fn test_show_resolves_relative_songs() {
        let dir = tempfile::tempdir().unwrap();
        let show = Show {
            name: "gig".to_string(),
            songs: vec![PathBuf::from("one"), PathBuf::from("two")],
        };
        let path = dir.path().join("show.json");
        SongStore::save_show(&path, &show).unwrap();
        let loaded = SongStore::load_show(&path).unwrap();
        assert_eq!(loaded.songs, vec![dir.path().join("one"), dir.path().join("two")]);
    }

    #[test]
    fn test_missing_song_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SongStore::load_song(&dir.path().join("nope"), 48_000.0).is_err());
    }
}
