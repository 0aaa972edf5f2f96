use anyhow::Result;
use clap::Parser;
use looprig::audio_device::{describe_devices, find_host};
use looprig::audio_engine::AudioEngine;
use looprig::audio_io::{open_devices, start_streams};
use looprig::console::{parse_line, ConsoleAction, HELP};
use looprig::control::LooperControl;
use looprig::midi::{connect_midi, get_midi_ports};
use looprig::param::AtomicF32;
use looprig::plugins::NativePluginHost;
use looprig::session::{default_song_dir_name, EngineSnapshot, Show, Song, SongStore};
use looprig::settings::{self, AppSettings};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

const MIDI_COMMAND_QUEUE_CAPACITY: usize = 256;
const MIDI_EVENT_QUEUE_CAPACITY: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "looprig", about = "Live multi-channel audio looper")]
struct Cli {
    /// Settings file (defaults to AppSettings/settings.json next to the binary)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List audio hosts and devices, then exit
    #[arg(long)]
    list_devices: bool,

    /// Song directory to load at startup
    #[arg(long)]
    song: Option<PathBuf>,

    /// Show file to load at startup; its first song is loaded
    #[arg(long)]
    show: Option<PathBuf>,

    /// Audio host (e.g. ALSA, JACK)
    #[arg(long)]
    host: Option<String>,
}

/// Console-side state around the engine.
struct Session {
    control: LooperControl,
    songs_dir: Option<PathBuf>,
    show: Option<Show>,
    show_position: usize,
    /// Destination of a save waiting for its snapshot.
    pending_save: Option<PathBuf>,
}

impl Session {
    fn load_song(&mut self, dir: &Path) -> Result<()> {
        let song = SongStore::load_song(dir, self.control.sample_rate())?;
        self.control.apply_snapshot(&song.snapshot)?;
        log::info!("Loaded song '{}' from {}", song.name, dir.display());
        Ok(())
    }

    fn load_show(&mut self, path: &Path) -> Result<()> {
        let show = SongStore::load_show(path)?;
        log::info!("Show '{}' with {} songs", show.name, show.songs.len());
        if let Some(first) = show.songs.first().cloned() {
            self.load_song(&first)?;
        }
        self.show = Some(show);
        self.show_position = 0;
        Ok(())
    }

    fn next_song(&mut self) -> Result<()> {
        let Some(show) = &self.show else {
            return Err(anyhow::anyhow!("no show loaded"));
        };
        if show.songs.is_empty() {
            return Ok(());
        }
        let position = (self.show_position + 1) % show.songs.len();
        let dir = show.songs[position].clone();
        self.load_song(&dir)?;
        self.show_position = position;
        Ok(())
    }

    fn save_snapshot(&mut self, snapshot: EngineSnapshot) {
        let Some(dir) = self.pending_save.take() else {
            return;
        };
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(default_song_dir_name);
        if let Err(e) = SongStore::save_song(&dir, &Song::new(name, snapshot)) {
            log::error!("Failed to save song to {}: {}", dir.display(), e);
        }
    }

    fn print_status(&self) {
        let t = self.control.telemetry();
        println!(
            "transport: {} | playhead {} / {} | quantize {:?} | bpm {:.2} | cpu {:.0}%",
            if t.is_rolling() { "rolling" } else { "stopped" },
            t.playhead(),
            t.loop_length(),
            t.quantize(),
            self.control.metronome_settings().bpm,
            t.cpu_load() * 100.0
        );
        for (i, s) in self.control.status().iter().enumerate() {
            println!(
                "  [{}] {:?} {:?}{}{}{}{} gain {:.2} peak {:.2}",
                i,
                s.kind,
                s.state,
                if s.pending { " (pending)" } else { "" },
                if s.stopped { " held" } else { "" },
                if s.muted { " muted" } else { "" },
                if s.soloed { " solo" } else { "" },
                s.gain,
                s.peak
            );
        }
    }

    /// Returns false when the console asks to quit.
    fn handle_line(&mut self, line: &str) -> bool {
        let action = match parse_line(line) {
            Ok(Some(action)) => action,
            Ok(None) => return true,
            Err(e) => {
                println!("{}", e);
                return true;
            }
        };
        match action.apply(&mut self.control) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                println!("{}", e);
                return true;
            }
        }
        let result = match action {
            ConsoleAction::Save(dir) => {
                let dir = match &self.songs_dir {
                    Some(base) if dir.is_relative() => base.join(dir),
                    _ => dir,
                };
                self.pending_save = Some(dir);
                self.control.request_snapshot().map_err(anyhow::Error::from)
            }
            ConsoleAction::Load(dir) => self.load_song(&dir),
            ConsoleAction::LoadShow(path) => self.load_show(&path),
            ConsoleAction::NextSong => self.next_song(),
            ConsoleAction::Status => {
                self.print_status();
                Ok(())
            }
            ConsoleAction::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ConsoleAction::Quit => return false,
            _ => Ok(()),
        };
        if let Err(e) = result {
            println!("{}", e);
        }
        true
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if cli.list_devices {
        print!("{}", describe_devices()?);
        return Ok(());
    }

    let settings_path = cli.config.clone().or_else(settings::default_settings_path);
    let app_settings = match &settings_path {
        Some(path) => {
            let loaded = settings::load_settings(path);
            if !path.exists() {
                if let Err(e) = settings::save_settings(path, &loaded) {
                    log::warn!("{}", e);
                }
            }
            loaded
        }
        None => AppSettings::default(),
    };

    let host_id = find_host(cli.host.as_deref().or(app_settings.host_name.as_deref()))?;
    let devices = open_devices(
        host_id,
        app_settings.input_device.as_deref(),
        app_settings.output_device.as_deref(),
        app_settings.sample_rate,
        app_settings.buffer_size,
    )?;

    let config = app_settings.engine_config(
        devices.sample_rate as f32,
        devices.block_size as usize,
        devices.input_channels,
        devices.output_channels,
    );
    let (mut engine, handles) = AudioEngine::new(&config);
    log::info!(
        "Engine ready: {} channels, {} s loop capacity",
        engine.channel_count(),
        app_settings.max_loop_seconds
    );

    let _midi_connection = match &app_settings.midi_port_name {
        Some(port_name) => {
            let port = get_midi_ports()?
                .into_iter()
                .find(|(name, _)| name == port_name)
                .map(|(_, port)| port);
            match port {
                Some(port) => Some(connect_midi(
                    &port,
                    &app_settings.midi_bindings,
                    engine.open_command_queue(MIDI_COMMAND_QUEUE_CAPACITY),
                    engine.open_midi_input(MIDI_EVENT_QUEUE_CAPACITY),
                )?),
                None => {
                    log::warn!("MIDI port '{}' not found", port_name);
                    None
                }
            }
        }
        None => None,
    };

    let mut control = LooperControl::new(handles, Box::new(NativePluginHost));
    for (i, channel) in app_settings.channels.iter().enumerate() {
        for (slot, plugin_id) in channel.fx.iter().enumerate() {
            if let Some(plugin_id) = plugin_id {
                control.install_plugin(i, slot, plugin_id)?;
            }
        }
        if let Some(plugin_id) = &channel.instrument {
            control.set_instrument(i, plugin_id)?;
        }
    }

    let latency_ms = Arc::new(AtomicF32::new(app_settings.input_latency_compensation_ms));
    let xrun_count = Arc::new(AtomicUsize::new(0));
    let _streams = start_streams(devices, engine, latency_ms, xrun_count.clone())?;

    let mut session = Session {
        control,
        songs_dir: settings::get_config_dir().map(|dir| dir.join("Songs")),
        show: None,
        show_position: 0,
        pending_save: None,
    };
    if let Some(show) = &cli.show {
        session.load_show(show)?;
    } else if let Some(song) = &cli.song {
        session.load_song(song)?;
    }

    let (line_tx, line_rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("{}", HELP);
    let mut last_xruns = 0;
    loop {
        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if !session.handle_line(&line) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Some(snapshot) = session.control.poll() {
            session.save_snapshot(snapshot);
        }
        let xruns = xrun_count.load(Ordering::Relaxed);
        if xruns > last_xruns {
            log::warn!("{} new audio stream errors", xruns - last_xruns);
            last_xruns = xruns;
        }
    }

    log::info!("Shutting down");
    Ok(())
}
