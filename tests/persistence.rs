//! Snapshots taken from a running engine, restored into a fresh one and
//! written to disk.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{audio_channel, config, Harness, BLOCK};
use looprig::audio_engine::command::Quantize;
use looprig::control::PluginSlot;
use looprig::looper::{ChannelRouting, ChannelState};
use looprig::plugins::gain::{self, GainState};
use looprig::session::{ChannelSnapshot, EngineSnapshot, Song, SongStore};
use looprig::LooperError;

fn gain_blob(gain_db: f32) -> String {
    STANDARD.encode(serde_json::to_vec(&GainState { gain_db }).unwrap())
}

fn take_snapshot(h: &mut Harness) -> EngineSnapshot {
    h.control.request_snapshot().unwrap();
    h.silence();
    h.control.poll().expect("capture completes within one block")
}

/// Two channels, one with a recorded ramp, a gain insert and custom routing.
fn recorded_session() -> Harness {
    let mut h = Harness::new(config(
        vec![audio_channel(0, 0), audio_channel(1, 1)],
        Quantize::Off,
    ));
    h.control.install_plugin(0, 1, gain::PLUGIN_ID).unwrap();
    h.control
        .set_plugin_state(0, PluginSlot::Fx(1), &gain_blob(-6.0))
        .unwrap();
    h.control.set_gain(0, 0.7).unwrap();
    h.control
        .set_routing(1, ChannelRouting::from_indices(&[1], &[0, 1]))
        .unwrap();
    h.control.set_soloed(1, true).unwrap();

    h.control.press(0).unwrap();
    for _ in 0..3 {
        h.run_with(BLOCK, |c, i| if c == 0 { (i as f32 * 0.01).sin() * 0.8 } else { 0.0 });
    }
    h.control.press(0).unwrap();
    h.silence();
    h
}

#[test]
fn test_snapshot_captures_loop_and_settings() {
    let mut h = recorded_session();
    let snapshot = take_snapshot(&mut h);

    assert_eq!(snapshot.loop_length, 3 * BLOCK);
    let ch0 = &snapshot.channels[0];
    assert_eq!(ch0.audio.len(), 3 * BLOCK);
    assert!(ch0.audio.iter().any(|&s| s != 0.0));
    assert_eq!(ch0.mixer.volume, 0.7);
    let fx = ch0.fx[1].as_ref().unwrap();
    assert_eq!(fx.plugin_id, gain::PLUGIN_ID);
    assert_eq!(fx.state, gain_blob(-6.0));
    assert!(ch0.fx[0].is_none());

    let ch1 = &snapshot.channels[1];
    assert!(ch1.audio.is_empty());
    assert!(ch1.mixer.is_soloed);
    assert_eq!(ch1.routing, ChannelRouting::from_indices(&[1], &[0, 1]));
}

#[test]
fn test_snapshot_round_trip_is_exact() {
    let mut source = recorded_session();
    let original = take_snapshot(&mut source);

    let mut target = Harness::new(config(
        vec![audio_channel(0, 0), audio_channel(0, 0)],
        Quantize::Bar,
    ));
    target.control.apply_snapshot(&original).unwrap();
    target.silence();
    assert_eq!(target.control.status()[0].state, ChannelState::Playing);
    assert_eq!(target.control.status()[1].state, ChannelState::Idle);
    // Playback restarts from position 0.
    assert_eq!(target.control.telemetry().playhead(), BLOCK as u64);

    let restored = take_snapshot(&mut target);
    assert_eq!(restored, original);
    assert!(restored.channels[0]
        .audio
        .iter()
        .zip(&original.channels[0].audio)
        .all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn test_song_survives_disk_and_restores() {
    let mut source = recorded_session();
    let original = take_snapshot(&mut source);

    let dir = tempfile::tempdir().unwrap();
    let song_dir = dir.path().join("first");
    SongStore::save_song(&song_dir, &Song::new("first", original.clone())).unwrap();
    assert!(song_dir.join("song.json").exists());
    assert!(song_dir.join("channel_0.wav").exists());
    assert!(!song_dir.join("channel_1.wav").exists());

    let loaded = SongStore::load_song(&song_dir, 48_000.0).unwrap();
    assert_eq!(loaded.name, "first");

    let mut target = Harness::new(config(
        vec![audio_channel(0, 0), audio_channel(0, 0)],
        Quantize::Off,
    ));
    target.control.apply_snapshot(&loaded.snapshot).unwrap();
    target.silence();
    let restored = take_snapshot(&mut target);
    assert_eq!(restored.channels[0].audio, original.channels[0].audio);
    assert_eq!(restored.channels[0].fx, original.channels[0].fx);
}

#[test]
fn test_apply_snapshot_removes_stale_plugins() {
    let mut h = recorded_session();
    let mut snapshot = take_snapshot(&mut h);
    snapshot.channels[0].fx[1] = None;
    h.control.apply_snapshot(&snapshot).unwrap();
    h.silence();
    assert_eq!(h.control.plugin_id(0, PluginSlot::Fx(1)).unwrap(), None);
    let again = take_snapshot(&mut h);
    assert!(again.channels[0].fx.iter().all(Option::is_none));
}

#[test]
fn test_loop_longer_than_buffers_is_refused() {
    let mut h = recorded_session();
    let capacity = h.control.loop_capacity();
    let oversized = EngineSnapshot {
        loop_length: 2 * capacity,
        channels: vec![
            ChannelSnapshot {
                audio: vec![0.1; 2 * capacity],
                ..Default::default()
            },
            ChannelSnapshot::default(),
        ],
        ..Default::default()
    };
    assert_eq!(
        h.control.apply_snapshot(&oversized),
        Err(LooperError::LoopExceedsCapacity {
            length: 2 * capacity,
            capacity,
        })
    );

    // The running song is untouched and keeps playing.
    for _ in 0..4 {
        h.silence();
    }
    assert_eq!(h.control.telemetry().loop_length(), 3 * BLOCK);
    assert_eq!(h.control.status()[0].state, ChannelState::Playing);
}
