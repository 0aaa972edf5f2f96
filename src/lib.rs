//! looprig: the real-time core of a live multi-channel audio looper.
//!
//! The audio thread owns an [`audio_engine::AudioEngine`] and calls
//! `process_block` once per hardware callback. Everything else talks to it
//! through a [`control::LooperControl`].

pub mod audio_device;
pub mod audio_engine;
pub mod audio_io;
pub mod console;
pub mod control;
pub mod error;
pub mod looper;
pub mod midi;
pub mod mixer;
pub mod param;
pub mod plugins;
pub mod session;
pub mod settings;

pub use error::LooperError;
