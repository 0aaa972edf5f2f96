// src/plugins/mod.rs

//! The plugin boundary.
//!
//! A plugin host wrapper hands the core a [`PluginInstance`]: the audio-thread
//! [`PluginNode`], a control-thread [`PluginState`] handle for base64 state
//! blobs, and a shared bypass flag. The core never scans or discovers plugins;
//! [`NativePluginHost`] only knows the built-in nodes in this directory.

pub mod gain;
pub mod sine_synth;

pub use gain::GainNode;
pub use sine_synth::SineSynth;

use crate::error::LooperError;
use crate::midi::MidiEvent;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PluginError {
    /// Raised from `process`; must not allocate.
    #[error("processing failed: {0}")]
    Processing(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<PluginError> for LooperError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Processing(reason) => LooperError::PluginProcessingFailure { reason },
            PluginError::InvalidState(msg) => LooperError::InvalidPluginState(msg),
        }
    }
}

/// The audio-thread half of a plugin. Lives inside a channel's FX chain or
/// instrument slot and is only ever called from the audio callback.
pub trait PluginNode: Send {
    /// Called before the node is installed and whenever the sample rate changes.
    fn prepare(&mut self, sample_rate: f32, max_block_size: usize);

    /// Processes one mono block in place. Instruments add their output to `audio`.
    fn process(&mut self, audio: &mut [f32], midi: &[MidiEvent]) -> Result<(), PluginError>;

    /// Drops any running voices or tails.
    fn reset(&mut self) {}
}

/// The control-thread half of a plugin: opaque base64 state blobs.
pub trait PluginState: Send + Sync {
    fn get_state_base64(&self) -> String;
    fn set_state_base64(&self, state: &str) -> Result<(), PluginError>;
}

/// Everything a host wrapper produces for one plugin.
pub struct PluginInstance {
    pub plugin_id: String,
    pub node: Box<dyn PluginNode>,
    pub state: Arc<dyn PluginState>,
    pub bypassed: Arc<AtomicBool>,
}

/// Instantiates plugins by identifier.
pub trait PluginHost {
    fn instantiate(
        &self,
        plugin_id: &str,
        sample_rate: f32,
        max_block_size: usize,
    ) -> Result<PluginInstance, LooperError>;
}

/// Host for the nodes compiled into this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePluginHost;

impl PluginHost for NativePluginHost {
    fn instantiate(
        &self,
        plugin_id: &str,
        sample_rate: f32,
        max_block_size: usize,
    ) -> Result<PluginInstance, LooperError> {
        let (mut node, state): (Box<dyn PluginNode>, Arc<dyn PluginState>) = match plugin_id {
            gain::PLUGIN_ID => {
                let params = Arc::new(gain::Params::default());
                (Box::new(GainNode::new(params.clone())), params)
            }
            sine_synth::PLUGIN_ID => {
                let params = Arc::new(sine_synth::Params::default());
                (Box::new(SineSynth::new(params.clone())), params)
            }
            other => return Err(LooperError::UnknownPlugin(other.to_string())),
        };
        node.prepare(sample_rate, max_block_size);
        Ok(PluginInstance {
            plugin_id: plugin_id.to_string(),
            node,
            state,
            bypassed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Serializes a built-in node's parameters as base64-wrapped JSON.
pub(crate) fn encode_state<T: Serialize>(state: &T) -> String {
    // Parameter structs are plain numbers; serialization cannot fail.
    let json = serde_json::to_vec(state).unwrap_or_default();
    STANDARD.encode(json)
}

pub(crate) fn decode_state<T: DeserializeOwned>(state: &str) -> Result<T, PluginError> {
    let bytes = STANDARD
        .decode(state.trim())
        .map_err(|e| PluginError::InvalidState(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| PluginError::InvalidState(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_host_knows_builtins() {
        let host = NativePluginHost;
        assert!(host.instantiate(gain::PLUGIN_ID, 48000.0, 256).is_ok());
        assert!(host.instantiate(sine_synth::PLUGIN_ID, 48000.0, 256).is_ok());
        assert_eq!(
            host.instantiate("vendor.reverb", 48000.0, 256).err(),
            Some(LooperError::UnknownPlugin("vendor.reverb".to_string()))
        );
    }

    #[test]
    fn test_state_blob_round_trip() {
        let host = NativePluginHost;
        let a = host.instantiate(gain::PLUGIN_ID, 48000.0, 256).unwrap();
        a.state.set_state_base64(&encode_state(&gain::GainState { gain_db: -6.0 })).unwrap();
        let blob = a.state.get_state_base64();

        let b = host.instantiate(gain::PLUGIN_ID, 48000.0, 256).unwrap();
        b.state.set_state_base64(&blob).unwrap();
        assert_eq!(b.state.get_state_base64(), blob);
    }

    #[test]
    fn test_garbage_state_is_rejected() {
        let host = NativePluginHost;
        let a = host.instantiate(gain::PLUGIN_ID, 48000.0, 256).unwrap();
        assert!(matches!(
            a.state.set_state_base64("not base64 at all!"),
            Err(PluginError::InvalidState(_))
        ));
    }
}
