// src/plugins/gain.rs

//! A simple audio gain node.
//!
//! Multiplies the incoming audio signal by a factor given in dB.
use crate::midi::MidiEvent;
use crate::param::AtomicF32;
use crate::plugins::{decode_state, encode_state, PluginError, PluginNode, PluginState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const PLUGIN_ID: &str = "native.gain";

const MIN_DB: f32 = -60.0;
const MAX_DB: f32 = 30.0;

/// Shared, automatable parameters for the gain node.
#[derive(Debug)]
pub struct Params {
    pub gain_db: AtomicF32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            gain_db: AtomicF32::new(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GainState {
    pub gain_db: f32,
}

impl PluginState for Params {
    fn get_state_base64(&self) -> String {
        encode_state(&GainState {
            gain_db: self.gain_db.load(),
        })
    }

    fn set_state_base64(&self, state: &str) -> Result<(), PluginError> {
        let decoded: GainState = decode_state(state)?;
        if !decoded.gain_db.is_finite() {
            return Err(PluginError::InvalidState("gain_db must be finite".to_string()));
        }
        self.gain_db.store(decoded.gain_db.clamp(MIN_DB, MAX_DB));
        Ok(())
    }
}

/// The audio-thread state for the gain node. It holds a clone of the shared parameters.
#[derive(Debug)]
pub struct GainNode {
    params: Arc<Params>,
}

impl GainNode {
    pub fn new(params: Arc<Params>) -> Self {
        Self { params }
    }
}

impl PluginNode for GainNode {
    fn prepare(&mut self, _sample_rate: f32, _max_block_size: usize) {}

    fn process(&mut self, audio: &mut [f32], _midi: &[MidiEvent]) -> Result<(), PluginError> {
        let gain_db = self.params.gain_db.load().clamp(MIN_DB, MAX_DB);
        let linear = 10.0_f32.powf(gain_db / 20.0);

        // Unity gain leaves the block untouched.
        if (linear - 1.0).abs() < 1e-6 {
            return Ok(());
        }
        for sample in audio.iter_mut() {
            *sample *= linear;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minus_six_db_halves() {
        let params = Arc::new(Params::default());
        params.gain_db.store(-6.0206);
        let mut node = GainNode::new(params);
        let mut block = [1.0f32; 4];
        node.process(&mut block, &[]).unwrap();
        for s in block {
            assert!((s - 0.5).abs() < 1e-3);
        }
    }

    #[test]
    fn test_unity_is_passthrough() {
        let mut node = GainNode::new(Arc::new(Params::default()));
        let mut block = [0.25f32, -0.75];
        node.process(&mut block, &[]).unwrap();
        assert_eq!(block, [0.25, -0.75]);
    }
}
