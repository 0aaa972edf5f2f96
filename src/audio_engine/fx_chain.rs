// FILE: src/audio_engine/fx_chain.rs
// ==================================

use crate::plugins::{PluginError, PluginNode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const FX_SLOTS: usize = 3;

/// One installed insert effect.
pub struct FxSlot {
    pub node: Box<dyn PluginNode>,
    pub bypassed: Arc<AtomicBool>,
}

impl std::fmt::Debug for FxSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FxSlot")
            .field("bypassed", &self.bypassed)
            .finish_non_exhaustive()
    }
}

/// A fixed chain of up to three inserts, processed in slot order.
#[derive(Default)]
pub struct FxChain {
    slots: [Option<FxSlot>; FX_SLOTS],
}

impl FxChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts `fx` into `slot` and hands back whatever was there.
    pub fn install(&mut self, slot: usize, fx: FxSlot) -> Result<Option<FxSlot>, FxSlot> {
        match self.slots.get_mut(slot) {
            Some(entry) => Ok(entry.replace(fx)),
            None => Err(fx),
        }
    }

    pub fn take(&mut self, slot: usize) -> Option<FxSlot> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Runs every non-bypassed insert over `buffer`. A failing insert leaves
    /// the whole block silent and stops the chain.
    pub fn process_buffer(&mut self, buffer: &mut [f32]) -> Result<(), PluginError> {
        for fx in self.slots.iter_mut().flatten() {
            if fx.bypassed.load(Ordering::Relaxed) {
                continue;
            }
            if let Err(e) = fx.node.process(buffer, &[]) {
                buffer.fill(0.0);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn prepare(&mut self, sample_rate: f32, max_block_size: usize) {
        for fx in self.slots.iter_mut().flatten() {
            fx.node.prepare(sample_rate, max_block_size);
        }
    }

    /// Drops effect tails. New song.
    pub fn reset(&mut self) {
        for fx in self.slots.iter_mut().flatten() {
            fx.node.reset();
        }
    }
}
