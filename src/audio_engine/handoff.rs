// FILE: src/audio_engine/handoff.rs
// =================================

//! Transfers that do not fit in a `Copy` command.
//!
//! Plugin nodes and snapshot buffers are allocated on the control thread and
//! travel to the audio thread here. Anything the audio thread lets go of
//! comes back on the return queue so it is freed on the control thread.

use crate::audio_engine::fx_chain::FxSlot;
use crate::audio_engine::telemetry::EngineCounters;
use crate::plugins::PluginNode;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::AtomicU64;

pub enum Handoff {
    InstallFx {
        channel: usize,
        slot: usize,
        fx: FxSlot,
    },
    InstallInstrument {
        channel: usize,
        node: Box<dyn PluginNode>,
    },
    /// One buffer per channel, each with spare capacity for the loop.
    Capture { buffers: Vec<Vec<f32>> },
    /// Replaces the whole song in one block. `loops[i]` is channel `i`'s audio.
    Restore {
        loop_length: usize,
        loops: Vec<Option<Vec<f32>>>,
    },
}

pub enum Returned {
    RetiredFx(FxSlot),
    RetiredInstrument(Box<dyn PluginNode>),
    /// `complete` is false when a buffer was too small for the loop.
    Captured {
        loop_length: usize,
        buffers: Vec<Vec<f32>>,
        complete: bool,
    },
    RestoreSpent(Vec<Option<Vec<f32>>>),
}

/// Control-thread ends.
pub struct ControlHandoff {
    pub to_audio: HeapProducer<Handoff>,
    pub from_audio: HeapConsumer<Returned>,
}

/// Audio-thread ends.
pub struct AudioHandoff {
    from_control: HeapConsumer<Handoff>,
    to_control: HeapProducer<Returned>,
    /// Holds returns while the queue is full. Never grows past its capacity.
    pending: Vec<Returned>,
}

impl AudioHandoff {
    #[inline]
    pub fn pop(&mut self) -> Option<Handoff> {
        self.from_control.pop()
    }

    /// Sends `item` back for deallocation on the control thread.
    pub fn give_back(&mut self, item: Returned, overflowed: &AtomicU64) {
        let item = if self.pending.is_empty() {
            match self.to_control.push(item) {
                Ok(()) => return,
                Err(item) => item,
            }
        } else {
            item
        };
        if self.pending.len() < self.pending.capacity() {
            self.pending.push(item);
        } else {
            // Both queues full: the item is freed here.
            EngineCounters::bump(overflowed);
            drop(item);
        }
    }

    /// Retries returns that did not fit earlier.
    pub fn flush(&mut self) {
        while !self.pending.is_empty() && !self.to_control.is_full() {
            let item = self.pending.remove(0);
            if let Err(item) = self.to_control.push(item) {
                self.pending.insert(0, item);
                break;
            }
        }
    }
}

pub fn handoff_queues(capacity: usize) -> (ControlHandoff, AudioHandoff) {
    let capacity = capacity.max(1);
    let (to_audio, from_control) = HeapRb::<Handoff>::new(capacity).split();
    let (to_control, from_audio) = HeapRb::<Returned>::new(capacity).split();
    (
        ControlHandoff {
            to_audio,
            from_audio,
        },
        AudioHandoff {
            from_control,
            to_control,
            pending: Vec::with_capacity(capacity),
        },
    )
}
