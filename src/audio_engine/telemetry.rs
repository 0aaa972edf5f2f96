// FILE: src/audio_engine/telemetry.rs
// ===================================

//! Values the audio thread publishes once per block.
//!
//! The audio thread never logs. Anything worth reporting is counted here and
//! the control thread logs the deltas.

use crate::audio_engine::command::Quantize;
use crate::param::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct EngineCounters {
    pub commands_applied: AtomicU64,
    pub commands_malformed: AtomicU64,
    /// Shared with every `CommandSender`; counts failed enqueues.
    pub commands_dropped: Arc<AtomicU64>,
    pub plugin_failures: AtomicU64,
    pub loop_length_rejections: AtomicU64,
    pub returns_overflowed: AtomicU64,
}

impl EngineCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_malformed: self.commands_malformed.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            plugin_failures: self.plugin_failures.load(Ordering::Relaxed),
            loop_length_rejections: self.loop_length_rejections.load(Ordering::Relaxed),
            returns_overflowed: self.returns_overflowed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub commands_applied: u64,
    pub commands_malformed: u64,
    pub commands_dropped: u64,
    pub plugin_failures: u64,
    pub loop_length_rejections: u64,
    pub returns_overflowed: u64,
}

#[derive(Debug, Default)]
pub struct Telemetry {
    /// Block processing time over block duration.
    pub cpu_load: AtomicF32,
    pub playhead: AtomicU64,
    pub loop_length: AtomicU64,
    pub frames: AtomicU64,
    pub rolling: AtomicBool,
    pub quantize: AtomicU8,
    pub counters: EngineCounters,
}

impl Telemetry {
    pub fn cpu_load(&self) -> f32 {
        self.cpu_load.load_relaxed()
    }

    pub fn playhead(&self) -> u64 {
        self.playhead.load(Ordering::Relaxed)
    }

    /// 0 while no loop exists.
    pub fn loop_length(&self) -> usize {
        self.loop_length.load(Ordering::Acquire) as usize
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling.load(Ordering::Acquire)
    }

    pub fn quantize(&self) -> Quantize {
        self.quantize.load(Ordering::Acquire).into()
    }
}
