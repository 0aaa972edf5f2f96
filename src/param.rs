//! Atomic scalar cells shared between the control and audio threads.

use std::sync::atomic::{AtomicU32, Ordering};

/// An `f32` stored bit-for-bit in an `AtomicU32`.
///
/// Writers on the control thread use `store` (release), the audio thread reads
/// with `load` (acquire). Values round-trip exactly.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Relaxed read, used for meters where ordering does not matter.
    #[inline]
    pub fn load_relaxed(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store_relaxed(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
