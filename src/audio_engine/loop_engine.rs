// FILE: src/audio_engine/loop_engine.rs
// =====================================

//! The master clock.
//!
//! One playhead for the whole song, advanced once per callback before any
//! channel runs. Channels never keep a clock of their own: they ask for the
//! loop position of sample `i` in the current block and schedule transitions
//! as absolute frame numbers.

use crate::audio_engine::command::Quantize;
use crate::error::LooperError;

pub struct LoopEngine {
    /// Frames rolled since the engine started. Never wraps.
    frames: u64,
    /// Loop position after the current block. Unbounded while no loop exists.
    playhead: u64,
    /// 0 until the first recording pass closes.
    loop_length: usize,
    block_start_frame: u64,
    /// Signed so an origin reset mid-block can put earlier samples before zero.
    block_start_pos: i64,
    block_len: usize,
    rolling: bool,
    quantize: Quantize,
    samples_per_beat: f64,
    beats_per_bar: u32,
}

impl LoopEngine {
    pub fn new(samples_per_beat: f64, beats_per_bar: u32, quantize: Quantize) -> Self {
        Self {
            frames: 0,
            playhead: 0,
            loop_length: 0,
            block_start_frame: 0,
            block_start_pos: 0,
            block_len: 0,
            rolling: true,
            quantize,
            samples_per_beat,
            beats_per_bar: beats_per_bar.max(1),
        }
    }

    pub fn loop_length(&self) -> usize {
        self.loop_length
    }

    pub fn has_loop(&self) -> bool {
        self.loop_length > 0
    }

    pub fn playhead(&self) -> u64 {
        self.playhead
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn block_start_frame(&self) -> u64 {
        self.block_start_frame
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling
    }

    pub fn set_rolling(&mut self, rolling: bool) {
        self.rolling = rolling;
    }

    pub fn quantize(&self) -> Quantize {
        self.quantize
    }

    pub fn set_quantize(&mut self, quantize: Quantize) {
        self.quantize = quantize;
    }

    pub fn set_grid(&mut self, samples_per_beat: f64, beats_per_bar: u32) {
        self.samples_per_beat = samples_per_beat;
        self.beats_per_bar = beats_per_bar.max(1);
    }

    /// Fixes the global loop length. Only the first successful call wins.
    pub fn request_loop_length(&mut self, candidate: usize) -> Result<usize, LooperError> {
        if self.loop_length > 0 {
            return Err(LooperError::LoopLengthAlreadySet {
                current: self.loop_length,
            });
        }
        if candidate == 0 {
            return Err(LooperError::InvalidLoopLength);
        }
        self.loop_length = candidate;
        self.block_start_pos = self.block_start_pos.rem_euclid(candidate as i64);
        self.playhead %= candidate as u64;
        Ok(candidate)
    }

    /// Fixes the loop length and makes sample `offset` of the current block
    /// loop position 0.
    pub fn close_loop_at(&mut self, candidate: usize, offset: usize) -> Result<usize, LooperError> {
        self.request_loop_length(candidate)?;
        let len = candidate as i64;
        self.block_start_pos = (-(offset as i64)).rem_euclid(len);
        let end = if self.rolling { self.block_len as i64 } else { 0 };
        self.playhead = (self.block_start_pos + end).rem_euclid(len) as u64;
        Ok(candidate)
    }

    /// Moves the clock over the next block. Called once per callback.
    pub fn advance(&mut self, block_size: usize) {
        self.block_start_frame = self.frames;
        self.block_start_pos = self.playhead as i64;
        self.block_len = block_size;
        if !self.rolling {
            return;
        }
        self.frames += block_size as u64;
        self.playhead += block_size as u64;
        if self.loop_length > 0 {
            self.playhead %= self.loop_length as u64;
        }
    }

    /// Loop position of sample `offset` in the current block.
    #[inline]
    pub fn position_at(&self, offset: usize) -> u64 {
        self.wrap(self.block_start_pos + offset as i64)
    }

    #[inline]
    fn wrap(&self, pos: i64) -> u64 {
        if self.loop_length > 0 {
            pos.rem_euclid(self.loop_length as i64) as u64
        } else {
            pos.max(0) as u64
        }
    }

    #[inline]
    pub fn frame_at(&self, offset: usize) -> u64 {
        self.block_start_frame + offset as u64
    }

    /// Restarts the unbounded count so sample `offset` of the current block is
    /// position 0. Used when the first recording of a song starts.
    pub fn reset_origin_at(&mut self, offset: usize) {
        if self.loop_length > 0 {
            return;
        }
        self.block_start_pos = -(offset as i64);
        self.playhead = if self.rolling {
            self.block_len.saturating_sub(offset) as u64
        } else {
            0
        };
    }

    fn position_of_frame(&self, frame: u64) -> u64 {
        self.wrap(self.block_start_pos + frame.saturating_sub(self.block_start_frame) as i64)
    }

    /// Grid spacing in samples, 0 when unquantized.
    fn grid_step(&self) -> f64 {
        let beats = match self.quantize {
            Quantize::Off => return 0.0,
            Quantize::Beat => 1.0,
            Quantize::Bar => self.beats_per_bar as f64,
            Quantize::Loop => return self.loop_length as f64,
        };
        if !(self.samples_per_beat.is_finite() && self.samples_per_beat > 0.0) {
            return 0.0;
        }
        (self.samples_per_beat * beats).max(1.0)
    }

    /// First frame at or after `request_frame` on the active grid. The grid is
    /// aligned to loop position 0 and the loop start is always a boundary.
    /// Grid line `k` sits at `ceil(k * step)`, the sample the metronome clicks on.
    pub fn quantized_boundary(&self, request_frame: u64) -> u64 {
        let step = self.grid_step();
        if step <= 0.0 {
            return request_frame;
        }
        let pos = self.position_of_frame(request_frame);
        let k = (pos as f64 / step).floor();
        let mut next = (k * step).ceil() as u64;
        if next < pos {
            next = ((k + 1.0) * step).ceil() as u64;
        }
        if self.loop_length > 0 {
            next = next.min(self.loop_length as u64);
        }
        request_frame + (next - pos)
    }

    /// Offset in the current block at which loop position 0 falls: a new
    /// origin, a loop that just closed or a wrap.
    pub fn origin_in_block(&self) -> Option<usize> {
        if !self.rolling {
            return None;
        }
        let offset = if self.loop_length > 0 {
            let len = self.loop_length as i64;
            (len - self.block_start_pos.rem_euclid(len)) % len
        } else if self.block_start_pos <= 0 {
            -self.block_start_pos
        } else {
            return None;
        };
        (offset < self.block_len as i64).then_some(offset as usize)
    }

    /// Next frame at which the loop wraps to position 0.
    pub fn next_loop_start(&self, request_frame: u64) -> u64 {
        if self.loop_length == 0 {
            return request_frame;
        }
        let len = self.loop_length as u64;
        let pos = self.position_of_frame(request_frame);
        request_frame + (len - pos) % len
    }

    /// Forgets the loop. New song.
    pub fn reset(&mut self) {
        self.playhead = 0;
        self.loop_length = 0;
        self.block_start_pos = 0;
        self.block_start_frame = self.frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(quantize: Quantize) -> LoopEngine {
        // 120 BPM at 48 kHz.
        LoopEngine::new(24_000.0, 4, quantize)
    }

    #[test]
    fn test_loop_length_is_immutable_once_set() {
        let mut clock = engine(Quantize::Off);
        assert_eq!(clock.request_loop_length(0), Err(LooperError::InvalidLoopLength));
        assert_eq!(clock.request_loop_length(1000), Ok(1000));
        assert_eq!(
            clock.request_loop_length(500),
            Err(LooperError::LoopLengthAlreadySet { current: 1000 })
        );
        assert_eq!(clock.loop_length(), 1000);
    }

    #[test]
    fn test_playhead_is_unbounded_before_loop() {
        let mut clock = engine(Quantize::Off);
        for _ in 0..100 {
            clock.advance(512);
        }
        assert_eq!(clock.playhead(), 51_200);
        assert_eq!(clock.frames(), 51_200);
    }

    #[test]
    fn test_playhead_wraps_modulo_loop_length() {
        let mut clock = engine(Quantize::Off);
        clock.request_loop_length(1000).unwrap();
        let mut expected = 0u64;
        for k in [256usize, 300, 999, 1000, 1, 4096] {
            clock.advance(k);
            expected = (expected + k as u64) % 1000;
            assert_eq!(clock.playhead(), expected);
        }
    }

    #[test]
    fn test_position_at_within_block() {
        let mut clock = engine(Quantize::Off);
        clock.request_loop_length(100).unwrap();
        clock.advance(64);
        clock.advance(64);
        assert_eq!(clock.position_at(0), 64);
        assert_eq!(clock.position_at(35), 99);
        assert_eq!(clock.position_at(36), 0);
        assert_eq!(clock.frame_at(36), 100);
    }

    #[test]
    fn test_setting_length_normalises_positions() {
        let mut clock = engine(Quantize::Off);
        clock.advance(512);
        clock.advance(512);
        clock.request_loop_length(600).unwrap();
        assert_eq!(clock.position_at(88), 0);
        assert_eq!(clock.playhead(), 1024 % 600);
    }

    #[test]
    fn test_origin_reset_mid_block() {
        let mut clock = engine(Quantize::Off);
        clock.advance(1000);
        clock.advance(256);
        clock.reset_origin_at(56);
        assert_eq!(clock.position_at(56), 0);
        assert_eq!(clock.position_at(255), 199);
        assert_eq!(clock.playhead(), 200);
    }

    #[test]
    fn test_close_loop_realigns_to_zero() {
        let mut clock = engine(Quantize::Off);
        clock.advance(256);
        clock.advance(256);
        // 300 samples recorded, loop rounded to 290.
        assert_eq!(clock.close_loop_at(290, 44), Ok(290));
        assert_eq!(clock.position_at(44), 0);
        assert_eq!(clock.position_at(43), 289);
        assert_eq!(clock.playhead(), 212);
    }

    #[test]
    fn test_stopped_transport_freezes_clock() {
        let mut clock = engine(Quantize::Off);
        clock.request_loop_length(1000).unwrap();
        clock.advance(100);
        clock.set_rolling(false);
        clock.advance(100);
        clock.advance(100);
        assert_eq!(clock.playhead(), 100);
        assert_eq!(clock.frames(), 100);
    }

    #[test]
    fn test_quantize_off_is_immediate() {
        let mut clock = engine(Quantize::Off);
        clock.advance(128);
        assert_eq!(clock.quantized_boundary(128), 128);
    }

    #[test]
    fn test_bar_boundary_aligned_to_loop_start() {
        let mut clock = engine(Quantize::Bar);
        clock.request_loop_length(192_000).unwrap();
        clock.advance(1000);
        // One bar is 96000 samples; position 1000 snaps to 96000.
        let boundary = clock.quantized_boundary(1000);
        assert_eq!(boundary, 96_000);
        // Exactly on a boundary stays put.
        assert_eq!(clock.quantized_boundary(0), 0);
    }

    #[test]
    fn test_boundary_never_passes_loop_start() {
        let mut clock = engine(Quantize::Bar);
        // Loop shorter than a bar: the loop start is the next boundary.
        clock.request_loop_length(30_000).unwrap();
        clock.advance(10_000);
        assert_eq!(clock.quantized_boundary(10_000), 30_000);
    }

    #[test]
    fn test_loop_quantize_waits_for_wrap() {
        let mut clock = engine(Quantize::Loop);
        clock.request_loop_length(1000).unwrap();
        clock.advance(250);
        assert_eq!(clock.quantized_boundary(250), 1000);
        assert_eq!(clock.next_loop_start(250), 1000);
    }

    #[test]
    fn test_beat_grid_without_loop() {
        let mut clock = engine(Quantize::Beat);
        clock.advance(30_000);
        assert_eq!(clock.quantized_boundary(30_000), 48_000);
    }

    #[test]
    fn test_fractional_beat_grid_rounds_up() {
        // 133 BPM at 44.1 kHz: 19894.74 samples per beat.
        let mut clock = LoopEngine::new(44_100.0 * 60.0 / 133.0, 4, Quantize::Beat);
        clock.advance(20_000);
        assert_eq!(clock.quantized_boundary(1), 19_895);
        assert_eq!(clock.quantized_boundary(19_895), 19_895);
        assert_eq!(clock.quantized_boundary(19_896), 39_790);
    }

    #[test]
    fn test_origin_in_block() {
        let mut clock = engine(Quantize::Off);
        clock.advance(64);
        assert_eq!(clock.origin_in_block(), Some(0));
        clock.advance(64);
        assert_eq!(clock.origin_in_block(), None);
        clock.reset_origin_at(20);
        assert_eq!(clock.origin_in_block(), Some(20));

        clock.advance(64);
        clock.close_loop_at(100, 10).unwrap();
        assert_eq!(clock.origin_in_block(), Some(10));
        // Position 54 at the next block start; the wrap is 46 samples in.
        clock.advance(64);
        assert_eq!(clock.origin_in_block(), Some(46));
        clock.set_rolling(false);
        clock.advance(64);
        assert_eq!(clock.origin_in_block(), None);
    }

    #[test]
    fn test_reset_clears_loop_and_playhead() {
        let mut clock = engine(Quantize::Off);
        clock.request_loop_length(1000).unwrap();
        clock.advance(300);
        clock.reset();
        assert_eq!(clock.loop_length(), 0);
        assert_eq!(clock.playhead(), 0);
        assert_eq!(clock.request_loop_length(2000), Ok(2000));
    }
}
