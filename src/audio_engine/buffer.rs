// FILE: src/audio_engine/buffer.rs
// ================================

/// Non-interleaved block storage for hardware channels.
///
/// Allocated once with a fixed capacity; `set_frames` only changes the view.
#[derive(Debug, Clone)]
pub struct PlanarBuffer {
    channels: usize,
    capacity: usize,
    frames: usize,
    data: Vec<f32>,
}

impl PlanarBuffer {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels,
            capacity,
            frames: capacity,
            data: vec![0.0; channels * capacity],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Sets the active block length, clamped to capacity.
    pub fn set_frames(&mut self, frames: usize) {
        self.frames = frames.min(self.capacity);
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        let start = index * self.capacity;
        &self.data[start..start + self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    pub fn clear(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Copies `frames` interleaved frames in. Missing source channels become silence.
    pub fn deinterleave_from(&mut self, interleaved: &[f32], source_channels: usize) {
        let source_channels = source_channels.max(1);
        let frames = (interleaved.len() / source_channels).min(self.capacity);
        self.set_frames(frames);
        for ch in 0..self.channels {
            let start = ch * self.capacity;
            let dest = &mut self.data[start..start + frames];
            if ch < source_channels {
                for (i, d) in dest.iter_mut().enumerate() {
                    *d = interleaved[i * source_channels + ch];
                }
            } else {
                dest.fill(0.0);
            }
        }
    }

    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.data[channel * self.capacity + frame]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_stereo() {
        let mut buf = PlanarBuffer::new(2, 8);
        buf.deinterleave_from(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2);
        assert_eq!(buf.frames(), 3);
        assert_eq!(buf.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buf.channel(1), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_missing_source_channels_are_silent() {
        let mut buf = PlanarBuffer::new(3, 4);
        buf.channel_mut(2).fill(9.0);
        buf.deinterleave_from(&[0.5, 0.5, 0.5, 0.5], 1);
        assert_eq!(buf.channel(0), &[0.5; 4]);
        assert_eq!(buf.channel(2), &[0.0; 4]);
    }

    #[test]
    fn test_frames_clamped_to_capacity() {
        let mut buf = PlanarBuffer::new(1, 16);
        buf.set_frames(64);
        assert_eq!(buf.frames(), 16);
    }
}
