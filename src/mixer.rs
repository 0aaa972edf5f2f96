use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixerTrackState {
    pub volume: f32,
    pub is_muted: bool,
    pub is_soloed: bool,
}

impl Default for MixerTrackState {
    fn default() -> Self {
        Self {
            volume: 1.0, // Represents 0 dB
            is_muted: false,
            is_soloed: false,
        }
    }
}

impl MixerTrackState {
    /// Whether this track's loop output reaches the mix. Monitoring ignores this.
    pub fn is_audible(&self, is_any_soloed: bool) -> bool {
        if is_any_soloed {
            self.is_soloed
        } else {
            !self.is_muted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solo_overrides_mute() {
        let soloed_and_muted = MixerTrackState {
            is_muted: true,
            is_soloed: true,
            ..Default::default()
        };
        assert!(soloed_and_muted.is_audible(true));
        assert!(!soloed_and_muted.is_audible(false));
        assert!(!MixerTrackState::default().is_audible(true));
        assert!(MixerTrackState::default().is_audible(false));
    }
}
