//! Linear fade law for placed sources

use serde::{Deserialize, Serialize};

use crate::types::{round_clip, Sample};

/// Fade-in over the first `fade_in_ms` of a placement window and fade-out
/// over its last `fade_out_ms`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FadeInOut {
    pub fade_in_ms: i64,
    pub fade_out_ms: i64,
}

impl FadeInOut {
    pub fn new(fade_in_ms: i64, fade_out_ms: i64) -> Self {
        Self {
            fade_in_ms: fade_in_ms.max(0),
            fade_out_ms: fade_out_ms.max(0),
        }
    }

    /// Fade gain (without volume) for frame `pos` of a `window` frame placement
    pub fn gain_at(&self, pos: usize, window: usize, sample_rate: u32) -> f32 {
        let fade_in = frames(self.fade_in_ms, sample_rate);
        let fade_out = frames(self.fade_out_ms, sample_rate);
        let mut gain = 1.0;
        if fade_in > 0 && pos < fade_in {
            gain *= pos as f32 / fade_in as f32;
        }
        let remaining = window.saturating_sub(pos);
        if fade_out > 0 && remaining < fade_out {
            gain *= remaining as f32 / fade_out as f32;
        }
        gain
    }

    /// Scale an interleaved segment by fade and `volume`
    ///
    /// `offset` is the frame index of `buf[0]` inside the placement window
    /// and `window` the window length, both in frames.
    pub fn apply(&self, buf: &mut [Sample], channels: u16, sample_rate: u32, offset: usize, window: usize, volume: f32) {
        let channels = channels.max(1) as usize;
        let plain = self.fade_in_ms == 0 && self.fade_out_ms == 0;
        if plain && volume == 1.0 {
            return;
        }
        for (i, frame) in buf.chunks_mut(channels).enumerate() {
            let gain = if plain {
                volume
            } else {
                volume * self.gain_at(offset + i, window, sample_rate)
            };
            for sample in frame {
                *sample = round_clip(*sample as f64 * gain as f64);
            }
        }
    }
}

fn frames(ms: i64, sample_rate: u32) -> usize {
    if ms <= 0 {
        return 0;
    }
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fade_applies_volume_only() {
        let mut buf = vec![1000; 8];
        FadeInOut::default().apply(&mut buf, 2, 1000, 0, 100, 0.5);
        assert!(buf.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_fade_in_ramps_from_silence() {
        let fade = FadeInOut::new(10, 0);
        // 1 kHz: one frame per millisecond
        let mut buf = vec![1000; 20];
        fade.apply(&mut buf, 1, 1000, 0, 100, 1.0);
        assert_eq!(buf[0], 0);
        assert_eq!(buf[5], 500);
        assert_eq!(buf[10], 1000);
        assert_eq!(buf[19], 1000);
    }

    #[test]
    fn test_fade_out_reaches_silence_at_window_end() {
        let fade = FadeInOut::new(0, 10);
        let mut buf = vec![1000; 10];
        fade.apply(&mut buf, 1, 1000, 90, 100, 1.0);
        assert_eq!(buf[0], 1000);
        assert_eq!(buf[5], 500);
        assert_eq!(buf[9], 100);
    }

    #[test]
    fn test_offset_continues_the_ramp() {
        let fade = FadeInOut::new(100, 0);
        let mut first = vec![1000; 50];
        let mut second = vec![1000; 50];
        fade.apply(&mut first, 1, 1000, 0, 1000, 1.0);
        fade.apply(&mut second, 1, 1000, 50, 1000, 1.0);
        assert_eq!(first[49], 490);
        assert_eq!(second[0], 500);
    }
}
