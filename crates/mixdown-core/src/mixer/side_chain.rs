//! Side-chain ducking
//!
//! The primary (voice) buffer drives a feed-forward compressor whose gain
//! is applied to the secondary (music) buffer. Level detection and gain
//! smoothing run in the dB domain; `yl_prev` carries the smoothed gain
//! reduction between calls.

use serde::{Deserialize, Serialize};

use crate::types::{round_clip, Sample};

/// Compressor settings shared by every side-chained source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideChainParams {
    /// Voice level above which the music is ducked
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Makeup gain at `makeUpGain = 100`
    pub makeup_db_max: f32,
}

impl Default for SideChainParams {
    fn default() -> Self {
        Self {
            threshold_db: -30.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 300.0,
            makeup_db_max: 6.0,
        }
    }
}

fn smoothing(time_ms: f32, sample_rate: u32) -> f32 {
    if time_ms <= 0.0 || sample_rate == 0 {
        return 0.0;
    }
    (-1000.0 / (time_ms * sample_rate as f32)).exp()
}

/// Duck `secondary` in place by the level of `primary`
///
/// `makeup_gain` is the source's 0-1 makeup setting, scaled by
/// [`SideChainParams::makeup_db_max`].
pub fn side_chain_compress(
    primary: &[Sample],
    secondary: &mut [Sample],
    yl_prev: &mut f32,
    sample_rate: u32,
    channels: u16,
    params: &SideChainParams,
    makeup_gain: f32,
) {
    let channels = channels.max(1) as usize;
    let attack = smoothing(params.attack_ms, sample_rate);
    let release = smoothing(params.release_ms, sample_rate);
    let ratio = params.ratio.max(1.0);
    let makeup_db = makeup_gain * params.makeup_db_max;

    for (trigger, frame) in primary.chunks_exact(channels).zip(secondary.chunks_exact_mut(channels)) {
        let peak = trigger.iter().map(|&s| (s as f32).abs()).fold(0.0, f32::max) / 32768.0;
        let xg = 20.0 * peak.max(1e-6).log10();
        let yg = if xg < params.threshold_db {
            xg
        } else {
            params.threshold_db + (xg - params.threshold_db) / ratio
        };
        let xl = xg - yg;
        let coeff = if xl > *yl_prev { attack } else { release };
        *yl_prev = coeff * *yl_prev + (1.0 - coeff) * xl;

        let gain = 10f64.powf(((makeup_db - *yl_prev) / 20.0) as f64);
        for sample in frame {
            *sample = round_clip(*sample as f64 * gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_voice_leaves_music_alone() {
        let params = SideChainParams::default();
        let voice = vec![10; 2000];
        let mut music = vec![8000; 2000];
        let mut yl = 0.0;
        side_chain_compress(&voice, &mut music, &mut yl, 44100, 2, &params, 0.0);
        assert_eq!(yl, 0.0);
        assert!(music.iter().all(|&s| s == 8000));
    }

    #[test]
    fn test_loud_voice_ducks_music() {
        let params = SideChainParams::default();
        let voice = vec![20000; 44100];
        let mut music = vec![8000; 44100];
        let mut yl = 0.0;
        side_chain_compress(&voice, &mut music, &mut yl, 44100, 1, &params, 0.0);
        // -4.3 dBFS against -30 dB at 4:1 settles near 19 dB of reduction
        assert!(yl > 18.0 && yl < 20.0, "yl = {yl}");
        assert!(music[44099] < 1000);
        assert!(music[0] > music[44099]);
    }

    #[test]
    fn test_envelope_carries_across_calls() {
        let params = SideChainParams::default();
        let voice = vec![20000; 441];
        let mut yl = 0.0;
        side_chain_compress(&voice, &mut vec![0; 441], &mut yl, 44100, 1, &params, 0.0);
        let after_first = yl;
        side_chain_compress(&voice, &mut vec![0; 441], &mut yl, 44100, 1, &params, 0.0);
        assert!(yl > after_first);
    }

    #[test]
    fn test_initial_envelope_at_makeup_is_unity() {
        let params = SideChainParams::default();
        let voice = vec![0; 1];
        let mut music = vec![8000; 1];
        let mut yl = 0.5 * params.makeup_db_max;
        side_chain_compress(&voice, &mut music, &mut yl, 44100, 1, &params, 0.5);
        // Release pulls the envelope only slightly toward 0 within one frame
        assert!((music[0] - 8000).abs() < 5);
    }
}
