//! Common types for Mixdown
//!
//! Sample-level constants and helpers shared by the effect pipeline and the
//! timeline mixer. All PCM exchanged between stages is interleaved signed
//! 16-bit; effects that work in floating point convert at their edges.

/// Audio sample type exchanged between every stage
pub type Sample = i16;

/// Largest representable sample
pub const SAMPLE_MAX: i32 = i16::MAX as i32;

/// Smallest representable sample
pub const SAMPLE_MIN: i32 = i16::MIN as i32;

/// Default sample rate for sessions created without a source
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default channel count for sessions created without a source
pub const DEFAULT_CHANNELS: u16 = 1;

/// Samples per processing block (interleaved, all channels)
pub const MAX_NB_SAMPLES: usize = 8192;

/// Samples handed to a single DSP kernel call
pub const MAX_SAMPLE_SIZE: usize = 2048;

/// Bits per output sample
pub const BITS_PER_SAMPLE: u16 = 16;

/// Round half away from zero, then clamp into the i16 range
#[inline]
pub fn round_clip(value: f64) -> Sample {
    let rounded = if value < 0.0 { value - 0.5 } else { value + 0.5 };
    if rounded >= SAMPLE_MAX as f64 {
        i16::MAX
    } else if rounded <= SAMPLE_MIN as f64 {
        i16::MIN
    } else {
        rounded as Sample
    }
}

/// Clamp an integer sum into the i16 range
#[inline]
pub fn clip_i32(value: i32) -> Sample {
    value.clamp(SAMPLE_MIN, SAMPLE_MAX) as Sample
}

/// Convert i16 to float in [-1, 1) using the 32768 scale
#[inline]
pub fn s16_to_f32(sample: Sample) -> f32 {
    sample as f32 / 32768.0
}

/// Convert float to i16 using the 32768 scale with clipping
#[inline]
pub fn f32_to_s16(value: f32) -> Sample {
    let scaled = value * 32768.0;
    if scaled >= 32767.0 {
        i16::MAX
    } else if scaled <= -32768.0 {
        i16::MIN
    } else {
        scaled as Sample
    }
}

/// Duplicate every mono sample into a left/right pair
///
/// `dst` must hold at least `2 * src.len()` samples.
pub fn mono_to_stereo(dst: &mut [Sample], src: &[Sample]) {
    for (pair, &s) in dst.chunks_exact_mut(2).zip(src.iter()) {
        pair[0] = s;
        pair[1] = s;
    }
}

/// Average every left/right pair into one mono sample
///
/// `dst` must hold at least `src.len() / 2` samples.
pub fn stereo_to_mono(dst: &mut [Sample], src: &[Sample]) {
    for (out, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
        *out = ((pair[0] as i32 + pair[1] as i32) >> 1) as Sample;
    }
}

/// Number of interleaved samples covering `ms` milliseconds
#[inline]
pub fn ms_to_samples(ms: i64, sample_rate: u32, channels: u16) -> usize {
    if ms <= 0 {
        return 0;
    }
    (ms as f64 / 1000.0 * sample_rate as f64) as usize * channels as usize
}

/// Milliseconds covered by `samples` interleaved samples
#[inline]
pub fn samples_to_ms(samples: usize, sample_rate: u32, channels: u16) -> i64 {
    if sample_rate == 0 || channels == 0 {
        return 0;
    }
    (1000.0 * samples as f64 / channels as f64 / sample_rate as f64) as i64
}

/// True when every sample in the buffer is silent
#[inline]
pub fn is_silent(buffer: &[Sample]) -> bool {
    buffer.iter().all(|&s| s == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_clip_half_away_from_zero() {
        assert_eq!(round_clip(1.5), 2);
        assert_eq!(round_clip(-1.5), -2);
        assert_eq!(round_clip(1.49), 1);
        assert_eq!(round_clip(-0.4), 0);
    }

    #[test]
    fn test_round_clip_saturates() {
        assert_eq!(round_clip(40000.0), i16::MAX);
        assert_eq!(round_clip(-40000.0), i16::MIN);
        assert_eq!(round_clip(32767.4), i16::MAX);
    }

    #[test]
    fn test_channel_conversion() {
        let mono = [1, -2, 3];
        let mut stereo = [0; 6];
        mono_to_stereo(&mut stereo, &mono);
        assert_eq!(stereo, [1, 1, -2, -2, 3, 3]);

        let mut back = [0; 3];
        stereo_to_mono(&mut back, &[10, 20, -5, -6, i16::MAX, i16::MAX]);
        assert_eq!(back, [15, -6, i16::MAX]);
    }

    #[test]
    fn test_time_conversion() {
        assert_eq!(ms_to_samples(1000, 44100, 2), 88200);
        assert_eq!(ms_to_samples(-5, 44100, 2), 0);
        assert_eq!(samples_to_ms(88200, 44100, 2), 1000);
    }

    #[test]
    fn test_float_conversion_clips() {
        assert_eq!(f32_to_s16(2.0), i16::MAX);
        assert_eq!(f32_to_s16(-2.0), i16::MIN);
        assert_eq!(f32_to_s16(s16_to_f32(1234)), 1234);
    }
}
