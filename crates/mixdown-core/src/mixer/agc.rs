//! Anti-clip summing of two interleaved buffers

use crate::types::{clip_i32, Sample, SAMPLE_MAX, SAMPLE_MIN};

/// Default recovery divisor: a factor below 1.0 moves `(1 - factor) / 32`
/// back toward unity per sample
pub const AGC_RECOVERY_DIVISOR: f32 = 32.0;

/// Next gain factor after producing the scaled `sum`
///
/// On overflow the factor becomes the one that maps the unscaled sum exactly
/// onto the range limit.
#[inline]
fn update_factor(factor: f32, sum: i32, recovery_divisor: f32) -> f32 {
    let mut next = factor;
    if sum > SAMPLE_MAX {
        next = factor * SAMPLE_MAX as f32 / sum as f32;
    } else if sum < SAMPLE_MIN {
        next = factor * SAMPLE_MIN as f32 / sum as f32;
    }
    if factor < 1.0 {
        next += (1.0 - factor) / recovery_divisor;
    }
    next
}

/// Sum `primary` and `secondary` into `dst` with a persistent per-channel
/// gain factor
///
/// Mixes `secondary.len()` samples. Channel 0 uses `left_factor`, every
/// other channel `right_factor`. A scaled sum outside the i16 range forces
/// its factor down to the value that brings that sum exactly in range; the
/// emitted sample itself is clamped.
pub fn mix_buffer_s16(
    primary: &[Sample],
    secondary: &[Sample],
    channels: u16,
    dst: &mut [Sample],
    left_factor: &mut f32,
    right_factor: &mut f32,
    recovery_divisor: f32,
) {
    let channels = channels.max(1) as usize;
    let n = secondary.len().min(primary.len()).min(dst.len());
    for i in 0..n {
        let factor = if i % channels == 0 {
            &mut *left_factor
        } else {
            &mut *right_factor
        };
        let sum = ((primary[i] as i32 + secondary[i] as i32) as f32 * *factor) as i32;
        *factor = update_factor(*factor, sum, recovery_divisor);
        dst[i] = clip_i32(sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_sum_is_exact() {
        let (mut l, mut r) = (1.0, 1.0);
        let mut dst = [0; 4];
        mix_buffer_s16(&[100, 200, -300, 400], &[1, 2, 3, 4], 2, &mut dst, &mut l, &mut r, AGC_RECOVERY_DIVISOR);
        assert_eq!(dst, [101, 202, -297, 404]);
        assert_eq!((l, r), (1.0, 1.0));
    }

    #[test]
    fn test_overflow_forces_factor_and_stays_in_range() {
        let (mut l, mut r) = (1.0, 1.0);
        let primary = vec![30000; 400];
        let secondary = vec![30000; 400];
        let mut dst = vec![0; 400];
        mix_buffer_s16(&primary, &secondary, 2, &mut dst, &mut l, &mut r, AGC_RECOVERY_DIVISOR);
        assert_eq!(dst[0], i16::MAX);
        assert!((l - 32767.0 / 60000.0).abs() < 0.02);
        assert!(l < 1.0 && r < 1.0);

        let negative = vec![-30000; 400];
        mix_buffer_s16(&negative, &negative, 2, &mut dst, &mut l, &mut r, AGC_RECOVERY_DIVISOR);
        assert!(dst.iter().all(|&s| s >= i16::MIN));
    }

    #[test]
    fn test_factor_recovers_toward_unity() {
        let (mut l, mut r) = (0.5, 0.5);
        let quiet = vec![0; 2000];
        let mut dst = vec![0; 2000];
        mix_buffer_s16(&quiet, &quiet, 1, &mut dst, &mut l, &mut r, AGC_RECOVERY_DIVISOR);
        assert_eq!(r, 0.5);
        assert!(l > 0.99 && l <= 1.0);
        let before = 0.5f32;
        let one_step = before + (1.0 - before) / AGC_RECOVERY_DIVISOR;
        let (mut l2, mut r2) = (0.5, 0.5);
        mix_buffer_s16(&[0], &[0], 1, &mut [0], &mut l2, &mut r2, AGC_RECOVERY_DIVISOR);
        assert_eq!(l2, one_step);
    }

    #[test]
    fn test_mixes_only_secondary_length() {
        let (mut l, mut r) = (1.0, 1.0);
        let mut dst = [7; 4];
        mix_buffer_s16(&[1, 1, 1, 1], &[1, 1], 2, &mut dst, &mut l, &mut r, AGC_RECOVERY_DIVISOR);
        assert_eq!(dst, [2, 2, 7, 7]);
    }
}
