//! Linkwitz-Riley Crossover Filter
//!
//! Splits a signal into a low and a high band with 24dB/oct slopes. Each
//! side is a Butterworth biquad squared into a single 4th-order direct-form
//! filter, so low + high sums to an allpass response.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use crate::error::{EffectError, EffectResult};
use crate::types::{round_clip, Sample};

/// Filter order
const ORDER: usize = 4;

/// Square a quadratic `x0 + x1 z + x2 z^2`
fn square_quadratic(x: &[f64; 3]) -> [f64; ORDER + 1] {
    [
        x[0] * x[0],
        2.0 * x[0] * x[1],
        2.0 * x[0] * x[2] + x[1] * x[1],
        2.0 * x[1] * x[2],
        x[2] * x[2],
    ]
}

#[derive(Debug, Clone, Copy, Default)]
struct History {
    input: f64,
    low: f64,
    high: f64,
}

/// A single LR24 crossover point (splits into low and high)
#[derive(Debug, Clone)]
pub struct Crossover {
    low_b: [f64; ORDER + 1],
    high_b: [f64; ORDER + 1],
    a: [f64; ORDER + 1],
    /// Per channel history, mirrored so a window of `ORDER` is contiguous
    history: Vec<[History; ORDER * 2]>,
    pos: usize,
    channels: usize,
    frequency: f64,
}

impl Crossover {
    /// Design a crossover at `frequency` Hz
    pub fn new(frequency: f64, sample_rate: u32, channels: u16) -> EffectResult<Self> {
        let w0 = 2.0 * PI * frequency / sample_rate as f64;
        if w0 > PI {
            return Err(EffectError::InvalidParameter(
                "crossover frequency must not exceed half the sample-rate".into(),
            ));
        }
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * FRAC_1_SQRT_2);
        let norm = 1.0 + alpha;

        let lpf = [(1.0 - cos_w0) / 2.0 / norm, (1.0 - cos_w0) / norm, (1.0 - cos_w0) / 2.0 / norm];
        let hpf = [(1.0 + cos_w0) / 2.0 / norm, -(1.0 + cos_w0) / norm, (1.0 + cos_w0) / 2.0 / norm];
        let den = [1.0, -2.0 * cos_w0 / norm, (1.0 - alpha) / norm];

        let channels = channels.max(1) as usize;
        Ok(Self {
            low_b: square_quadratic(&lpf),
            high_b: square_quadratic(&hpf),
            a: square_quadratic(&den),
            history: vec![[History::default(); ORDER * 2]; channels],
            pos: 0,
            channels,
            frequency,
        })
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Split interleaved `input` into `low` and `high`
    ///
    /// All three buffers hold the same number of whole frames.
    pub fn process(&mut self, input: &[Sample], low: &mut [Sample], high: &mut [Sample]) {
        let frames = input.len() / self.channels;
        for frame in 0..frames {
            self.pos = if self.pos > 0 { self.pos - 1 } else { ORDER - 1 };
            for c in 0..self.channels {
                let idx = frame * self.channels + c;
                let x = input[idx] as f64;
                let hist = &mut self.history[c];

                let mut out_low = self.low_b[0] * x;
                let mut out_high = self.high_b[0] * x;
                for j in 1..=ORDER {
                    let h = hist[self.pos + j];
                    out_low += self.low_b[j] * h.input - self.a[j] * h.low;
                    out_high += self.high_b[j] * h.input - self.a[j] * h.high;
                }
                low[idx] = round_clip(out_low);
                high[idx] = round_clip(out_high);

                let entry = History {
                    input: x,
                    low: out_low,
                    high: out_high,
                };
                hist[self.pos] = entry;
                hist[self.pos + ORDER] = entry;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_sum_to_flat_magnitude() {
        let mut xover = Crossover::new(1000.0, 44100, 1).unwrap();
        let input: Vec<Sample> = (0..8192)
            .map(|i| (8000.0 * (2.0 * PI * 200.0 * i as f64 / 44100.0).sin()) as Sample)
            .collect();
        let mut low = vec![0; input.len()];
        let mut high = vec![0; input.len()];
        xover.process(&input, &mut low, &mut high);

        let rms = |buf: &[Sample]| {
            (buf.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / buf.len() as f64).sqrt()
        };
        let sum: Vec<Sample> = low.iter().zip(&high).map(|(&l, &h)| l.saturating_add(h)).collect();
        let ratio = rms(&sum[4096..]) / rms(&input[4096..]);
        assert!((ratio - 1.0).abs() < 0.02, "ratio {ratio}");
        // 200 Hz sits well inside the low band
        assert!(rms(&low[4096..]) > 10.0 * rms(&high[4096..]));
    }

    #[test]
    fn test_rejects_frequency_above_nyquist() {
        assert!(Crossover::new(30000.0, 44100, 2).is_err());
    }
}
