//! Spectral noise suppression
//!
//! Frames of 512 samples are windowed over a 1024-sample span (50%
//! overlap), transformed, attenuated per bin by a decision-directed SNR
//! gain, transformed back and overlap-added. The first synthesized frame
//! is pre-roll and is dropped, so output stays aligned with input;
//! `flush` pads the tail so the output length equals the input length.
//!
//! The noise estimate is seeded from the first frame and only adapts while
//! a bin looks like noise, so material present from the very first frame
//! and never pausing (a steady tone) is treated as noise.
//!
//! Runtime options (`set`):
//!
//! | key                       | meaning                                  |
//! |---------------------------|------------------------------------------|
//! | `Switch`                  | `On` / `Off`                             |
//! | `all_band_gain_threshold` | gain floor                               |
//! | `low_gain` `mid_gain` `high_gain` | per band gain ceilings           |
//! | `low2mid_in_Hz` `mid2high_in_Hz`  | band edges                       |
//! | `is_enhance_mid_freq` `mid_freq_gain` | extra attenuation of bins 17..35 |

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::noise_estimation::{NoiseEstimator, NUM_BINS};
use super::params::parse_f64_prefix;
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::EffectResult;
use crate::types::{f32_to_s16, Sample};

const FFT_LEN: usize = 1024;
const FRAME_LEN: usize = 512;

/// Sample rate the band edges in Hz are referenced to
const REFERENCE_RATE: i64 = 44100;

/// Prior SNR weight of the a posteriori term
const THETA: f32 = 3.162;

const MIN_FLT: f32 = 1.175494e-30;

const MAX_15BIT: f32 = 32767.0;

/// Inverse transform normalization
const INV_FFT_LEN: f32 = 1.0 / FFT_LEN as f32;

/// Synthesis gain while no voice activity detection runs
const VAD_FLOOR: f32 = 1.0;

/// `atoi` semantics
fn lenient_int(text: &str) -> i64 {
    parse_f64_prefix(text.trim()).map(|(v, _)| v as i64).unwrap_or(0)
}

/// `atof` semantics
fn lenient_float(text: &str) -> f32 {
    parse_f64_prefix(text.trim()).map(|(v, _)| v as f32).unwrap_or(0.0)
}

/// Gain limits, adjustable at run time
#[derive(Debug, Clone, PartialEq)]
pub struct SuppressionSettings {
    pub gain_floor: f32,
    pub low_gain: f32,
    pub mid_gain: f32,
    pub high_gain: f32,
    pub mid_freq_gain: f32,
    pub low_to_mid_bin: usize,
    pub mid_to_high_bin: usize,
    pub enhance_mid_freq: bool,
}

impl Default for SuppressionSettings {
    fn default() -> Self {
        Self {
            gain_floor: 0.25,
            low_gain: 1.0,
            mid_gain: 0.75,
            high_gain: 0.4,
            mid_freq_gain: 0.5,
            low_to_mid_bin: 50,
            mid_to_high_bin: 250,
            enhance_mid_freq: false,
        }
    }
}

fn hz_to_bin(text: &str) -> usize {
    (lenient_int(text) * NUM_BINS as i64 / REFERENCE_RATE).clamp(0, NUM_BINS as i64) as usize
}

/// Periodic Hamming window, normalized so that applying it on both the
/// analysis and the synthesis side overlap-adds to unity at 50% overlap
///
/// Two halves of a periodic Hamming window sum to 1.08, so each side takes
/// the square root of `h / 1.08`.
fn hamming_window() -> Vec<f32> {
    (0..FFT_LEN)
        .map(|i| {
            let h = 0.54 - 0.46 * (2.0 * PI * i as f32 / FFT_LEN as f32).cos();
            (h / 1.08).sqrt()
        })
        .collect()
}

/// Analysis side: the window with the 15-bit sample scale folded in
fn analysis_window(window: &[f32]) -> Vec<f32> {
    window.iter().map(|&w| w / MAX_15BIT).collect()
}

/// Frame based suppressor
pub struct NoiseSuppressor {
    settings: SuppressionSettings,
    estimator: NoiseEstimator,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    /// Synthesis window
    window: Vec<f32>,
    /// Analysis window, scaled to 1/32767
    analysis: Vec<f32>,
    raw_pcm: Vec<Sample>,
    time: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    power: Vec<f32>,
    sig_prev: Vec<f32>,
    gain: Vec<f32>,
    last_half: Vec<f32>,
}

impl NoiseSuppressor {
    pub fn new(settings: SuppressionSettings) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_LEN);
        let inverse = planner.plan_fft_inverse(FFT_LEN);
        let spectrum = forward.make_output_vec();
        let window = hamming_window();
        let analysis = analysis_window(&window);
        Self {
            settings,
            estimator: NoiseEstimator::new(),
            forward,
            inverse,
            window,
            analysis,
            raw_pcm: vec![0; FFT_LEN],
            time: vec![0.0; FFT_LEN],
            spectrum,
            power: vec![0.0; NUM_BINS],
            sig_prev: vec![0.0; NUM_BINS],
            gain: vec![0.0; NUM_BINS],
            last_half: vec![0.0; FRAME_LEN],
        }
    }

    pub fn settings_mut(&mut self) -> &mut SuppressionSettings {
        &mut self.settings
    }

    fn compute_gain(&mut self) {
        let noise = self.estimator.noise_ps();
        let s = &self.settings;
        for i in 0..NUM_BINS {
            let excess = (self.power[i] - noise[i]).max(0.0);
            let num = 0.97 * self.sig_prev[i] + (0.03 * excess + MIN_FLT);
            let ratio = num / (THETA * noise[i] + num);
            self.sig_prev[i] = ratio * self.power[i];
            self.gain[i] = s.gain_floor.max(ratio.sqrt());
        }
        let low_end = s.low_to_mid_bin.min(NUM_BINS);
        let mid_end = s.mid_to_high_bin.min(NUM_BINS);
        for g in &mut self.gain[..low_end] {
            *g = g.min(s.low_gain);
        }
        if low_end < mid_end {
            for g in &mut self.gain[low_end..mid_end] {
                *g = g.min(s.mid_gain);
            }
        }
        for g in &mut self.gain[mid_end.max(low_end)..] {
            *g = g.min(s.high_gain);
        }
        if s.enhance_mid_freq {
            for g in &mut self.gain[17..35] {
                *g *= s.mid_freq_gain;
            }
        }
    }

    fn synthesis_window(&mut self, gain: f32) {
        for (t, &w) in self.time.iter_mut().zip(&self.window) {
            *t *= gain * w;
        }
    }

    /// Consume one frame of new input and produce one frame of output
    pub fn process_frame(&mut self, frame: &[Sample], out: &mut [Sample]) {
        self.raw_pcm.copy_within(FRAME_LEN.., 0);
        self.raw_pcm[FRAME_LEN..].copy_from_slice(&frame[..FRAME_LEN]);

        for ((t, &s), &w) in self.time.iter_mut().zip(&self.raw_pcm).zip(&self.analysis) {
            *t = s as f32 * w;
        }
        if self.forward.process(&mut self.time, &mut self.spectrum).is_err() {
            log::error!("noise_suppression: forward FFT failed");
            out[..FRAME_LEN].fill(0);
            return;
        }
        for (p, c) in self.power.iter_mut().zip(&self.spectrum) {
            *p = c.norm_sqr();
        }

        self.estimator.update(&self.power);
        self.compute_gain();

        // The two lowest bins are removed entirely
        self.spectrum[0] = Complex::new(0.0, 0.0);
        self.spectrum[1] = Complex::new(0.0, 0.0);
        for (c, &g) in self.spectrum.iter_mut().zip(&self.gain).skip(2) {
            *c *= g;
        }
        // The inverse transform requires a real Nyquist bin
        self.spectrum[NUM_BINS - 1].im = 0.0;

        if self.inverse.process(&mut self.spectrum, &mut self.time).is_err() {
            log::error!("noise_suppression: inverse FFT failed");
            out[..FRAME_LEN].fill(0);
            return;
        }
        self.synthesis_window(INV_FFT_LEN * VAD_FLOOR);

        for i in 0..FRAME_LEN {
            out[i] = f32_to_s16(self.last_half[i] + self.time[i]);
            self.last_half[i] = self.time[FRAME_LEN + i];
        }
    }
}

/// Streaming `noise_suppression` effect
pub struct NoiseSuppressionEffect {
    stream: StreamBuffers,
    suppressor: NoiseSuppressor,
    /// Samples accepted while suppression was on
    received: usize,
    /// Samples emitted while suppression was on
    emitted: usize,
    primed: bool,
}

impl NoiseSuppressionEffect {
    pub fn new(_signal: SignalInfo) -> Self {
        Self {
            stream: StreamBuffers::new(),
            suppressor: NoiseSuppressor::new(SuppressionSettings::default()),
            received: 0,
            emitted: 0,
            primed: false,
        }
    }

    /// Run one frame, writing at most `limit` output samples
    fn step(&mut self, frame: &[Sample], limit: usize) {
        let mut out = [0 as Sample; FRAME_LEN];
        self.suppressor.process_frame(frame, &mut out);
        if !self.primed {
            self.primed = true;
            return;
        }
        let n = limit.min(FRAME_LEN);
        self.stream.fifo_out.write(&out[..n]);
        self.emitted += n;
    }

    fn run_frames(&mut self) {
        let mut frame = [0 as Sample; FRAME_LEN];
        while self.stream.fifo_in.len() >= FRAME_LEN {
            self.stream.fifo_in.read(&mut frame);
            self.step(&frame, FRAME_LEN);
        }
    }
}

impl Effect for NoiseSuppressionEffect {
    fn name(&self) -> &'static str {
        "noise_suppression"
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        log::info!("noise_suppression: init {:?}", args);
        self.stream = StreamBuffers::new();
        self.suppressor = NoiseSuppressor::new(SuppressionSettings::default());
        self.received = 0;
        self.emitted = 0;
        self.primed = false;
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        let s = self.suppressor.settings_mut();
        match key.to_ascii_lowercase().as_str() {
            "low2mid_in_hz" => s.low_to_mid_bin = hz_to_bin(value),
            "mid2high_in_hz" => s.mid_to_high_bin = hz_to_bin(value),
            "all_band_gain_threshold" => s.gain_floor = lenient_float(value),
            "low_gain" => s.low_gain = lenient_float(value),
            "mid_gain" => s.mid_gain = lenient_float(value),
            "high_gain" => s.high_gain = lenient_float(value),
            "mid_freq_gain" => s.mid_freq_gain = lenient_float(value),
            "is_enhance_mid_freq" => s.enhance_mid_freq = lenient_int(value) != 0,
            "switch" => {
                if value.eq_ignore_ascii_case("Off") {
                    self.stream.effect_on = false;
                } else if value.eq_ignore_ascii_case("On") {
                    self.stream.effect_on = true;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn send(&mut self, samples: &[Sample]) -> EffectResult<usize> {
        let n = self.stream.send(samples)?;
        if self.stream.effect_on {
            self.received += n;
        }
        Ok(n)
    }

    fn receive(&mut self, out: &mut [Sample], mode: ReadMode) -> EffectResult<usize> {
        if self.stream.effect_on {
            self.run_frames();
        } else {
            self.stream.pass_through();
        }
        Ok(self.stream.read_output(out, mode))
    }

    fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        if self.stream.effect_on {
            self.run_frames();
            // Pad with silence until every accepted sample has come out
            let mut frame = [0 as Sample; FRAME_LEN];
            while self.emitted < self.received {
                let n = self.stream.fifo_in.read(&mut frame);
                frame[n..].fill(0);
                self.step(&frame, self.received - self.emitted);
            }
        } else {
            self.stream.pass_through();
        }
        Ok(self.stream.fifo_out.read(out))
    }

    fn close(&mut self) {
        self.stream.clear();
    }

    fn is_on(&self) -> bool {
        self.stream.effect_on
    }
}
