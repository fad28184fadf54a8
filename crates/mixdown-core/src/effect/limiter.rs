//! Peak limiter: feed-forward gain riding on a smoothed peak envelope
//!
//! # Algorithm
//!
//! 1. Per channel, a peak follower tracks `|x|` with the attack
//!    coefficient when the level rises and the decay coefficient when it
//!    falls.
//! 2. The loudest channel's envelope gives the target gain
//!    `min(1, threshold / peak)`, so channels stay linked.
//! 3. The applied gain moves toward the target with the same attack/decay
//!    pair, then the output gain is applied.
//! 4. With a non-zero delay the gain is applied to audio that lags the
//!    detector, giving the follower time to react before a peak arrives.
//!
//! Coefficients are `1 - exp(-2.2 / rate * 1000 / time_ms)`: the follower
//! reaches 90 % of a step within `time_ms`. A time of 0 reacts instantly.

use std::collections::VecDeque;

use super::params::{split_args, ArgCursor};
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::{EffectError, EffectResult};
use crate::types::{f32_to_s16, s16_to_f32, Sample, MAX_SAMPLE_SIZE};

pub const LIMITER_USAGE: &str =
    "Usage: limiter [threshold-dB [attack-ms [decay-ms [gain-dB [delay-ms]]]]]";

/// Parameters applied when the effect is switched on without explicit ones
pub const LIMITER_PARAMS: &str = "-1.0 1.0 100.0 0.0";

/// 90 % settling constant, `ln(10)`
const SETTLE: f32 = 2.2;

/// Convert a settling time into a one-pole coefficient
pub fn limiter_coefficient(time_ms: f32, sample_rate: u32) -> f32 {
    if time_ms <= 0.0 {
        return 1.0;
    }
    1.0 - (-SETTLE / sample_rate as f32 * 1000.0 / time_ms).exp()
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Limiter
// ═══════════════════════════════════════════════════════════════════════════════

/// Linked multichannel peak limiter working on interleaved `f32` audio
#[derive(Debug, Clone)]
pub struct Limiter {
    sample_rate: u32,
    channels: usize,
    /// Threshold in linear amplitude
    threshold: f32,
    /// Make-up gain in linear amplitude
    output_gain: f32,
    attack: f32,
    decay: f32,
    /// Per-channel peak envelope
    peaks: Vec<f32>,
    /// Smoothed gain (1.0 = unity)
    gain: f32,
    /// Delayed frames, interleaved
    delay: VecDeque<f32>,
    delay_frames: usize,
    frame: Vec<f32>,
}

impl Limiter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let mut limiter = Self {
            sample_rate,
            channels,
            threshold: 1.0,
            output_gain: 1.0,
            attack: 1.0,
            decay: 1.0,
            peaks: vec![0.0; channels],
            gain: 1.0,
            delay: VecDeque::new(),
            delay_frames: 0,
            frame: vec![0.0; channels],
        };
        limiter.set(-0.5, 0.0, 0.0, 0.0);
        limiter
    }

    /// Set threshold, attack, decay and output gain
    pub fn set(&mut self, threshold_db: f32, attack_ms: f32, decay_ms: f32, output_gain_db: f32) {
        self.threshold = db_to_linear(threshold_db);
        self.output_gain = db_to_linear(output_gain_db);
        self.attack = limiter_coefficient(attack_ms, self.sample_rate);
        self.decay = limiter_coefficient(decay_ms, self.sample_rate);
    }

    /// Delay the audio path by `delay_ms` relative to the detector
    pub fn set_delay_ms(&mut self, delay_ms: f32) {
        self.delay_frames = (delay_ms.max(0.0) / 1000.0 * self.sample_rate as f32) as usize;
        self.delay.clear();
    }

    /// Samples currently held in the delay line
    pub fn pending(&self) -> usize {
        self.delay.len()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn track(&mut self) {
        let mut peak = 0.0f32;
        for (env, &x) in self.peaks.iter_mut().zip(&self.frame) {
            let level = x.abs();
            let coeff = if level > *env { self.attack } else { self.decay };
            *env = (1.0 - coeff) * *env + coeff * level;
            peak = peak.max(*env);
        }
        let target = if peak == 0.0 {
            1.0
        } else {
            (self.threshold / peak).min(1.0)
        };
        let coeff = if target < self.gain { self.attack } else { self.decay };
        self.gain = (1.0 - coeff) * self.gain + coeff * target;
    }

    /// Limit `buffer` in place
    ///
    /// Returns the number of samples at the front of `buffer` that hold
    /// output. Without a delay this is always the whole frames of `buffer`;
    /// with one, fewer come out while the delay line fills.
    pub fn process(&mut self, buffer: &mut [f32]) -> usize {
        let ch = self.channels;
        let mut written = 0;
        for start in (0..buffer.len() / ch).map(|f| f * ch) {
            self.frame.copy_from_slice(&buffer[start..start + ch]);
            self.track();
            let scale = self.gain * self.output_gain;

            if self.delay_frames == 0 {
                for (o, &x) in buffer[written..written + ch].iter_mut().zip(&self.frame) {
                    *o = x * scale;
                }
                written += ch;
                continue;
            }
            if self.delay.len() >= self.delay_frames * ch {
                for o in &mut buffer[written..written + ch] {
                    *o = self.delay.pop_front().unwrap_or(0.0) * scale;
                }
                written += ch;
            }
            self.delay.extend(self.frame.iter().copied());
        }
        written
    }

    /// Empty the delay line into `out` at the current gain
    pub fn drain(&mut self, out: &mut [f32]) -> usize {
        let scale = self.gain * self.output_gain;
        let n = out.len().min(self.delay.len());
        for (o, x) in out.iter_mut().zip(self.delay.drain(..n)) {
            *o = x * scale;
        }
        n
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Effect wrapper
// ═══════════════════════════════════════════════════════════════════════════════

/// Streaming `limiter` effect
pub struct LimiterEffect {
    signal: SignalInfo,
    stream: StreamBuffers,
    limiter: Limiter,
    float_buf: Vec<f32>,
}

impl LimiterEffect {
    pub fn new(signal: SignalInfo) -> Self {
        let limiter = build(signal, &split_args(LIMITER_PARAMS))
            .unwrap_or_else(|_| Limiter::new(signal.sample_rate, signal.channels));
        Self {
            signal,
            stream: StreamBuffers::new(),
            limiter,
            float_buf: vec![0.0; MAX_SAMPLE_SIZE],
        }
    }

    fn configure(&mut self, options: &str) -> EffectResult<()> {
        self.limiter = build(self.signal, &split_args(options))?;
        Ok(())
    }

    fn process_pending(&mut self) {
        if !self.stream.effect_on {
            self.stream.pass_through();
            return;
        }
        let limiter = &mut self.limiter;
        let float_buf = &mut self.float_buf;
        self.stream.process_blocks(MAX_SAMPLE_SIZE, |input, output| {
            for (f, &s) in float_buf.iter_mut().zip(input) {
                *f = s16_to_f32(s);
            }
            let n = limiter.process(&mut float_buf[..input.len()]);
            for (o, &f) in output.iter_mut().zip(&float_buf[..n]) {
                *o = f32_to_s16(f);
            }
            n
        });
    }
}

/// Parse `threshold attack decay gain delay` into a limiter
fn build(signal: SignalInfo, args: &[&str]) -> EffectResult<Limiter> {
    let mut cursor = ArgCursor::new("limiter", LIMITER_USAGE, args);
    let threshold = cursor.numeric("threshold", -60.0, 0.0)?.unwrap_or(-1.0);
    let attack = cursor.numeric("attack", 0.0, 1000.0)?.unwrap_or(1.0);
    let decay = cursor.numeric("decay", 0.0, 10000.0)?.unwrap_or(100.0);
    let gain = cursor.numeric("gain", -30.0, 30.0)?.unwrap_or(0.0);
    let delay = cursor.numeric("delay", 0.0, 100.0)?.unwrap_or(0.0);
    if !cursor.remaining().is_empty() {
        return Err(EffectError::usage(
            "limiter",
            LIMITER_USAGE,
            format!("unexpected argument `{}'", cursor.remaining()[0]),
        ));
    }
    let mut limiter = Limiter::new(signal.sample_rate, signal.channels);
    limiter.set(threshold as f32, attack as f32, decay as f32, gain as f32);
    limiter.set_delay_ms(delay as f32);
    Ok(limiter)
}

impl Effect for LimiterEffect {
    fn name(&self) -> &'static str {
        "limiter"
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        self.stream = StreamBuffers::new();
        if !args.is_empty() {
            self.limiter = build(self.signal, args)?;
            self.stream.effect_on = true;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        if key.eq_ignore_ascii_case("switch") {
            log::info!("limiter: switch = {}", value);
            self.stream.effect_on = value.eq_ignore_ascii_case("On");
            return Ok(());
        }
        let result = if key.eq_ignore_ascii_case("limiter") {
            self.configure(value)
        } else if key.eq_ignore_ascii_case("mode") {
            log::info!("limiter: mode = {}", value);
            if value.eq_ignore_ascii_case("None") {
                Err(EffectError::InvalidParameter("mode None".into()))
            } else {
                self.configure(LIMITER_PARAMS)
            }
        } else {
            return Ok(());
        };
        self.stream.effect_on = result.is_ok();
        result
    }

    fn send(&mut self, samples: &[Sample]) -> EffectResult<usize> {
        self.stream.send(samples)
    }

    fn receive(&mut self, out: &mut [Sample], mode: ReadMode) -> EffectResult<usize> {
        self.process_pending();
        Ok(self.stream.read_output(out, mode))
    }

    fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        self.process_pending();
        if self.stream.effect_on {
            while self.limiter.pending() > 0 {
                let n = self.limiter.drain(&mut self.float_buf);
                let block: Vec<Sample> = self.float_buf[..n].iter().map(|&f| f32_to_s16(f)).collect();
                self.stream.fifo_out.write(&block);
            }
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

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficient_formula() {
        let c = limiter_coefficient(10.0, 44100);
        let expected = 1.0 - (-2.2f32 / 44100.0 * 1000.0 / 10.0).exp();
        assert!((c - expected).abs() < 1e-7);
        assert_eq!(limiter_coefficient(0.0, 44100), 1.0);
    }

    #[test]
    fn test_instant_limiter_clamps_to_threshold() {
        let mut limiter = Limiter::new(44100, 2);
        limiter.set(-6.0, 0.0, 0.0, 0.0);
        let threshold = db_to_linear(-6.0);
        let mut buf = vec![0.9f32, -0.9, 0.2, 0.1];
        assert_eq!(limiter.process(&mut buf), 4);
        assert!((buf[0] - threshold).abs() < 1e-5);
        assert!((buf[1] + threshold).abs() < 1e-5);
        // Quiet frame returns to unity immediately
        assert!((buf[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_is_transparent() {
        let mut limiter = Limiter::new(48000, 1);
        limiter.set(-1.0, 1.0, 100.0, 0.0);
        let mut buf = vec![0.25f32; 256];
        limiter.process(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_hot_signal_is_reduced() {
        let mut limiter = Limiter::new(48000, 2);
        limiter.set(-6.0, 1.0, 100.0, 0.0);
        let threshold = db_to_linear(-6.0);
        let mut buf = vec![0.9f32; 48000];
        limiter.process(&mut buf);
        for &s in &buf[40000..] {
            assert!(s <= threshold * 1.05, "{s} exceeds {threshold}");
        }
    }

    #[test]
    fn test_delay_line_preserves_length() {
        let mut limiter = Limiter::new(1000, 1);
        limiter.set(0.0, 0.0, 0.0, 0.0);
        limiter.set_delay_ms(10.0);
        let mut buf: Vec<f32> = (0..30).map(|i| i as f32 / 100.0).collect();
        let written = limiter.process(&mut buf);
        assert_eq!(written, 20);
        assert!((buf[0] - 0.0).abs() < 1e-6);
        assert!((buf[19] - 0.19).abs() < 1e-6);
        let mut tail = vec![0.0; 32];
        assert_eq!(limiter.drain(&mut tail), 10);
        assert!((tail[9] - 0.29).abs() < 1e-6);
    }

    #[test]
    fn test_switch_toggles_effect() {
        let mut effect = LimiterEffect::new(SignalInfo::new(44100, 1));
        effect.init(&[]).unwrap();
        assert!(!effect.is_on());
        effect.set("Switch", "On").unwrap();
        assert!(effect.is_on());

        let input = vec![32000 as Sample; 4096];
        effect.send(&input).unwrap();
        let mut out = vec![0; 4096];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 4096);
        assert!(out[4000] < 31000);

        effect.set("Switch", "Off").unwrap();
        assert!(!effect.is_on());
    }

    #[test]
    fn test_bad_arguments_switch_off() {
        let mut effect = LimiterEffect::new(SignalInfo::new(44100, 1));
        assert!(effect.set("limiter", "5.0").is_err());
        assert!(!effect.is_on());
        assert!(effect.set("limiter", "-3 1 50 0 0").is_ok());
        assert!(effect.is_on());
    }
}
