//! Reverb effect
//!
//! Freeverb topology per input channel: eight damped comb filters in
//! parallel followed by four allpass diffusers in series. Stereo input runs
//! two filter banks per channel (offset by the stereo depth) and
//! cross-mixes the wet signals.
//!
//! Options: `[-w|--wet-only] [reverberance (50%) [HF-damping (50%)
//! [room-scale (100%) [stereo-depth (100%) [pre-delay (0ms) [wet-gain (0dB)]]]]]]`

use std::collections::VecDeque;

use super::params::{split_args, ArgCursor};
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::{EffectError, EffectResult};
use crate::types::{f32_to_s16, s16_to_f32, Sample};

pub const REVERB_USAGE: &str = "[-w|--wet-only] [reverberance (50%) [HF-damping (50%) [room-scale (100%) \
[stereo-depth (100%) [pre-delay (0ms) [wet-gain (0dB)]]]]]]";

/// Parameters applied by the `mode` option
pub const REVERB_PARAMS: &str = "1.5 50.0 100.0 50.0 0.0 -6.0";

/// Samples handed to the filter banks per call
const BLOCK_SIZE: usize = 2048;

/// Comb filter delay line lengths (in samples at 44.1kHz)
const COMB_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delay line lengths
const ALLPASS_LENGTHS: [usize; 4] = [225, 341, 441, 556];

/// Length difference between the two banks of a stereo pair
const STEREO_ADJUST: f64 = 12.0;

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Comb filter for reverb
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl CombFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, hf_damping: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.store = output + (self.store - output) * hf_damping;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Allpass filter for diffusion
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.buffer[self.pos] = input + output * 0.5;
        self.pos = (self.pos + 1) % self.buffer.len();
        output - input
    }
}

/// Eight combs and four allpasses for one wet output
struct FilterBank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl FilterBank {
    fn new(sample_rate: f64, scale: f64, mut offset: f64) -> Self {
        let r = sample_rate / 44100.0;
        let mut combs = Vec::with_capacity(COMB_LENGTHS.len());
        for &len in &COMB_LENGTHS {
            combs.push(CombFilter::new((scale * r * (len as f64 + STEREO_ADJUST * offset) + 0.5) as usize));
            offset = -offset;
        }
        let mut allpasses = Vec::with_capacity(ALLPASS_LENGTHS.len());
        for &len in &ALLPASS_LENGTHS {
            allpasses.push(AllpassFilter::new((r * (len as f64 + STEREO_ADJUST * offset) + 0.5) as usize));
            offset = -offset;
        }
        Self { combs, allpasses }
    }

    fn process(&mut self, input: &[f32], output: &mut [f32], feedback: f32, hf_damping: f32, gain: f32) {
        for (o, &x) in output.iter_mut().zip(input) {
            let mut out = 0.0;
            for comb in self.combs.iter_mut().rev() {
                out += comb.process(x, feedback, hf_damping);
            }
            for allpass in self.allpasses.iter_mut().rev() {
                out = allpass.process(out);
            }
            *o = out * gain;
        }
    }
}

/// Reverberator for one input channel
struct ChannelReverb {
    feedback: f32,
    hf_damping: f32,
    gain: f32,
    /// Dry input, prefixed with the pre-delay
    input: VecDeque<f32>,
    banks: Vec<FilterBank>,
    wet: [Vec<f32>; 2],
}

impl ChannelReverb {
    /// `wet_channels` is 2 when the stream is stereo, so both cross-mixed
    /// outputs exist even with a stereo depth of 0
    fn new(sample_rate: f64, opts: &ReverbOptions, wet_channels: usize) -> Self {
        let delay = (opts.pre_delay_ms / 1000.0 * sample_rate + 0.5) as usize;
        let scale = opts.room_scale / 100.0 * 0.9 + 0.1;
        let depth = opts.stereo_depth / 100.0;
        let a = -1.0 / (1.0f64 - 0.3).ln();
        let b = 100.0 / ((1.0f64 - 0.98).ln() * a + 1.0);

        let banks = (0..wet_channels.clamp(1, 2))
            .map(|i| FilterBank::new(sample_rate, scale, i as f64 * depth))
            .collect();

        Self {
            feedback: (1.0 - ((opts.reverberance - b) / (a * b)).exp()) as f32,
            hf_damping: (opts.hf_damping / 100.0 * 0.3 + 0.2) as f32,
            gain: (db_to_linear(opts.wet_gain_db) * 0.015) as f32,
            input: std::iter::repeat(0.0).take(delay).collect(),
            banks,
            wet: [Vec::new(), Vec::new()],
        }
    }

    /// Run `len` delayed input samples through every bank
    fn process(&mut self, len: usize) {
        let delayed: Vec<f32> = self.input.drain(..len).collect();
        for (bank, wet) in self.banks.iter_mut().zip(self.wet.iter_mut()) {
            wet.resize(len, 0.0);
            bank.process(&delayed, wet, self.feedback, self.hf_damping, self.gain);
        }
    }
}

/// Parsed reverb options
#[derive(Debug, Clone, PartialEq)]
pub struct ReverbOptions {
    pub wet_only: bool,
    pub reverberance: f64,
    pub hf_damping: f64,
    pub room_scale: f64,
    pub stereo_depth: f64,
    pub pre_delay_ms: f64,
    pub wet_gain_db: f64,
}

impl Default for ReverbOptions {
    fn default() -> Self {
        Self {
            wet_only: false,
            reverberance: 50.0,
            hf_damping: 50.0,
            room_scale: 100.0,
            stereo_depth: 100.0,
            pre_delay_ms: 0.0,
            wet_gain_db: 0.0,
        }
    }
}

impl ReverbOptions {
    pub fn parse(args: &[&str]) -> EffectResult<Self> {
        let mut opts = Self::default();
        let mut cursor = ArgCursor::new("reverb", REVERB_USAGE, args);
        opts.wet_only = cursor.flag(&["-w", "--wet-only"]);

        let fields: [(&str, f64, f64, &mut f64); 6] = [
            ("reverberance", 0.0, 100.0, &mut opts.reverberance),
            ("hf_damping", 0.0, 100.0, &mut opts.hf_damping),
            ("room_scale", 0.0, 100.0, &mut opts.room_scale),
            ("stereo_depth", 0.0, 100.0, &mut opts.stereo_depth),
            ("pre_delay_ms", 0.0, 500.0, &mut opts.pre_delay_ms),
            ("wet_gain_dB", -10.0, 10.0, &mut opts.wet_gain_db),
        ];
        for (name, min, max, slot) in fields {
            match cursor.numeric(name, min, max)? {
                Some(value) => *slot = value,
                None => break,
            }
        }
        if !cursor.remaining().is_empty() {
            return Err(EffectError::usage("reverb", REVERB_USAGE, "unexpected extra arguments"));
        }
        Ok(opts)
    }
}

/// Reverb DSP for all channels of a stream
pub struct Reverb {
    wet_only: bool,
    channels: usize,
    reverbs: Vec<ChannelReverb>,
}

impl Reverb {
    pub fn new(mut opts: ReverbOptions, signal: SignalInfo) -> Self {
        let channels = signal.channels.max(1) as usize;
        if channels != 2 && opts.stereo_depth != 0.0 {
            log::warn!("reverb: stereo-depth not applicable with {} channel(s)", channels);
            opts.stereo_depth = 0.0;
        }
        let reverbs = (0..channels.min(2))
            .map(|_| ChannelReverb::new(signal.sample_rate as f64, &opts, channels))
            .collect();
        Self {
            wet_only: opts.wet_only,
            channels,
            reverbs,
        }
    }

    /// Process interleaved float frames; returns the samples written
    pub fn flow(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let frames = input.len().min(output.len()) / self.channels;
        let dry_gain = if self.wet_only { 0.0 } else { 1.0 };

        if self.channels > 2 {
            // No reverberator layout for surround input
            output[..frames * self.channels].copy_from_slice(&input[..frames * self.channels]);
            return frames * self.channels;
        }

        for (c, reverb) in self.reverbs.iter_mut().enumerate() {
            reverb
                .input
                .extend((0..frames).map(|i| input[i * self.channels + c].clamp(-1.0, 1.0)));
        }
        let dry: Vec<Vec<f32>> = self
            .reverbs
            .iter()
            .map(|r| {
                let start = r.input.len() - frames;
                r.input.range(start..).copied().collect()
            })
            .collect();
        for reverb in &mut self.reverbs {
            reverb.process(frames);
        }

        let mut k = 0;
        if self.channels == 2 {
            for i in 0..frames {
                for w in 0..2 {
                    let wet = 0.5 * (self.reverbs[0].wet[w][i] + self.reverbs[1].wet[w][i]);
                    output[k] = (dry_gain * dry[w][i] + wet).clamp(-1.0, 1.0);
                    k += 1;
                }
            }
        } else {
            for i in 0..frames {
                output[k] = (dry_gain * dry[0][i] + self.reverbs[0].wet[0][i]).clamp(-1.0, 1.0);
                k += 1;
            }
        }
        k
    }
}

/// Streaming `reverb` effect
pub struct ReverbEffect {
    signal: SignalInfo,
    stream: StreamBuffers,
    reverb: Option<Reverb>,
    float_in: Vec<f32>,
    float_out: Vec<f32>,
}

impl ReverbEffect {
    pub fn new(signal: SignalInfo) -> Self {
        Self {
            signal,
            stream: StreamBuffers::new(),
            reverb: None,
            float_in: vec![0.0; BLOCK_SIZE],
            float_out: vec![0.0; BLOCK_SIZE],
        }
    }

    fn configure(&mut self, args: &[&str]) -> EffectResult<()> {
        let opts = ReverbOptions::parse(args)?;
        self.reverb = Some(Reverb::new(opts, self.signal));
        Ok(())
    }
}

impl Effect for ReverbEffect {
    fn name(&self) -> &'static str {
        "reverb"
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        self.stream = StreamBuffers::new();
        if !args.is_empty() {
            self.configure(args)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        let result = if key.eq_ignore_ascii_case("reverb") {
            self.configure(&split_args(value))
        } else if key.eq_ignore_ascii_case("mode") {
            log::info!("reverb: mode = {}", value);
            if value.eq_ignore_ascii_case("None") {
                Err(EffectError::InvalidParameter("mode None".into()))
            } else {
                self.configure(&split_args(REVERB_PARAMS))
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
        match (self.stream.effect_on, self.reverb.as_mut()) {
            (true, Some(reverb)) => {
                let float_in = &mut self.float_in;
                let float_out = &mut self.float_out;
                self.stream.process_blocks(BLOCK_SIZE, |input, output| {
                    for (f, &s) in float_in.iter_mut().zip(input) {
                        *f = s16_to_f32(s);
                    }
                    let n = reverb.flow(&float_in[..input.len()], &mut float_out[..input.len()]);
                    for (o, &f) in output.iter_mut().zip(&float_out[..n]) {
                        *o = f32_to_s16(f);
                    }
                    n
                });
            }
            _ => self.stream.pass_through(),
        }
        Ok(self.stream.read_output(out, mode))
    }

    fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        Ok(self.stream.fifo_out.read(out))
    }

    fn close(&mut self) {
        self.stream.clear();
        self.reverb = None;
    }

    fn is_on(&self) -> bool {
        self.stream.effect_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_parsing() {
        let opts = ReverbOptions::parse(&["-w", "40", "60"]).unwrap();
        assert!(opts.wet_only);
        assert_eq!(opts.reverberance, 40.0);
        assert_eq!(opts.hf_damping, 60.0);
        assert_eq!(opts.room_scale, 100.0);

        assert!(ReverbOptions::parse(&["150"]).is_err());
        assert!(ReverbOptions::parse(&["50", "50", "100", "50", "0", "20"]).is_err());
        assert!(ReverbOptions::parse(&["50", "junk"]).is_err());
    }

    #[test]
    fn test_feedback_bounds() {
        // 0% and 100% reverberance map onto the 0.3 / 0.98 feedback range
        let low = ChannelReverb::new(44100.0, &ReverbOptions { reverberance: 0.0, ..Default::default() }, 1);
        let high = ChannelReverb::new(44100.0, &ReverbOptions { reverberance: 100.0, ..Default::default() }, 1);
        assert!((low.feedback - 0.3).abs() < 1e-6);
        assert!((high.feedback - 0.98).abs() < 1e-6);
    }

    #[test]
    fn test_impulse_produces_tail() {
        let mut reverb = Reverb::new(ReverbOptions { stereo_depth: 0.0, ..Default::default() }, SignalInfo::new(44100, 1));
        let mut input = vec![0.0f32; 8192];
        input[0] = 0.9;
        let mut output = vec![0.0f32; 8192];
        let mut written = 0;
        for (i, o) in input.chunks(2048).zip(output.chunks_mut(2048)) {
            written += reverb.flow(i, o);
        }
        assert_eq!(written, 8192);
        assert!((output[0] - 0.9).abs() < 1e-6);
        assert!(output[2000..].iter().any(|s| s.abs() > 1e-4));
    }

    #[test]
    fn test_pre_delay_holds_wet_signal() {
        let opts = ReverbOptions {
            wet_only: true,
            stereo_depth: 0.0,
            pre_delay_ms: 100.0,
            ..Default::default()
        };
        let mut reverb = Reverb::new(opts, SignalInfo::new(1000, 1));
        let mut input = vec![0.0f32; 400];
        input[0] = 1.0;
        let mut output = vec![0.0f32; 400];
        reverb.flow(&input, &mut output);
        // Shortest comb is ~25 samples at 1 kHz, plus 100 samples pre-delay
        assert!(output[..100].iter().all(|&s| s == 0.0));
        assert!(output[100..].iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_mode_on_stereo_stream() {
        let mut effect = ReverbEffect::new(SignalInfo::new(44100, 2));
        effect.init(&[]).unwrap();
        effect.set("mode", "Studio").unwrap();
        effect.send(&vec![500; 4096]).unwrap();
        let mut out = vec![0; 4096];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 4096);
    }

    #[test]
    fn test_stereo_without_depth() {
        let mut effect = ReverbEffect::new(SignalInfo::new(44100, 2));
        effect.init(&[]).unwrap();
        effect.set("reverb", "50 50 100 0").unwrap();
        effect.send(&vec![1000; 4096]).unwrap();
        let mut out = vec![0; 4096];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 4096);
        // Both banks are identical, so a centred input stays centred
        assert!(out.chunks_exact(2).all(|frame| frame[0] == frame[1]));
    }
}
