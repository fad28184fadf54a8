//! Compressor / expander
//!
//! ```text
//! input ──┬── envelope follower ── transfer curve ──┐
//!         │                                         × ── output
//!         └── delay line ───────────────────────────┘
//! ```
//!
//! Options: `attack1,decay1[,attack2,decay2...]
//! [soft-knee-dB:]in-dB1[,out-dB1],in-dB2,out-dB2... [gain [initial-volume-dB [delay]]]`.
//! One attack/decay pair links all channels; one pair per channel follows
//! each channel separately.

use super::params::{parse_f64_exact, split_args};
use super::transfer::TransferFunction;
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::{EffectError, EffectResult};
use crate::types::{Sample, MAX_SAMPLE_SIZE, SAMPLE_MAX, SAMPLE_MIN};

pub const COMPAND_USAGE: &str = "attack1,decay1{,attack2,decay2} [soft-knee-dB:]in-dB1[,out-dB1]{,in-dB2,out-dB2} \
[gain [initial-volume-dB [delay]]]\n\twhere {} means optional and repeatable and [] means optional.\n\
\tdB values are floating point or -inf'; times are in seconds.";

/// Parameters applied by the `mode` option
pub const COMPAND_PARAMS: &str = "0.3,1 6:-70,-60,-20 -5 -90 0.2";

/// One-pole smoothing coefficient for a time constant in seconds
///
/// Times at or below one sample period respond instantly.
pub fn time_coefficient(seconds: f64, sample_rate: u32) -> f64 {
    let rate = sample_rate as f64;
    if seconds > 1.0 / rate {
        1.0 - (-1.0 / (rate * seconds)).exp()
    } else {
        1.0
    }
}

/// Leaky-pump level update shared by the companders
#[inline]
pub(crate) fn follow_level(volume: &mut f64, rectified: f64, attack: f64, decay: f64) {
    let level = rectified / -(SAMPLE_MIN as f64);
    let delta = level - *volume;
    if delta > 0.0 {
        *volume += delta * attack;
    } else {
        *volume += delta * decay;
    }
}

/// Clip to the sample range, truncating toward zero
#[inline]
pub(crate) fn clip_truncate(value: f64) -> Sample {
    if value > SAMPLE_MAX as f64 {
        i16::MAX
    } else if value < SAMPLE_MIN as f64 {
        i16::MIN
    } else {
        value as Sample
    }
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    attack: f64,
    decay: f64,
    volume: f64,
}

/// Compander DSP state
#[derive(Debug, Clone)]
pub struct Compander {
    transfer: TransferFunction,
    channels: Vec<ChannelState>,
    file_channels: usize,
    delay_buf: Vec<Sample>,
    delay_index: usize,
    delay_count: usize,
    delay_full: bool,
}

impl Compander {
    /// Parse positional arguments and prepare for `signal`
    pub fn new(args: &[&str], signal: SignalInfo) -> EffectResult<Self> {
        let fail = |msg: &str| EffectError::usage("compand", COMPAND_USAGE, msg.to_string());
        if args.len() < 2 || args.len() > 5 {
            return Err(fail("wrong number of arguments"));
        }

        let commas = args[0].matches(',').count();
        if commas % 2 == 0 {
            return Err(fail("there must be an even number of attack/decay parameters"));
        }
        let pairs = 1 + commas / 2;
        let mut times = args[0].split(',').filter(|t| !t.is_empty());
        let mut channels = Vec::with_capacity(pairs);
        for _ in 0..pairs {
            let mut pair = [0.0; 2];
            for value in pair.iter_mut() {
                *value = times
                    .next()
                    .and_then(parse_f64_exact)
                    .ok_or_else(|| fail("syntax error trying to read attack/decay time"))?;
                if *value < 0.0 {
                    return Err(fail("attack & decay times can't be less than 0 seconds"));
                }
            }
            channels.push(ChannelState {
                attack: time_coefficient(pair[0], signal.sample_rate),
                decay: time_coefficient(pair[1], signal.sample_rate),
                volume: 0.0,
            });
        }

        let transfer = TransferFunction::parse(args[1], args.get(2).copied()).map_err(|e| fail(&e))?;

        let init_db = match args.get(3) {
            Some(text) => parse_f64_exact(text).ok_or_else(|| fail("syntax error trying to read initial volume"))?,
            None => 0.0,
        };
        if init_db > 0.0 {
            return Err(fail("initial volume is relative to maximum volume so can't exceed 0dB"));
        }
        for channel in &mut channels {
            channel.volume = 10f64.powf(init_db / 20.0);
        }

        let delay = match args.get(4) {
            Some(text) => parse_f64_exact(text).ok_or_else(|| fail("syntax error trying to read delay value"))?,
            None => 0.0,
        };
        if delay < 0.0 {
            return Err(fail("delay can't be less than 0 seconds"));
        }

        let file_channels = signal.channels.max(1) as usize;
        let delay_len = (delay * signal.sample_rate as f64 * file_channels as f64) as usize;
        log::debug!(
            "compand: {} envelope(s) for {} channel(s), delay {} samples",
            pairs,
            file_channels,
            delay_len
        );

        Ok(Self {
            transfer,
            channels,
            file_channels,
            delay_buf: vec![0; delay_len],
            delay_index: 0,
            delay_count: 0,
            delay_full: false,
        })
    }

    fn linked(&self) -> bool {
        self.channels.len() == 1
    }

    fn channel_gain(&self, chan: usize) -> f64 {
        let ch = if self.linked() { 0 } else { chan.min(self.channels.len() - 1) };
        self.transfer.gain(self.channels[ch].volume)
    }

    /// Process interleaved frames, returns the number of output samples
    ///
    /// With a delay line the first `delay` worth of input produces no output.
    pub fn flow(&mut self, input: &[Sample], output: &mut [Sample]) -> usize {
        let mut produced = 0;
        for frame in input.chunks(self.file_channels) {
            if self.linked() && self.file_channels > 1 {
                let peak = frame.iter().map(|&s| (s as f64).abs()).fold(0.0, f64::max);
                let state = &mut self.channels[0];
                follow_level(&mut state.volume, peak, state.attack, state.decay);
            } else {
                for (chan, &s) in frame.iter().enumerate() {
                    let idx = chan.min(self.channels.len() - 1);
                    let state = &mut self.channels[idx];
                    follow_level(&mut state.volume, (s as f64).abs(), state.attack, state.decay);
                }
            }

            for (chan, &s) in frame.iter().enumerate() {
                let gain = self.channel_gain(chan);
                if self.delay_buf.is_empty() {
                    output[produced] = clip_truncate(s as f64 * gain);
                    produced += 1;
                } else {
                    if self.delay_count >= self.delay_buf.len() {
                        self.delay_full = true;
                        output[produced] = clip_truncate(self.delay_buf[self.delay_index] as f64 * gain);
                        produced += 1;
                    } else {
                        self.delay_count += 1;
                    }
                    self.delay_buf[self.delay_index] = s;
                    self.delay_index = (self.delay_index + 1) % self.delay_buf.len();
                }
            }
        }
        produced
    }

    /// Empty the delay line into `output`; returns `(written, finished)`
    pub fn drain(&mut self, output: &mut [Sample]) -> (usize, bool) {
        if !self.delay_full {
            self.delay_index = 0;
        }
        let mut done = 0;
        while done + self.file_channels <= output.len() && self.delay_count > 0 {
            for chan in 0..self.file_channels {
                if self.delay_count == 0 {
                    break;
                }
                let gain = self.channel_gain(chan);
                output[done] = clip_truncate(self.delay_buf[self.delay_index] as f64 * gain);
                done += 1;
                self.delay_index = (self.delay_index + 1) % self.delay_buf.len();
                self.delay_count -= 1;
            }
        }
        (done, self.delay_count == 0)
    }
}

/// Streaming `compand` effect
pub struct CompandEffect {
    signal: SignalInfo,
    stream: StreamBuffers,
    compander: Option<Compander>,
}

impl CompandEffect {
    pub fn new(signal: SignalInfo) -> Self {
        Self {
            signal,
            stream: StreamBuffers::new(),
            compander: None,
        }
    }

    fn configure(&mut self, options: &str) -> EffectResult<()> {
        let args = split_args(options);
        self.compander = Some(Compander::new(&args, self.signal)?);
        Ok(())
    }

    fn process_pending(&mut self) {
        match (self.stream.effect_on, self.compander.as_mut()) {
            (true, Some(compander)) => {
                self.stream.process_blocks(MAX_SAMPLE_SIZE, |input, output| compander.flow(input, output));
            }
            _ => self.stream.pass_through(),
        }
    }
}

impl Effect for CompandEffect {
    fn name(&self) -> &'static str {
        "compand"
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        self.stream = StreamBuffers::new();
        if !args.is_empty() {
            self.compander = Some(Compander::new(args, self.signal)?);
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        let result = if key.eq_ignore_ascii_case("compand") {
            self.configure(value)
        } else if key.eq_ignore_ascii_case("mode") {
            log::info!("compand: mode = {}", value);
            if value.eq_ignore_ascii_case("None") {
                Err(EffectError::InvalidParameter("mode None".into()))
            } else {
                self.configure(COMPAND_PARAMS)
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
            if let Some(compander) = self.compander.as_mut() {
                let mut block = vec![0; MAX_SAMPLE_SIZE];
                loop {
                    let (written, finished) = compander.drain(&mut block);
                    self.stream.fifo_out.write(&block[..written]);
                    if finished || written == 0 {
                        break;
                    }
                }
            }
        }
        Ok(self.stream.fifo_out.read(out))
    }

    fn close(&mut self) {
        self.stream.clear();
        self.compander = None;
    }

    fn is_on(&self) -> bool {
        self.stream.effect_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, amplitude: f64) -> Vec<Sample> {
        (0..len)
            .map(|i| (amplitude * (i as f64 * 0.05).sin()) as Sample)
            .collect()
    }

    #[test]
    fn test_attack_coefficient_10ms() {
        let coef = time_coefficient(0.010, 44100);
        let expected = 1.0 - (-1.0f64 / 441.0).exp();
        assert!((coef - expected).abs() < 1e-15);
        // Shorter than a sample period is instantaneous
        assert_eq!(time_coefficient(0.00001, 44100), 1.0);
        assert_eq!(time_coefficient(0.0, 44100), 1.0);
    }

    #[test]
    fn test_parse_errors() {
        let signal = SignalInfo::new(44100, 1);
        assert!(Compander::new(&["0.3,1"], signal).is_err());
        assert!(Compander::new(&["0.3", "-70,-60"], signal).is_err());
        assert!(Compander::new(&["0.3,-1", "-70,-60"], signal).is_err());
        assert!(Compander::new(&["0.3,1", "-70,-60", "0", "3"], signal).is_err());
        assert!(Compander::new(&["0.3,1", "-70,-60", "0", "-3", "-1"], signal).is_err());
        assert!(Compander::new(&["0.3,1", "6:-70,-60,-20", "-5", "-90", "0.2"], signal).is_ok());
    }

    #[test]
    fn test_delay_line_holds_back_output() {
        let signal = SignalInfo::new(1000, 1);
        let mut c = Compander::new(&["0,0", "-90,-90,0,0", "0", "0", "0.01"], signal).unwrap();
        let input: Vec<Sample> = (1..=30).collect();
        let mut out = vec![0; 30];
        // 10 samples are held in the delay line
        assert_eq!(c.flow(&input, &mut out), 20);
        assert_eq!(&out[..20], &input[..20]);

        let mut tail = vec![0; 64];
        let (written, finished) = c.drain(&mut tail);
        assert_eq!(written, 10);
        assert!(finished);
        assert_eq!(&tail[..10], &input[20..]);
    }

    #[test]
    fn test_effect_flush_after_drain_is_empty() {
        let mut effect = CompandEffect::new(SignalInfo::new(44100, 2));
        effect.init(&[]).unwrap();
        effect.set("mode", "CleanVoice").unwrap();
        assert!(effect.is_on());

        let input = tone(4410 * 2, 8000.0);
        effect.send(&input).unwrap();
        let mut out = vec![0; input.len()];
        let got = effect.receive(&mut out, ReadMode::Partial).unwrap();
        let mut drained = 0;
        loop {
            let n = effect.flush(&mut out).unwrap();
            if n == 0 {
                break;
            }
            drained += n;
        }
        assert_eq!(got + drained, input.len());
        assert_eq!(effect.flush(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_off_is_pass_through() {
        let mut effect = CompandEffect::new(SignalInfo::new(44100, 1));
        effect.init(&[]).unwrap();
        assert!(effect.set("mode", "none").is_err());
        let input = tone(100, 1000.0);
        effect.send(&input).unwrap();
        let mut out = vec![0; 100];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 100);
        assert_eq!(out, input);
    }
}
