//! Multiband compander
//!
//! The option string holds one compander description per band, separated
//! by `;`, with a crossover frequency between each pair of bands:
//!
//! ```text
//! attack,decay... points [gain [init [delay]]] ; freq ; attack,decay... points ...
//! ```
//!
//! Each crossover splits the remaining signal into a low band, which is
//! companded, and a high remainder handed to the next band. Band outputs
//! are summed with hard clipping.

use super::compand::{clip_truncate, follow_level, time_coefficient};
use super::crossover::Crossover;
use super::params::{parse_f64_prefix, parse_frequency};
use super::transfer::TransferFunction;
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::{EffectError, EffectResult};
use crate::types::{clip_i32, Sample, MAX_SAMPLE_SIZE};

pub const MCOMPAND_USAGE: &str = "quoted_compand_args [crossover_frequency[k] quoted_compand_args [...]]\n\n\
quoted_compand_args are as for the compand effect:\n\n  attack1,decay1[,attack2,decay2...]\n\
                 in-dB1,out-dB1[,in-dB2,out-dB2...]\n                [ gain [ initial-volume [ delay ] ] ]";

/// Five-band preset applied by the `mode` option
pub const MCOMPAND_PARAMS: &str = "0.005,0.1 -47,-40,-34,-34,-17,-33;100;\
0.003,0.05 -47,-40,-34,-34,-17,-33;400;\
0.000625,0.0125 -47,-40,-34,-34,-15,-33;1600;\
0.0001,0.025 -47,-40,-34,-34,-31,-31,-0,-30;6400;\
0,0.025 -38,-31,-28,-28,-0,-25;";

/// `atof` semantics: leading number or zero
fn lenient_f64(text: &str) -> f64 {
    parse_f64_prefix(text.trim_start()).map(|(v, _)| v).unwrap_or(0.0)
}

struct Band {
    transfer: TransferFunction,
    attack: Vec<f64>,
    decay: Vec<f64>,
    volume: Vec<f64>,
    delay_secs: f64,
    top_frequency: f64,
    crossover: Option<Crossover>,
    delay_buf: Vec<Sample>,
    delay_size: usize,
    delay_ptr: usize,
    delay_count: usize,
}

impl Band {
    fn parse(text: &str) -> EffectResult<Self> {
        let fail = |msg: String| EffectError::usage("mcompand", MCOMPAND_USAGE, msg);
        let args: Vec<&str> = text.split([' ', '\t']).filter(|t| !t.is_empty()).collect();
        if args.len() < 2 || args.len() > 5 {
            return Err(fail(format!("wrong number of compander parameters in `{}'", text.trim())));
        }

        let commas = args[0].matches(',').count();
        if commas % 2 == 0 {
            return Err(fail("odd number of attack & decay rate parameters".into()));
        }
        let rates = 1 + commas / 2;
        let mut times = args[0].split(',').filter(|t| !t.is_empty()).map(lenient_f64);
        let mut attack = Vec::with_capacity(rates);
        let mut decay = Vec::with_capacity(rates);
        for _ in 0..rates {
            attack.push(times.next().unwrap_or(0.0));
            decay.push(times.next().unwrap_or(0.0));
        }

        let transfer = TransferFunction::parse(args[1], args.get(2).copied()).map_err(fail)?;
        let init = args.get(3).map(|v| 10f64.powf(lenient_f64(v) / 20.0)).unwrap_or(1.0);
        let delay_secs = args.get(4).map(|v| lenient_f64(v)).unwrap_or(0.0);

        Ok(Self {
            transfer,
            attack,
            decay,
            volume: vec![init; rates],
            delay_secs,
            top_frequency: 0.0,
            crossover: None,
            delay_buf: Vec::new(),
            delay_size: 0,
            delay_ptr: 0,
            delay_count: 0,
        })
    }

    fn linked(&self) -> bool {
        self.volume.len() == 1
    }

    /// Compand one band; `total_delay` is the longest delay of all bands
    fn flow(&mut self, input: &[Sample], output: &mut [Sample], channels: usize, total_delay: usize) -> usize {
        let mut odone = 0;
        for frame in input.chunks_exact(channels) {
            if self.linked() && channels > 1 {
                let peak = frame.iter().map(|&s| (s as f64).abs()).fold(0.0, f64::max);
                follow_level(&mut self.volume[0], peak, self.attack[0], self.decay[0]);
            } else {
                for (chan, &s) in frame.iter().enumerate() {
                    let idx = chan.min(self.volume.len() - 1);
                    follow_level(&mut self.volume[idx], (s as f64).abs(), self.attack[idx], self.decay[idx]);
                }
            }

            for (chan, &s) in frame.iter().enumerate() {
                let ch = if self.linked() { 0 } else { chan.min(self.volume.len() - 1) };
                let gain = self.transfer.gain(self.volume[ch]);
                if total_delay == 0 {
                    output[odone] = clip_truncate(s as f64 * gain);
                    odone += 1;
                    continue;
                }
                // Volume is applied this band's delay ahead of the shared output point
                if self.delay_count >= self.delay_size {
                    let idx = (self.delay_ptr + total_delay - self.delay_size) % total_delay;
                    self.delay_buf[idx] = clip_truncate(self.delay_buf[idx] as f64 * gain);
                }
                if self.delay_count >= total_delay {
                    output[odone] = self.delay_buf[self.delay_ptr];
                    odone += 1;
                } else {
                    self.delay_count += 1;
                }
                self.delay_buf[self.delay_ptr] = s;
                self.delay_ptr = (self.delay_ptr + 1) % total_delay;
            }
        }
        odone
    }

    /// Add the delay line contents onto `output`
    fn drain(&mut self, output: &mut [Sample], total_delay: usize) -> usize {
        let mut done = 0;
        while done < output.len() && self.delay_count > 0 {
            output[done] = clip_i32(output[done] as i32 + self.delay_buf[self.delay_ptr] as i32);
            self.delay_ptr = (self.delay_ptr + 1) % total_delay;
            self.delay_count -= 1;
            done += 1;
        }
        done
    }
}

/// Multiband compander DSP state
pub struct MultibandCompander {
    bands: Vec<Band>,
    channels: usize,
    delay_buf_size: usize,
    remaining: Vec<Sample>,
    low: Vec<Sample>,
    high: Vec<Sample>,
    band_out: Vec<Sample>,
    warned_delay: bool,
}

impl MultibandCompander {
    /// Parse `;`-separated band descriptions and prepare for `signal`
    pub fn new(options: &str, signal: SignalInfo) -> EffectResult<Self> {
        let args: Vec<&str> = options.split(';').filter(|t| !t.is_empty()).collect();
        if args.len() % 2 == 0 {
            return Err(EffectError::usage(
                "mcompand",
                MCOMPAND_USAGE,
                "mcompand accepts only an odd number of arguments",
            ));
        }
        let n_bands = (args.len() + 1) / 2;
        let channels = signal.channels.max(1) as usize;

        let mut bands: Vec<Band> = Vec::with_capacity(n_bands);
        for i in 0..n_bands {
            let mut band = Band::parse(args[2 * i])?;
            if i + 1 < n_bands {
                let freq = match parse_frequency(args[2 * i + 1].trim()) {
                    Some((f, rest)) if rest.is_empty() => f,
                    _ => {
                        return Err(EffectError::usage("mcompand", MCOMPAND_USAGE, "bad frequency in args to mcompand"))
                    }
                };
                if let Some(prev) = bands.last() {
                    if freq < prev.top_frequency {
                        return Err(EffectError::usage(
                            "mcompand",
                            MCOMPAND_USAGE,
                            "mcompand crossover frequencies must be in ascending order",
                        ));
                    }
                }
                band.top_frequency = freq;
            }
            bands.push(band);
        }

        let rate = signal.sample_rate as f64;
        let mut delay_buf_size = 0;
        for band in &mut bands {
            band.delay_size = (band.delay_secs * rate * channels as f64) as usize;
            delay_buf_size = delay_buf_size.max(band.delay_size);
        }
        for band in &mut bands {
            for rate_value in band.attack.iter_mut().chain(band.decay.iter_mut()) {
                *rate_value = time_coefficient(*rate_value, signal.sample_rate);
            }
            band.delay_buf = vec![0; delay_buf_size];
            if band.top_frequency != 0.0 {
                band.crossover = Some(Crossover::new(band.top_frequency, signal.sample_rate, signal.channels)?);
            }
        }
        log::debug!("mcompand: {} band(s), delay {} samples", n_bands, delay_buf_size);

        Ok(Self {
            bands,
            channels,
            delay_buf_size,
            remaining: Vec::new(),
            low: Vec::new(),
            high: Vec::new(),
            band_out: Vec::new(),
            warned_delay: false,
        })
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Process whole frames of `input`; returns the samples written
    pub fn flow(&mut self, input: &[Sample], output: &mut [Sample]) -> usize {
        let len = input.len().min(output.len());
        let len = len - len % self.channels;

        self.remaining.clear();
        self.remaining.extend_from_slice(&input[..len]);
        self.low.resize(len, 0);
        self.high.resize(len, 0);
        self.band_out.resize(len, 0);
        output[..len].fill(0);

        for band in &mut self.bands {
            let source: &[Sample] = match band.crossover.as_mut() {
                Some(crossover) => {
                    crossover.process(&self.remaining, &mut self.low, &mut self.high);
                    &self.low
                }
                None => &self.remaining,
            };
            self.band_out.fill(0);
            let produced = band.flow(source, &mut self.band_out, self.channels, self.delay_buf_size);
            if produced != len && !self.warned_delay {
                log::error!("mcompand: per-band delay misaligns the band outputs");
                self.warned_delay = true;
            }
            for (o, &b) in output[..len].iter_mut().zip(&self.band_out) {
                *o = clip_i32(*o as i32 + b as i32);
            }
            if band.crossover.is_some() {
                std::mem::swap(&mut self.remaining, &mut self.high);
            }
        }
        len
    }

    /// Sum the delay lines of all bands into `output`
    ///
    /// Returns the number of samples written; 0 once every band is empty.
    pub fn drain(&mut self, output: &mut [Sample]) -> usize {
        let len = output.len() - output.len() % self.channels;
        output[..len].fill(0);
        let mut most = 0;
        if self.delay_buf_size == 0 {
            return 0;
        }
        for band in &mut self.bands {
            most = most.max(band.drain(&mut output[..len], self.delay_buf_size));
        }
        most
    }
}

/// Streaming `mcompand` effect
pub struct McompandEffect {
    signal: SignalInfo,
    stream: StreamBuffers,
    compander: Option<MultibandCompander>,
}

impl McompandEffect {
    pub fn new(signal: SignalInfo) -> Self {
        Self {
            signal,
            stream: StreamBuffers::new(),
            compander: None,
        }
    }

    fn configure(&mut self, options: &str) -> EffectResult<()> {
        self.compander = Some(MultibandCompander::new(options, self.signal)?);
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

impl Effect for McompandEffect {
    fn name(&self) -> &'static str {
        "mcompand"
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        self.stream = StreamBuffers::new();
        if !args.is_empty() {
            self.configure(&args.join(";"))?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        let result = if key.eq_ignore_ascii_case("mcompand") {
            self.configure(value)
        } else if key.eq_ignore_ascii_case("mode") {
            log::info!("mcompand: mode = {}", value);
            if value.eq_ignore_ascii_case("None") {
                Err(EffectError::InvalidParameter("mode None".into()))
            } else {
                self.configure(MCOMPAND_PARAMS)
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
                    let written = compander.drain(&mut block);
                    if written == 0 {
                        break;
                    }
                    self.stream.fifo_out.write(&block[..written]);
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

    #[test]
    fn test_preset_parses_five_bands() {
        let c = MultibandCompander::new(MCOMPAND_PARAMS, SignalInfo::new(44100, 2)).unwrap();
        assert_eq!(c.band_count(), 5);
    }

    #[test]
    fn test_option_errors() {
        let signal = SignalInfo::new(44100, 1);
        // Even number of arguments (missing the band after a crossover)
        assert!(MultibandCompander::new("0.1,0.2 -60,-60,0,0;1000", signal).is_err());
        assert!(MultibandCompander::new("0.1,0.2 -60,-60,0,0;abc;0.1,0.2 -60,-60,0,0", signal).is_err());
        assert!(MultibandCompander::new(
            "0.1,0.2 -60,-60,0,0;2000;0.1,0.2 -60,-60,0,0;1000;0.1,0.2 -60,-60,0,0",
            signal
        )
        .is_err());
        assert!(MultibandCompander::new("0.1 -60,-60,0,0", signal).is_err());
    }

    #[test]
    fn test_unity_bands_reconstruct_signal() {
        let signal = SignalInfo::new(44100, 1);
        let mut c =
            MultibandCompander::new("0,0 -90,-90,0,0;1000;0,0 -90,-90,0,0", signal).unwrap();
        let input: Vec<Sample> = (0..4096)
            .map(|i| (6000.0 * (i as f64 * 2.0 * std::f64::consts::PI * 300.0 / 44100.0).sin()) as Sample)
            .collect();
        let mut out = vec![0; 4096];
        assert_eq!(c.flow(&input, &mut out), 4096);
        let energy = |b: &[Sample]| b.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
        let ratio = energy(&out[2048..]) / energy(&input[2048..]);
        assert!((ratio - 1.0).abs() < 0.05, "ratio {ratio}");
        // No delay lines: nothing to drain
        assert_eq!(c.drain(&mut out), 0);
    }

    #[test]
    fn test_effect_mode_switch() {
        let mut effect = McompandEffect::new(SignalInfo::new(44100, 2));
        effect.init(&[]).unwrap();
        effect.set("mode", "Default").unwrap();
        assert!(effect.is_on());
        effect.send(&vec![1000; 4096]).unwrap();
        let mut out = vec![0; 4096];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 4096);
        assert_eq!(effect.flush(&mut out).unwrap(), 0);
    }
}
