//! Vocal beautification presets
//!
//! A gentle voice compander followed by a short equalizer whose curve
//! depends on the selected mode. `set("mode", name)` picks the preset;
//! `None` switches the effect off.

use std::str::FromStr;

use super::biquad::{design_coefficients, Biquad, FilterDesign, FilterType, WidthType};
use super::compand::Compander;
use super::params::split_args;
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::{EffectError, EffectResult};
use crate::types::{Sample, MAX_SAMPLE_SIZE};

pub const BEAUTIFY_USAGE: &str =
    "Usage: beautify CleanVoice|Bass|LowVoice|Penetrating|Magnetic|SoftPitch|None";

/// Voice leveller run ahead of every equalizer curve
const VOICE_COMPAND: &str = "0.02,0.25 6:-70,-70,-40,-35,-20,-14,0,-6 2 -90 0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeautifyMode {
    CleanVoice,
    Bass,
    LowVoice,
    Penetrating,
    Magnetic,
    SoftPitch,
}

impl FromStr for BeautifyMode {
    type Err = EffectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const MODES: [(&str, BeautifyMode); 6] = [
            ("CleanVoice", BeautifyMode::CleanVoice),
            ("Bass", BeautifyMode::Bass),
            ("LowVoice", BeautifyMode::LowVoice),
            ("Penetrating", BeautifyMode::Penetrating),
            ("Magnetic", BeautifyMode::Magnetic),
            ("SoftPitch", BeautifyMode::SoftPitch),
        ];
        MODES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s.trim()))
            .map(|&(_, mode)| mode)
            .ok_or_else(|| EffectError::usage("beautify", BEAUTIFY_USAGE, format!("unknown mode `{}'", s)))
    }
}

fn stage(filter: FilterType, fc: f64, width: f64, width_type: WidthType, gain: f64) -> FilterDesign {
    FilterDesign {
        filter,
        fc,
        width,
        width_type,
        gain,
    }
}

impl BeautifyMode {
    /// Equalizer curve applied after the compander
    pub fn equalizer(self) -> Vec<FilterDesign> {
        use FilterType::*;
        use WidthType::{Q, Slope};
        match self {
            BeautifyMode::CleanVoice => vec![
                stage(Hpf, 80.0, 0.707, Q, 0.0),
                stage(PeakingEq, 3000.0, 1.0, Q, 3.0),
            ],
            BeautifyMode::Bass => vec![
                stage(LowShelf, 100.0, 0.5, Slope, 6.0),
                stage(PeakingEq, 400.0, 1.0, Q, -2.0),
            ],
            BeautifyMode::LowVoice => vec![
                stage(PeakingEq, 200.0, 1.0, Q, 4.0),
                stage(HighShelf, 6000.0, 0.5, Slope, -2.0),
            ],
            BeautifyMode::Penetrating => vec![
                stage(Hpf, 120.0, 0.707, Q, 0.0),
                stage(PeakingEq, 2500.0, 1.0, Q, 5.0),
            ],
            BeautifyMode::Magnetic => vec![
                stage(PeakingEq, 150.0, 1.2, Q, 3.0),
                stage(PeakingEq, 5000.0, 1.0, Q, 2.0),
            ],
            BeautifyMode::SoftPitch => vec![
                stage(PeakingEq, 300.0, 1.0, Q, 2.0),
                stage(HighShelf, 4000.0, 0.5, Slope, -4.0),
            ],
        }
    }
}

/// Compander plus per-channel equalizer stages
struct Beautifier {
    compander: Compander,
    /// `eq[stage][channel]`
    eq: Vec<Vec<Biquad>>,
    channels: usize,
    channel_pos: usize,
}

impl Beautifier {
    fn new(mode: BeautifyMode, signal: SignalInfo) -> EffectResult<Self> {
        let compander = Compander::new(&split_args(VOICE_COMPAND), signal)?;
        let channels = signal.channels.max(1) as usize;
        let eq = mode
            .equalizer()
            .iter()
            .map(|design| {
                design_coefficients(design, signal.sample_rate).map(|c| vec![Biquad::new(c); channels])
            })
            .collect::<EffectResult<Vec<_>>>()?;
        Ok(Self {
            compander,
            eq,
            channels,
            channel_pos: 0,
        })
    }

    fn equalize(&mut self, block: &mut [Sample]) {
        for sample in block {
            for stage in &mut self.eq {
                *sample = stage[self.channel_pos].process(*sample);
            }
            self.channel_pos = (self.channel_pos + 1) % self.channels;
        }
    }

    fn flow(&mut self, input: &[Sample], output: &mut [Sample]) -> usize {
        let n = self.compander.flow(input, output);
        self.equalize(&mut output[..n]);
        n
    }
}

/// Streaming `beautify` effect
pub struct BeautifyEffect {
    signal: SignalInfo,
    stream: StreamBuffers,
    beautifier: Option<Beautifier>,
    mode: Option<BeautifyMode>,
}

impl BeautifyEffect {
    pub fn new(signal: SignalInfo) -> Self {
        Self {
            signal,
            stream: StreamBuffers::new(),
            beautifier: None,
            mode: None,
        }
    }

    pub fn mode(&self) -> Option<BeautifyMode> {
        self.mode
    }

    fn configure(&mut self, value: &str) -> EffectResult<()> {
        self.mode = None;
        self.beautifier = None;
        if value.trim().eq_ignore_ascii_case("None") {
            return Err(EffectError::InvalidParameter("mode None".into()));
        }
        let mode = value.parse::<BeautifyMode>()?;
        self.beautifier = Some(Beautifier::new(mode, self.signal)?);
        self.mode = Some(mode);
        Ok(())
    }

    fn process_pending(&mut self) {
        match (self.stream.effect_on, self.beautifier.as_mut()) {
            (true, Some(beautifier)) => {
                self.stream.process_blocks(MAX_SAMPLE_SIZE, |input, output| beautifier.flow(input, output));
            }
            _ => self.stream.pass_through(),
        }
    }
}

impl Effect for BeautifyEffect {
    fn name(&self) -> &'static str {
        "beautify"
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        self.stream = StreamBuffers::new();
        if let Some(mode) = args.first() {
            self.configure(mode)?;
            self.stream.effect_on = true;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        if !key.eq_ignore_ascii_case("mode") && !key.eq_ignore_ascii_case("beautify") {
            return Ok(());
        }
        log::info!("beautify: mode = {}", value);
        let result = self.configure(value);
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
        if let (true, Some(beautifier)) = (self.stream.effect_on, self.beautifier.as_mut()) {
            let mut block = vec![0; MAX_SAMPLE_SIZE];
            loop {
                let (written, finished) = beautifier.compander.drain(&mut block);
                beautifier.equalize(&mut block[..written]);
                self.stream.fifo_out.write(&block[..written]);
                if finished || written == 0 {
                    break;
                }
            }
        }
        Ok(self.stream.fifo_out.read(out))
    }

    fn close(&mut self) {
        self.stream.clear();
        self.beautifier = None;
    }

    fn is_on(&self) -> bool {
        self.stream.effect_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(len: usize) -> Vec<Sample> {
        (0..len)
            .map(|i| {
                let t = i as f64 / 44100.0;
                (4000.0 * (2.0 * std::f64::consts::PI * 220.0 * t).sin()) as Sample
            })
            .collect()
    }

    #[test]
    fn test_mode_names_are_case_insensitive() {
        assert_eq!("cleanvoice".parse::<BeautifyMode>().unwrap(), BeautifyMode::CleanVoice);
        assert_eq!("SoftPitch".parse::<BeautifyMode>().unwrap(), BeautifyMode::SoftPitch);
        assert!("Robot".parse::<BeautifyMode>().is_err());
    }

    #[test]
    fn test_every_mode_designs_at_common_rates() {
        for mode in [
            BeautifyMode::CleanVoice,
            BeautifyMode::Bass,
            BeautifyMode::LowVoice,
            BeautifyMode::Penetrating,
            BeautifyMode::Magnetic,
            BeautifyMode::SoftPitch,
        ] {
            for rate in [16000, 44100, 48000] {
                assert!(Beautifier::new(mode, SignalInfo::new(rate, 2)).is_ok(), "{mode:?} @ {rate}");
            }
        }
    }

    #[test]
    fn test_none_switches_off() {
        let mut effect = BeautifyEffect::new(SignalInfo::new(44100, 1));
        effect.set("mode", "Magnetic").unwrap();
        assert!(effect.is_on());
        assert!(effect.set("mode", "None").is_err());
        assert!(!effect.is_on());
        assert_eq!(effect.mode(), None);
    }

    #[test]
    fn test_processing_preserves_length() {
        let mut effect = BeautifyEffect::new(SignalInfo::new(44100, 1));
        effect.set("mode", "CleanVoice").unwrap();
        let input = voice(5000);
        effect.send(&input).unwrap();
        let mut out = vec![0; 8192];
        let mut total = effect.receive(&mut out, ReadMode::Partial).unwrap();
        loop {
            let n = effect.flush(&mut out).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 5000);
    }

    #[test]
    fn test_unrelated_key_is_ignored() {
        let mut effect = BeautifyEffect::new(SignalInfo::new(44100, 1));
        effect.set("Switch", "On").unwrap();
        assert!(!effect.is_on());
    }
}
