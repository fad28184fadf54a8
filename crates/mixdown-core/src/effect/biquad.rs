//! Biquad filter family
//!
//! Second-order IIR filters designed with the Audio-EQ-Cookbook bilinear
//! transform formulas, plus a few single-pole and table-driven variants
//! (`deemph`, `riaa`). One effect type per filter shape:
//!
//! | effect       | options                                     |
//! |--------------|---------------------------------------------|
//! | `highpass`   | `[-1\|-2] frequency [width[q\|o\|h\|k]]`    |
//! | `lowpass`    | `[-1\|-2] frequency [width[q\|o\|h\|k]]`    |
//! | `bandpass`   | `[-c] frequency width[h\|k\|q\|o]`          |
//! | `bandreject` | `frequency width[h\|k\|q\|o]`               |
//! | `allpass`    | `[-1\|-2] frequency [width[h\|k\|q\|o]]`    |
//! | `bass`       | `gain [frequency [width[s\|h\|k\|q\|o]]]`   |
//! | `treble`     | `gain [frequency [width[s\|h\|k\|q\|o]]]`   |
//! | `equalizer`  | `frequency width[q\|o\|h\|k] gain`          |
//! | `band`       | `[-n] center [width[h\|k\|q\|o]]`           |
//! | `deemph`     | none (44.1 kHz / 48 kHz only)               |
//! | `riaa`       | none (44.1 / 48 / 88.2 / 96 kHz only)       |
//! | `biquad`     | `b0 b1 b2 a0 a1 a2`                         |
//!
//! The difference equation runs in `f64` and each output sample is rounded
//! half away from zero and clipped to 16 bits.

use std::f64::consts::{LN_10, LN_2, PI};

use super::params::{parse_f64_exact, parse_f64_prefix, parse_frequency, split_args};
use super::{Effect, ReadMode, SignalInfo, StreamBuffers};
use crate::error::{EffectError, EffectResult};
use crate::types::{round_clip, Sample, MAX_SAMPLE_SIZE};

/// Parameters applied by the `mode` option
pub const BIQUADS_PARAMS: &str = "89.5 1.5q 5.8";

// ═══════════════════════════════════════════════════════════════════════════════
// Filter design
// ═══════════════════════════════════════════════════════════════════════════════

/// Transfer function shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lpf,
    Hpf,
    BpfConstantSkirt,
    Bpf,
    Notch,
    Apf,
    PeakingEq,
    LowShelf,
    HighShelf,
    Lpf1,
    Hpf1,
    BandSpk,
    BandSpkNoise,
    Ap1,
    Ap2,
    Deemph,
    Riaa,
}

/// How the width parameter is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthType {
    /// Band-width in Hz (`h`, and `k` after scaling by 1000)
    Hz,
    /// Band-width in Hz without frequency warping (`b`)
    HzNoWarp,
    /// Band-width in octaves (`o`)
    Octaves,
    /// Quality factor (`q`)
    Q,
    /// Shelf slope (`s`)
    Slope,
}

impl WidthType {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'h' | 'k' => Some(WidthType::Hz),
            'b' => Some(WidthType::HzNoWarp),
            'o' => Some(WidthType::Octaves),
            'q' => Some(WidthType::Q),
            's' => Some(WidthType::Slope),
            _ => None,
        }
    }
}

/// Parsed filter request, before coefficients are computed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterDesign {
    pub filter: FilterType,
    /// Centre/corner/cutoff frequency in Hz
    pub fc: f64,
    pub width: f64,
    pub width_type: WidthType,
    /// Gain in dB for EQ and shelf shapes
    pub gain: f64,
}

impl FilterDesign {
    pub fn new(filter: FilterType) -> Self {
        Self {
            filter,
            fc: 0.0,
            width: 0.0,
            width_type: WidthType::Hz,
            gain: 0.0,
        }
    }
}

/// Direct-form coefficients `b0 b1 b2 / a0 a1 a2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Coefficients {
    /// Unity pass-through
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Divide everything by `a0`
    pub fn normalized(&self) -> Self {
        Self {
            b0: self.b0 / self.a0,
            b1: self.b1 / self.a0,
            b2: self.b2 / self.a0,
            a0: 1.0,
            a1: self.a1 / self.a0,
            a2: self.a2 / self.a0,
        }
    }
}

/// Expand two roots into `[1, -(r0+r1), r0*r1]`
fn poly_from_roots(roots: [f64; 2]) -> [f64; 3] {
    let mut poly = [1.0, -roots[0], 0.0];
    for &root in &roots[1..] {
        for j in (1..poly.len()).rev() {
            poly[j] -= poly[j - 1] * root;
        }
    }
    poly
}

/// Compute un-normalized coefficients for `design` at `sample_rate`
pub fn design_coefficients(design: &FilterDesign, sample_rate: u32) -> EffectResult<Coefficients> {
    let rate = sample_rate as f64;
    let mut d = *design;

    if d.filter == FilterType::Deemph {
        match sample_rate {
            44100 => {
                d.fc = 5283.0;
                d.width = 0.4845;
                d.gain = -9.477;
            }
            48000 => {
                d.fc = 5356.0;
                d.width = 0.479;
                d.gain = -9.62;
            }
            rate => return Err(EffectError::UnsupportedSampleRate { effect: "deemph", rate }),
        }
        d.width_type = WidthType::Slope;
    }

    let w0 = 2.0 * PI * d.fc / rate;
    let a = (d.gain / 40.0 * LN_10).exp();
    if w0 > PI {
        return Err(EffectError::InvalidParameter(
            "frequency must be less than half the sample-rate (Nyquist rate)".into(),
        ));
    }

    let (sin_w0, cos_w0) = w0.sin_cos();
    let mut alpha = 0.0;
    if d.width != 0.0 {
        alpha = match d.width_type {
            WidthType::Slope => sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / d.width - 1.0) + 2.0).sqrt(),
            WidthType::Q => sin_w0 / (2.0 * d.width),
            WidthType::Octaves => sin_w0 * (LN_2 / 2.0 * d.width * w0 / sin_w0).sinh(),
            WidthType::Hz => sin_w0 / (2.0 * d.fc / d.width),
            WidthType::HzNoWarp => (PI * d.width / rate).tan(),
        };
    }

    let mut c = Coefficients {
        b0: 0.0,
        b1: 0.0,
        b2: 0.0,
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
    };

    match d.filter {
        FilterType::Lpf => {
            c.b0 = (1.0 - cos_w0) / 2.0;
            c.b1 = 1.0 - cos_w0;
            c.b2 = (1.0 - cos_w0) / 2.0;
            c.a0 = 1.0 + alpha;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha;
        }
        FilterType::Hpf => {
            c.b0 = (1.0 + cos_w0) / 2.0;
            c.b1 = -(1.0 + cos_w0);
            c.b2 = (1.0 + cos_w0) / 2.0;
            c.a0 = 1.0 + alpha;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha;
        }
        FilterType::BpfConstantSkirt => {
            c.b0 = sin_w0 / 2.0;
            c.b2 = -sin_w0 / 2.0;
            c.a0 = 1.0 + alpha;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha;
        }
        FilterType::Bpf => {
            c.b0 = alpha;
            c.b2 = -alpha;
            c.a0 = 1.0 + alpha;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha;
        }
        FilterType::Notch => {
            c.b0 = 1.0;
            c.b1 = -2.0 * cos_w0;
            c.b2 = 1.0;
            c.a0 = 1.0 + alpha;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha;
        }
        FilterType::Apf => {
            c.b0 = 1.0 - alpha;
            c.b1 = -2.0 * cos_w0;
            c.b2 = 1.0 + alpha;
            c.a0 = 1.0 + alpha;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha;
        }
        FilterType::PeakingEq => {
            if a == 1.0 {
                return Err(EffectError::InvalidParameter("equalizer gain must be non-zero".into()));
            }
            c.b0 = 1.0 + alpha * a;
            c.b1 = -2.0 * cos_w0;
            c.b2 = 1.0 - alpha * a;
            c.a0 = 1.0 + alpha / a;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - alpha / a;
        }
        FilterType::LowShelf => {
            if a == 1.0 {
                return Err(EffectError::InvalidParameter("shelf gain must be non-zero".into()));
            }
            let sqrt_a = a.sqrt();
            c.b0 = a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha);
            c.b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0);
            c.b2 = a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha);
            c.a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
            c.a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0);
            c.a2 = (a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha;
        }
        FilterType::Deemph | FilterType::HighShelf => {
            if a == 0.0 {
                return Err(EffectError::InvalidParameter("shelf gain out of range".into()));
            }
            let sqrt_a = a.sqrt();
            c.b0 = a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha);
            c.b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0);
            c.b2 = a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha);
            c.a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
            c.a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_w0);
            c.a2 = (a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha;
        }
        FilterType::Lpf1 => {
            c.a1 = -(-w0).exp();
            c.b0 = 1.0 + c.a1;
        }
        FilterType::Hpf1 => {
            c.a1 = -(-w0).exp();
            c.b0 = (1.0 - c.a1) / 2.0;
            c.b1 = -c.b0;
        }
        FilterType::BandSpk | FilterType::BandSpkNoise => {
            let width = if d.width == 0.0 { d.fc / 2.0 } else { d.width };
            let bw_hz = match d.width_type {
                WidthType::Q => d.fc / width,
                WidthType::Hz => width,
                _ => d.fc * (2f64.powf(width) - 1.0) * 2f64.powf(-0.5 * width),
            };
            let decay = (-2.0 * PI * bw_hz / rate).exp();
            c.a0 = 1.0;
            c.a1 = -4.0 * decay / (1.0 + decay) * cos_w0;
            c.a2 = decay;
            c.b0 = ((1.0 - c.a1 * c.a1 / (4.0 * c.a2)) * (1.0 - c.a2)).sqrt();
            if d.filter == FilterType::BandSpkNoise {
                let mult = (((1.0 + c.a2) * (1.0 + c.a2) - c.a1 * c.a1) * (1.0 - c.a2) / (1.0 + c.a2))
                    .sqrt()
                    / c.b0;
                c.b0 *= mult;
            }
        }
        FilterType::Ap1 => {
            c.b0 = (-w0).exp();
            c.b1 = -1.0;
            c.a1 = -(-w0).exp();
        }
        FilterType::Ap2 => {
            c.b0 = 1.0 - sin_w0;
            c.b1 = -2.0 * cos_w0;
            c.b2 = 1.0 + sin_w0;
            c.a0 = 1.0 + sin_w0;
            c.a1 = -2.0 * cos_w0;
            c.a2 = 1.0 - sin_w0;
        }
        FilterType::Riaa => {
            let (zeros, poles) = match sample_rate {
                44100 => ([-0.2014898, 0.9233820], [0.7083149, 0.9924091]),
                48000 => ([-0.1766069, 0.9321590], [0.7396325, 0.9931330]),
                88200 => ([-0.1168735, 0.9648312], [0.8590646, 0.9964002]),
                96000 => ([-0.1141486, 0.9676817], [0.8699137, 0.9966946]),
                rate => return Err(EffectError::UnsupportedSampleRate { effect: "riaa", rate }),
            };
            let b = poly_from_roots(zeros);
            let a = poly_from_roots(poles);
            c = Coefficients {
                b0: b[0],
                b1: b[1],
                b2: b[2],
                a0: a[0],
                a1: a[1],
                a2: a[2],
            };
            // Normalise to 0 dB at 1 kHz
            let y = 2.0 * PI * 1000.0 / rate;
            let b_re = c.b0 + c.b1 * (-y).cos() + c.b2 * (-2.0 * y).cos();
            let a_re = c.a0 + c.a1 * (-y).cos() + c.a2 * (-2.0 * y).cos();
            let b_im = c.b1 * (-y).sin() + c.b2 * (-2.0 * y).sin();
            let a_im = c.a1 * (-y).sin() + c.a2 * (-2.0 * y).sin();
            let g = 1.0 / ((b_re * b_re + b_im * b_im) / (a_re * a_re + a_im * a_im)).sqrt();
            c.b0 *= g;
            c.b1 *= g;
            c.b2 *= g;
        }
    }
    Ok(c)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Filter kernel
// ═══════════════════════════════════════════════════════════════════════════════

/// Direct form I biquad with `f64` memory
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: Coefficients,
    i1: f64,
    i2: f64,
    o1: f64,
    o2: f64,
}

impl Biquad {
    /// Create from coefficients; they are normalized by `a0`
    pub fn new(coeffs: Coefficients) -> Self {
        Self {
            coeffs: coeffs.normalized(),
            i1: 0.0,
            i2: 0.0,
            o1: 0.0,
            o2: 0.0,
        }
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coeffs
    }

    /// Filter one sample
    #[inline]
    pub fn process(&mut self, input: Sample) -> Sample {
        let c = &self.coeffs;
        let x = input as f64;
        let o0 = x * c.b0 + self.i1 * c.b1 + self.i2 * c.b2 - self.o1 * c.a1 - self.o2 * c.a2;
        self.i2 = self.i1;
        self.i1 = x;
        self.o2 = self.o1;
        self.o1 = o0;
        round_clip(o0)
    }

    /// Filter a mono block, returns the number of samples written
    pub fn flow(&mut self, input: &[Sample], output: &mut [Sample]) -> usize {
        let len = input.len().min(output.len());
        for (o, &i) in output[..len].iter_mut().zip(&input[..len]) {
            *o = self.process(i);
        }
        len
    }

    pub fn reset(&mut self) {
        self.i1 = 0.0;
        self.i2 = 0.0;
        self.o1 = 0.0;
        self.o2 = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Option parsing
// ═══════════════════════════════════════════════════════════════════════════════

/// The effect types of the biquad family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    Highpass,
    Lowpass,
    Bandpass,
    Bandreject,
    Allpass,
    Bass,
    Treble,
    Equalizer,
    Band,
    Deemph,
    Riaa,
    Biquad,
}

impl BiquadKind {
    pub const fn name(self) -> &'static str {
        match self {
            BiquadKind::Highpass => "highpass",
            BiquadKind::Lowpass => "lowpass",
            BiquadKind::Bandpass => "bandpass",
            BiquadKind::Bandreject => "bandreject",
            BiquadKind::Allpass => "allpass",
            BiquadKind::Bass => "bass",
            BiquadKind::Treble => "treble",
            BiquadKind::Equalizer => "equalizer",
            BiquadKind::Band => "band",
            BiquadKind::Deemph => "deemph",
            BiquadKind::Riaa => "riaa",
            BiquadKind::Biquad => "biquad",
        }
    }

    pub const fn usage(self) -> &'static str {
        match self {
            BiquadKind::Highpass | BiquadKind::Lowpass => "[-1|-2] frequency [width[q|o|h|k](0.707q)]",
            BiquadKind::Bandpass => "[-c] frequency width[h|k|q|o]",
            BiquadKind::Bandreject => "frequency width[h|k|q|o]",
            BiquadKind::Allpass => "frequency width[h|k|q|o]",
            BiquadKind::Bass => "gain [frequency(100) [width[s|h|k|q|o]](0.5s)]",
            BiquadKind::Treble => "gain [frequency(3000) [width[s|h|k|q|o]](0.5s)]",
            BiquadKind::Equalizer => "frequency width[q|o|h|k] gain",
            BiquadKind::Band => "[-n] center [width[h|k|q|o]]",
            BiquadKind::Deemph | BiquadKind::Riaa => "",
            BiquadKind::Biquad => "b0 b1 b2 a0 a1 a2",
        }
    }
}

/// Positional layout for the generic option parser
struct OptLayout {
    min_args: usize,
    max_args: usize,
    fc_pos: usize,
    width_pos: usize,
    gain_pos: usize,
    allowed: &'static str,
}

/// Either a designed filter or raw coefficients (`biquad` effect)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterSpec {
    Design(FilterDesign),
    Raw(Coefficients),
}

fn generic_opts(
    kind: BiquadKind,
    args: &[&str],
    layout: OptLayout,
    mut design: FilterDesign,
) -> EffectResult<FilterDesign> {
    let fail = |msg: &str| EffectError::usage(kind.name(), kind.usage(), msg.to_string());

    if args.len() < layout.min_args || args.len() > layout.max_args {
        return Err(fail("wrong number of arguments"));
    }

    // The first allowed suffix is the default width unit
    let mut width_char = layout.allowed.chars().next();

    if let Some(token) = args.get(layout.fc_pos) {
        match parse_frequency(token) {
            Some((fc, rest)) if fc > 0.0 && rest.is_empty() => design.fc = fc,
            _ => return Err(fail("invalid frequency")),
        }
    }
    if let Some(token) = args.get(layout.width_pos) {
        let (width, rest) = parse_f64_prefix(token).ok_or_else(|| fail("invalid width"))?;
        let mut suffix = rest.chars();
        match (suffix.next(), suffix.as_str().trim()) {
            (None, _) => {}
            (Some(c), "") => width_char = Some(c),
            _ => return Err(fail("invalid width")),
        }
        if width <= 0.0 {
            return Err(fail("width must be positive"));
        }
        design.width = width;
    }
    if let Some(token) = args.get(layout.gain_pos) {
        design.gain = parse_f64_exact(token).ok_or_else(|| fail("invalid gain"))?;
    }

    match width_char {
        Some(c) if !layout.allowed.contains(c) => return Err(fail("width type not allowed")),
        Some('s') if design.width > 1.0 => return Err(fail("slope must not exceed 1")),
        _ => {}
    }
    design.width_type = width_char.and_then(WidthType::from_suffix).unwrap_or(WidthType::Hz);
    if width_char == Some('k') {
        design.width *= 1000.0;
    }
    Ok(design)
}

/// Parse the options of `kind` into a filter request
pub fn parse_filter_options(kind: BiquadKind, args: &[&str]) -> EffectResult<FilterSpec> {
    let layout = |min_args, max_args, allowed| OptLayout {
        min_args,
        max_args,
        fc_pos: 0,
        width_pos: 1,
        gain_pos: 2,
        allowed,
    };
    let design = match kind {
        BiquadKind::Highpass | BiquadKind::Lowpass => {
            let lowpass = kind == BiquadKind::Lowpass;
            if args.first() == Some(&"-1") {
                let filter = if lowpass { FilterType::Lpf1 } else { FilterType::Hpf1 };
                generic_opts(kind, &args[1..], layout(1, 1, ""), FilterDesign::new(filter))?
            } else {
                let args = if args.first() == Some(&"-2") { &args[1..] } else { args };
                let filter = if lowpass { FilterType::Lpf } else { FilterType::Hpf };
                let mut design = FilterDesign::new(filter);
                design.width = 0.5f64.sqrt();
                generic_opts(kind, args, layout(1, 2, "qohk"), design)?
            }
        }
        BiquadKind::Bandpass => {
            let (filter, args) = match args.first() {
                Some(&"-c") => (FilterType::BpfConstantSkirt, &args[1..]),
                _ => (FilterType::Bpf, args),
            };
            generic_opts(kind, args, layout(2, 2, "hkqob"), FilterDesign::new(filter))?
        }
        BiquadKind::Bandreject => {
            generic_opts(kind, args, layout(2, 2, "hkqob"), FilterDesign::new(FilterType::Notch))?
        }
        BiquadKind::Allpass => {
            let (filter, args) = match args.first() {
                Some(&"-1") => (FilterType::Ap1, &args[1..]),
                Some(&"-2") => (FilterType::Ap2, &args[1..]),
                _ => (FilterType::Apf, args),
            };
            let m = if filter == FilterType::Apf { 2 } else { 1 };
            generic_opts(kind, args, layout(m, m, "hkqo"), FilterDesign::new(filter))?
        }
        BiquadKind::Bass | BiquadKind::Treble => {
            let bass = kind == BiquadKind::Bass;
            let mut design = FilterDesign::new(if bass { FilterType::LowShelf } else { FilterType::HighShelf });
            design.width = 0.5;
            design.fc = if bass { 100.0 } else { 3000.0 };
            let tone = OptLayout {
                min_args: 1,
                max_args: 3,
                fc_pos: 1,
                width_pos: 2,
                gain_pos: 0,
                allowed: "shkqo",
            };
            generic_opts(kind, args, tone, design)?
        }
        BiquadKind::Equalizer => {
            generic_opts(kind, args, layout(3, 3, "qohk"), FilterDesign::new(FilterType::PeakingEq))?
        }
        BiquadKind::Band => {
            let (filter, args) = match args.first() {
                Some(&"-n") => (FilterType::BandSpkNoise, &args[1..]),
                _ => (FilterType::BandSpk, args),
            };
            generic_opts(kind, args, layout(1, 2, "hkqo"), FilterDesign::new(filter))?
        }
        BiquadKind::Deemph => {
            generic_opts(kind, args, layout(0, 0, "s"), FilterDesign::new(FilterType::Deemph))?
        }
        BiquadKind::Riaa => {
            if !args.is_empty() {
                return Err(EffectError::usage(kind.name(), kind.usage(), "takes no arguments"));
            }
            FilterDesign::new(FilterType::Riaa)
        }
        BiquadKind::Biquad => {
            let values: Vec<f64> = args.iter().filter_map(|a| parse_f64_exact(a)).collect();
            if args.len() != 6 || values.len() != 6 {
                return Err(EffectError::usage(kind.name(), kind.usage(), "needs six coefficients"));
            }
            return Ok(FilterSpec::Raw(Coefficients {
                b0: values[0],
                b1: values[1],
                b2: values[2],
                a0: values[3],
                a1: values[4],
                a2: values[5],
            }));
        }
    };
    Ok(FilterSpec::Design(design))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Effect
// ═══════════════════════════════════════════════════════════════════════════════

/// Streaming wrapper: one filter state per interleaved channel
pub struct BiquadEffect {
    kind: BiquadKind,
    signal: SignalInfo,
    stream: StreamBuffers,
    filters: Vec<Biquad>,
    /// Channel of the next sample to be filtered
    channel_pos: usize,
}

impl BiquadEffect {
    pub fn new(kind: BiquadKind, signal: SignalInfo) -> Self {
        Self {
            kind,
            signal,
            stream: StreamBuffers::new(),
            filters: Vec::new(),
            channel_pos: 0,
        }
    }

    /// Parse options and compute fresh coefficients
    fn configure(&mut self, args: &[&str]) -> EffectResult<()> {
        let coeffs = match parse_filter_options(self.kind, args)? {
            FilterSpec::Raw(coeffs) => coeffs,
            FilterSpec::Design(design) => design_coefficients(&design, self.signal.sample_rate)?,
        };
        let channels = self.signal.channels.max(1) as usize;
        self.filters = vec![Biquad::new(coeffs); channels];
        self.channel_pos = 0;
        Ok(())
    }

    fn configure_str(&mut self, options: &str) -> EffectResult<()> {
        let args = split_args(options);
        self.configure(&args)
    }
}

impl Effect for BiquadEffect {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn init(&mut self, args: &[&str]) -> EffectResult<()> {
        self.stream = StreamBuffers::new();
        self.stream.effect_on = false;
        if !args.is_empty() {
            self.configure(args)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> EffectResult<()> {
        let result = if key.eq_ignore_ascii_case(self.kind.name()) {
            self.configure_str(value)
        } else if key.eq_ignore_ascii_case("mode") {
            log::info!("{}: mode = {}", self.kind.name(), value);
            if value.eq_ignore_ascii_case("None") {
                Err(EffectError::InvalidParameter("mode None".into()))
            } else {
                self.configure_str(BIQUADS_PARAMS)
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
        if self.stream.effect_on && !self.filters.is_empty() {
            let filters = &mut self.filters;
            let channel_pos = &mut self.channel_pos;
            self.stream.process_blocks(MAX_SAMPLE_SIZE, |input, output| {
                let channels = filters.len();
                for (o, &i) in output.iter_mut().zip(input) {
                    *o = filters[*channel_pos].process(i);
                    *channel_pos = (*channel_pos + 1) % channels;
                }
                input.len()
            });
        } else {
            self.stream.pass_through();
        }
        Ok(self.stream.read_output(out, mode))
    }

    fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        Ok(self.stream.fifo_out.read(out))
    }

    fn close(&mut self) {
        self.stream.clear();
        self.filters.clear();
    }

    fn is_on(&self) -> bool {
        self.stream.effect_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel_close(a: f64, b: f64) -> bool {
        if b == 0.0 {
            a.abs() < 1e-12
        } else {
            ((a - b) / b).abs() < 1e-9
        }
    }

    #[test]
    fn test_butterworth_lowpass_matches_cookbook() {
        let spec = parse_filter_options(BiquadKind::Lowpass, &["1000", "0.707q"]).unwrap();
        let FilterSpec::Design(design) = spec else {
            panic!("expected a designed filter");
        };
        let c = design_coefficients(&design, 44100).unwrap();

        let w0 = 2.0 * PI * 1000.0 / 44100.0;
        let alpha = w0.sin() / (2.0 * 0.707);
        assert!(rel_close(c.b0, (1.0 - w0.cos()) / 2.0));
        assert!(rel_close(c.b1, 1.0 - w0.cos()));
        assert!(rel_close(c.b2, (1.0 - w0.cos()) / 2.0));
        assert!(rel_close(c.a0, 1.0 + alpha));
        assert!(rel_close(c.a1, -2.0 * w0.cos()));
        assert!(rel_close(c.a2, 1.0 - alpha));
    }

    #[test]
    fn test_default_width_is_butterworth() {
        let FilterSpec::Design(design) = parse_filter_options(BiquadKind::Highpass, &["200"]).unwrap() else {
            panic!("expected a designed filter");
        };
        assert_eq!(design.width_type, WidthType::Q);
        assert!((design.width - 0.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_khz_suffix_normalizes_to_hz() {
        let FilterSpec::Design(design) = parse_filter_options(BiquadKind::Bandpass, &["1k", "0.2k"]).unwrap() else {
            panic!("expected a designed filter");
        };
        assert_eq!(design.fc, 1000.0);
        assert_eq!(design.width, 200.0);
        assert_eq!(design.width_type, WidthType::Hz);
    }

    #[test]
    fn test_bad_options_rejected() {
        assert!(parse_filter_options(BiquadKind::Lowpass, &[]).is_err());
        assert!(parse_filter_options(BiquadKind::Lowpass, &["-5"]).is_err());
        assert!(parse_filter_options(BiquadKind::Lowpass, &["100", "2s"]).is_err());
        assert!(parse_filter_options(BiquadKind::Bass, &["3", "100", "2s"]).is_err());
        assert!(parse_filter_options(BiquadKind::Equalizer, &["100", "1q"]).is_err());
        assert!(parse_filter_options(BiquadKind::Riaa, &["1"]).is_err());
        assert!(parse_filter_options(BiquadKind::Biquad, &["1", "0", "0", "1", "0"]).is_err());
    }

    #[test]
    fn test_rate_tables_are_strict() {
        let deemph = FilterDesign::new(FilterType::Deemph);
        assert!(design_coefficients(&deemph, 44100).is_ok());
        assert!(matches!(
            design_coefficients(&deemph, 32000),
            Err(EffectError::UnsupportedSampleRate { rate: 32000, .. })
        ));
        let riaa = FilterDesign::new(FilterType::Riaa);
        for rate in [44100, 48000, 88200, 96000] {
            assert!(design_coefficients(&riaa, rate).is_ok());
        }
        assert!(design_coefficients(&riaa, 22050).is_err());
    }

    #[test]
    fn test_above_nyquist_rejected() {
        let FilterSpec::Design(design) = parse_filter_options(BiquadKind::Lowpass, &["30000"]).unwrap() else {
            panic!("expected a designed filter");
        };
        assert!(design_coefficients(&design, 44100).is_err());
    }

    #[test]
    fn test_riaa_unity_at_1khz() {
        let c = design_coefficients(&FilterDesign::new(FilterType::Riaa), 44100).unwrap();
        let y = 2.0 * PI * 1000.0 / 44100.0;
        let b_re = c.b0 + c.b1 * (-y).cos() + c.b2 * (-2.0 * y).cos();
        let b_im = c.b1 * (-y).sin() + c.b2 * (-2.0 * y).sin();
        let a_re = c.a0 + c.a1 * (-y).cos() + c.a2 * (-2.0 * y).cos();
        let a_im = c.a1 * (-y).sin() + c.a2 * (-2.0 * y).sin();
        let mag = ((b_re * b_re + b_im * b_im) / (a_re * a_re + a_im * a_im)).sqrt();
        assert!((mag - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_raw_biquad_identity_passes_samples() {
        let mut effect = BiquadEffect::new(BiquadKind::Biquad, SignalInfo::new(44100, 1));
        effect.init(&["1", "0", "0", "1", "0", "0"]).unwrap();
        effect.set("biquad", "2 0 0 2 0 0").unwrap();
        let input: Vec<Sample> = (0..100).map(|i| (i * 300 - 15000) as Sample).collect();
        effect.send(&input).unwrap();
        let mut out = vec![0; 100];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 100);
        assert_eq!(out, input);
    }

    #[test]
    fn test_lowpass_attenuates_nyquist_tone() {
        let mut effect = BiquadEffect::new(BiquadKind::Lowpass, SignalInfo::new(44100, 1));
        effect.init(&[]).unwrap();
        effect.set("lowpass", "500").unwrap();
        let input: Vec<Sample> = (0..4096).map(|i| if i % 2 == 0 { 10000 } else { -10000 }).collect();
        effect.send(&input).unwrap();
        let mut out = vec![0; 4096];
        let n = effect.receive(&mut out, ReadMode::Partial).unwrap();
        assert_eq!(n, 4096);
        assert!(out[2048..].iter().all(|s| s.abs() < 200));
    }

    #[test]
    fn test_failed_set_turns_effect_off() {
        let mut effect = BiquadEffect::new(BiquadKind::Highpass, SignalInfo::new(44100, 2));
        effect.init(&[]).unwrap();
        effect.set("highpass", "100").unwrap();
        assert!(effect.is_on());
        assert!(effect.set("mode", "None").is_err());
        assert!(!effect.is_on());

        // Off means pass-through
        effect.send(&[1, 2, 3, 4]).unwrap();
        let mut out = [0; 4];
        assert_eq!(effect.receive(&mut out, ReadMode::Partial).unwrap(), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
