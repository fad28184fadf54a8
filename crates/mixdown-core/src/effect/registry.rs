//! Effect registry - the immutable name → constructor table

use super::beautify::{BeautifyEffect, BEAUTIFY_USAGE};
use super::biquad::{BiquadEffect, BiquadKind};
use super::compand::{CompandEffect, COMPAND_USAGE};
use super::limiter::{LimiterEffect, LIMITER_USAGE};
use super::mcompand::{McompandEffect, MCOMPAND_USAGE};
use super::noise_suppression::NoiseSuppressionEffect;
use super::reverb::{ReverbEffect, REVERB_USAGE};
use super::{Effect, SignalInfo};

/// Registry entry: name, usage text and constructor
pub struct EffectHandler {
    pub name: &'static str,
    pub usage: &'static str,
    pub create: fn(SignalInfo) -> Box<dyn Effect>,
}

impl std::fmt::Debug for EffectHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandler").field("name", &self.name).finish()
    }
}

macro_rules! biquad_handler {
    ($kind:expr, $name:literal) => {
        EffectHandler {
            name: $name,
            usage: $kind.usage(),
            create: |signal| Box::new(BiquadEffect::new($kind, signal)),
        }
    };
}

const NOISE_SUPPRESSION_USAGE: &str =
    "Usage: noise_suppression (configured with set: Switch, low_gain, mid_gain, high_gain, ...)";

/// Every effect known to the pipeline
pub static EFFECT_HANDLERS: [EffectHandler; 18] = [
    biquad_handler!(BiquadKind::Highpass, "highpass"),
    biquad_handler!(BiquadKind::Lowpass, "lowpass"),
    biquad_handler!(BiquadKind::Bandpass, "bandpass"),
    biquad_handler!(BiquadKind::Bandreject, "bandreject"),
    biquad_handler!(BiquadKind::Allpass, "allpass"),
    biquad_handler!(BiquadKind::Bass, "bass"),
    biquad_handler!(BiquadKind::Treble, "treble"),
    biquad_handler!(BiquadKind::Equalizer, "equalizer"),
    biquad_handler!(BiquadKind::Band, "band"),
    biquad_handler!(BiquadKind::Deemph, "deemph"),
    biquad_handler!(BiquadKind::Riaa, "riaa"),
    biquad_handler!(BiquadKind::Biquad, "biquad"),
    EffectHandler {
        name: "compand",
        usage: COMPAND_USAGE,
        create: |signal| Box::new(CompandEffect::new(signal)),
    },
    EffectHandler {
        name: "mcompand",
        usage: MCOMPAND_USAGE,
        create: |signal| Box::new(McompandEffect::new(signal)),
    },
    EffectHandler {
        name: "reverb",
        usage: REVERB_USAGE,
        create: |signal| Box::new(ReverbEffect::new(signal)),
    },
    EffectHandler {
        name: "noise_suppression",
        usage: NOISE_SUPPRESSION_USAGE,
        create: |signal| Box::new(NoiseSuppressionEffect::new(signal)),
    },
    EffectHandler {
        name: "limiter",
        usage: LIMITER_USAGE,
        create: |signal| Box::new(LimiterEffect::new(signal)),
    },
    EffectHandler {
        name: "beautify",
        usage: BEAUTIFY_USAGE,
        create: |signal| Box::new(BeautifyEffect::new(signal)),
    },
];

/// Look up a handler by name, ignoring ASCII case
pub fn find_effect(name: &str) -> Option<&'static EffectHandler> {
    let found = EFFECT_HANDLERS.iter().find(|h| h.name.eq_ignore_ascii_case(name));
    if found.is_none() {
        log::warn!("find_effect: no effect named `{}'", name);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(find_effect("LowPass").map(|h| h.name), Some("lowpass"));
        assert_eq!(find_effect("noise_suppression").map(|h| h.name), Some("noise_suppression"));
        assert!(find_effect("chorus").is_none());
    }

    #[test]
    fn test_names_are_unique_and_match_instances() {
        for (i, handler) in EFFECT_HANDLERS.iter().enumerate() {
            assert!(EFFECT_HANDLERS[i + 1..].iter().all(|h| h.name != handler.name));
            let effect = (handler.create)(SignalInfo::new(44100, 2));
            assert_eq!(effect.name(), handler.name);
            assert!(!effect.is_on(), "{} starts switched on", handler.name);
        }
    }
}
