//! Effect chains
//!
//! [`EffectChain`] drives an ordered list of stages with the send/receive
//! protocol: the whole input goes to the first stage, then each stage's
//! available output is forwarded to the next one, and the last stage's output
//! is the chain output. End of stream drains each stage in the same forward
//! pattern using `flush`.
//!
//! Two chains are built on top of it:
//! - [`VoiceEffects`]: the fixed voice slots (noise suppression, beautify,
//!   reverb, volume limiter), configured by one info string each.
//! - [`TotalEffects`]: up to [`MAX_TOTAL_EFFECTS`] named effects applied to
//!   a mixed stream, with mono-only filters split across stereo channels.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::effect::EffectContext;
use crate::error::EffectResult;
use crate::fifo::SampleFifo;
use crate::types::{Sample, MAX_NB_SAMPLES};

/// Maximum number of entries in a [`TotalEffects`] list
pub const MAX_TOTAL_EFFECTS: usize = 20;

// ═══════════════════════════════════════════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════════════════════════════════════════

/// One position in a chain
pub enum Stage {
    /// A single effect seeing the interleaved stream
    Single(EffectContext),
    /// Two mono instances, one per channel of a stereo stream
    Split {
        channels: [EffectContext; 2],
        planes: [Vec<Sample>; 2],
        /// Output one channel produced ahead of the other
        pending: [SampleFifo; 2],
    },
}

impl Stage {
    pub fn split(left: EffectContext, right: EffectContext) -> Self {
        Stage::Split {
            channels: [left, right],
            planes: [vec![0; MAX_NB_SAMPLES / 2], vec![0; MAX_NB_SAMPLES / 2]],
            pending: [SampleFifo::default(), SampleFifo::default()],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Single(effect) => effect.name(),
            Stage::Split { channels, .. } => channels[0].name(),
        }
    }

    fn send(&mut self, samples: &[Sample]) -> EffectResult<usize> {
        match self {
            Stage::Single(effect) => effect.send(samples),
            Stage::Split { channels, planes, .. } => {
                let frames = samples.len() / 2;
                for (c, plane) in planes.iter_mut().enumerate() {
                    plane.clear();
                    plane.extend(samples.chunks_exact(2).map(|frame| frame[c]));
                }
                let results: Vec<EffectResult<usize>> = channels
                    .par_iter()
                    .zip(planes.par_iter())
                    .map(|(effect, plane)| effect.send(plane.as_slice()))
                    .collect();
                for result in results {
                    result?;
                }
                Ok(frames * 2)
            }
        }
    }

    fn pull(&mut self, out: &mut [Sample], flush: bool) -> EffectResult<usize> {
        let read = |effect: &EffectContext, buf: &mut [Sample]| {
            if flush {
                effect.flush(buf)
            } else {
                effect.receive(buf)
            }
        };
        match self {
            Stage::Single(effect) => read(effect, out),
            Stage::Split {
                channels,
                planes,
                pending,
            } => {
                let half = out.len() / 2;
                for (plane, queued) in planes.iter_mut().zip(pending.iter()) {
                    plane.resize(half.saturating_sub(queued.len()), 0);
                }
                let results: Vec<EffectResult<usize>> = channels
                    .par_iter()
                    .zip(planes.par_iter_mut())
                    .map(|(effect, plane)| {
                        if plane.is_empty() {
                            Ok(0)
                        } else {
                            read(effect, plane.as_mut_slice())
                        }
                    })
                    .collect();
                for ((result, plane), queued) in results.into_iter().zip(planes.iter()).zip(pending.iter_mut()) {
                    let got = result?;
                    queued.write(&plane[..got]);
                }
                let frames = half.min(pending[0].len()).min(pending[1].len());
                for (plane, queued) in planes.iter_mut().zip(pending.iter_mut()) {
                    plane.resize(frames, 0);
                    queued.read(plane.as_mut_slice());
                }
                for i in 0..frames {
                    out[2 * i] = planes[0][i];
                    out[2 * i + 1] = planes[1][i];
                }
                Ok(frames * 2)
            }
        }
    }

    fn receive(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        self.pull(out, false)
    }

    fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        self.pull(out, true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EffectChain
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered stages driven with send/receive/flush
pub struct EffectChain {
    stages: Vec<Stage>,
    buffer: Vec<Sample>,
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectChain {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            buffer: vec![0; MAX_NB_SAMPLES],
        }
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Run `input` through every stage, appending the chain output
    ///
    /// An empty chain copies `input` unchanged. A failing stage aborts the
    /// pass; output appended before the failure stays in `output`.
    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) -> EffectResult<usize> {
        if input.is_empty() {
            return Ok(0);
        }
        let Some(first) = self.stages.first_mut() else {
            output.extend_from_slice(input);
            return Ok(input.len());
        };
        first.send(input)?;
        self.pump(output, false)
    }

    /// Drain every stage at end of stream, appending the remaining output
    pub fn flush(&mut self, output: &mut Vec<Sample>) -> EffectResult<usize> {
        self.pump(output, true)
    }

    fn pump(&mut self, output: &mut Vec<Sample>, flushing: bool) -> EffectResult<usize> {
        let start = output.len();
        let count = self.stages.len();
        for i in 0..count {
            loop {
                let (head, tail) = self.stages.split_at_mut(i + 1);
                let stage = &mut head[i];
                let mut got = stage.receive(&mut self.buffer)?;
                if got == 0 && flushing {
                    got = stage.flush(&mut self.buffer)?;
                }
                if got == 0 {
                    break;
                }
                match tail.first_mut() {
                    Some(next) => {
                        next.send(&self.buffer[..got])?;
                    }
                    None => output.extend_from_slice(&self.buffer[..got]),
                }
            }
        }
        Ok(output.len() - start)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VoiceEffects
// ═══════════════════════════════════════════════════════════════════════════════

/// Voice processing slots, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoiceSlot {
    NoiseSuppression,
    Beautify,
    Reverb,
    VolumeLimiter,
}

impl VoiceSlot {
    pub const ALL: [VoiceSlot; 4] = [
        VoiceSlot::NoiseSuppression,
        VoiceSlot::Beautify,
        VoiceSlot::Reverb,
        VoiceSlot::VolumeLimiter,
    ];

    /// Parse a configuration name (`NoiseSuppression`, `Beautify`, ...)
    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.config_name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn config_name(self) -> &'static str {
        match self {
            VoiceSlot::NoiseSuppression => "NoiseSuppression",
            VoiceSlot::Beautify => "Beautify",
            VoiceSlot::Reverb => "Reverb",
            VoiceSlot::VolumeLimiter => "VolumeLimiter",
        }
    }

    /// Registry effect backing this slot
    pub fn effect_name(self) -> &'static str {
        match self {
            VoiceSlot::NoiseSuppression => "noise_suppression",
            VoiceSlot::Beautify => "beautify",
            VoiceSlot::Reverb => "reverb",
            VoiceSlot::VolumeLimiter => "limiter",
        }
    }

    /// Option key the slot's info string is applied through
    pub fn option_key(self) -> &'static str {
        match self {
            VoiceSlot::NoiseSuppression | VoiceSlot::VolumeLimiter => "Switch",
            VoiceSlot::Beautify | VoiceSlot::Reverb => "mode",
        }
    }
}

/// Per-slot info strings of a voice track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceEffectSettings {
    slots: [Option<String>; 4],
}

impl VoiceEffectSettings {
    pub fn set(&mut self, slot: VoiceSlot, info: impl Into<String>) {
        self.slots[slot as usize] = Some(info.into());
    }

    pub fn get(&self, slot: VoiceSlot) -> Option<&str> {
        self.slots[slot as usize].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VoiceSlot, &str)> {
        VoiceSlot::ALL
            .into_iter()
            .filter_map(move |slot| self.get(slot).map(|info| (slot, info)))
    }
}

/// The configured voice slots as a chain
pub struct VoiceEffects {
    chain: EffectChain,
}

impl VoiceEffects {
    /// Instantiate every configured slot for a `sample_rate`/`channels` stream
    pub fn build(settings: &VoiceEffectSettings, sample_rate: u32, channels: u16) -> Self {
        let mut chain = EffectChain::new();
        for (slot, info) in settings.iter() {
            let Some(effect) = EffectContext::create_by_name(slot.effect_name(), sample_rate, channels) else {
                log::warn!("voice_effects_init: unsupported effect {}", slot.config_name());
                continue;
            };
            if let Err(e) = effect.init(&[]) {
                log::error!("voice_effects_init: {} init failed: {}", slot.config_name(), e);
                continue;
            }
            if let Err(e) = effect.set(slot.option_key(), info) {
                log::warn!("voice_effects_init: {} rejected `{}': {}", slot.config_name(), info, e);
            }
            chain.push(Stage::Single(effect));
        }
        log::info!("voice_effects_init: {:?}", chain.names());
        Self { chain }
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn process(&mut self, input: &[Sample], output: &mut Vec<Sample>) -> EffectResult<usize> {
        self.chain.process(input, output)
    }

    pub fn flush(&mut self, output: &mut Vec<Sample>) -> EffectResult<usize> {
        self.chain.flush(output)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TotalEffects
// ═══════════════════════════════════════════════════════════════════════════════

/// Biquad family members that only make sense on a single channel
const MONO_ONLY: [&str; 6] = ["highpass", "lowpass", "bandpass", "bandreject", "allpass", "equalizer"];

/// Named effect applied to a whole mixed stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectInfo {
    pub name: String,
    pub info: String,
}

/// Up to [`MAX_TOTAL_EFFECTS`] effects over an interleaved stream, with FIFOs
/// on both ends so callers can push and pull arbitrary block sizes
pub struct TotalEffects {
    chain: EffectChain,
    fifo_in: SampleFifo,
    fifo_out: SampleFifo,
    block: Vec<Sample>,
    out: Vec<Sample>,
    flushed: bool,
}

impl TotalEffects {
    pub fn new(effects: &[EffectInfo], sample_rate: u32, channels: u16) -> Self {
        let mut chain = EffectChain::new();
        for entry in effects.iter().take(MAX_TOTAL_EFFECTS) {
            let name = entry.name.to_ascii_lowercase();
            let split = channels == 2 && MONO_ONLY.contains(&name.as_str());
            let instances = if split { 2 } else { 1 };
            let per_instance_channels = if split { 1 } else { channels };

            let mut created = Vec::with_capacity(instances);
            for _ in 0..instances {
                let Some(effect) = EffectContext::create_by_name(&name, sample_rate, per_instance_channels) else {
                    break;
                };
                if effect.init(&[]).is_err() {
                    break;
                }
                if let Err(e) = effect.set(&name, &entry.info) {
                    log::warn!("total_effect_init: {} rejected `{}': {}", entry.name, entry.info, e);
                }
                created.push(effect);
            }
            if created.len() != instances {
                log::warn!("total_effect_init: skipping `{}'", entry.name);
                continue;
            }
            let stage = match (created.pop(), created.pop()) {
                (Some(right), Some(left)) => Stage::split(left, right),
                (Some(single), None) => Stage::Single(single),
                _ => continue,
            };
            chain.push(stage);
        }
        if effects.len() > MAX_TOTAL_EFFECTS {
            log::warn!(
                "total_effect_init: {} effects given, only the first {} are used",
                effects.len(),
                MAX_TOTAL_EFFECTS
            );
        }
        Self {
            chain,
            fifo_in: SampleFifo::default(),
            fifo_out: SampleFifo::default(),
            block: vec![0; MAX_NB_SAMPLES],
            out: Vec::with_capacity(MAX_NB_SAMPLES),
            flushed: false,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Queue interleaved input
    pub fn send(&mut self, samples: &[Sample]) -> usize {
        self.fifo_in.write(samples)
    }

    /// Process everything queued and pull up to `out.len()` samples
    pub fn receive(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        loop {
            let n = self.fifo_in.read(&mut self.block);
            if n == 0 {
                break;
            }
            self.out.clear();
            self.chain.process(&self.block[..n], &mut self.out)?;
            self.fifo_out.write(&self.out);
        }
        Ok(self.fifo_out.read(out))
    }

    /// Drain the chain once, then hand out what is left
    pub fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize> {
        self.receive(&mut [])?;
        if !self.flushed {
            self.flushed = true;
            self.out.clear();
            self.chain.flush(&mut self.out)?;
            self.fifo_out.write(&self.out);
        }
        Ok(self.fifo_out.read(out))
    }
}
