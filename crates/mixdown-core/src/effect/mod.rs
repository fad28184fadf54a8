//! Effect system - trait, stream buffering, context and registry
//!
//! Every effect follows the same lifecycle:
//!
//! ```text
//! init → [set]* → {send / receive}* → [flush] → close
//! ```
//!
//! Samples are pushed with `send`, processed output is pulled with
//! `receive`. An effect that is switched off copies its input unchanged so a
//! chain never has to special-case disabled stages.

pub mod beautify;
pub mod biquad;
pub mod compand;
pub mod crossover;
pub mod limiter;
pub mod mcompand;
pub mod noise_estimation;
pub mod noise_suppression;
pub mod params;
pub mod registry;
pub mod reverb;
pub mod transfer;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{EffectError, EffectResult};
use crate::fifo::SampleFifo;
use crate::types::Sample;

pub use registry::{find_effect, EffectHandler, EFFECT_HANDLERS};

/// Input signal description handed to every effect at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SignalInfo {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }
}

/// How `receive` treats a request it cannot fill completely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Return whatever is available
    Partial,
    /// Return 0 unless the whole request can be satisfied
    Full,
}

/// The core effect trait - implemented by every DSP stage
pub trait Effect: Send {
    /// Registry name of this effect
    fn name(&self) -> &'static str;

    /// Parse positional parameters and prepare the effect
    ///
    /// An empty argument list creates the effect switched off.
    fn init(&mut self, args: &[&str]) -> EffectResult<()>;

    /// Apply a runtime option
    ///
    /// A failure switches the effect off; the error is returned for logging
    /// only.
    fn set(&mut self, key: &str, value: &str) -> EffectResult<()>;

    /// Queue input samples, returning how many were accepted
    fn send(&mut self, samples: &[Sample]) -> EffectResult<usize>;

    /// Pull processed samples into `out`
    fn receive(&mut self, out: &mut [Sample], mode: ReadMode) -> EffectResult<usize>;

    /// Pull remaining buffered samples at end of stream
    fn flush(&mut self, out: &mut [Sample]) -> EffectResult<usize>;

    /// Release owned resources
    fn close(&mut self) {}

    /// Whether the effect currently processes (false means pass-through)
    fn is_on(&self) -> bool;
}

/// Input/output FIFOs and the on/off switch every effect carries
#[derive(Debug, Default)]
pub struct StreamBuffers {
    pub fifo_in: SampleFifo,
    pub fifo_out: SampleFifo,
    pub effect_on: bool,
    scratch_in: Vec<Sample>,
    scratch_out: Vec<Sample>,
}

impl StreamBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append input; empty input is rejected
    pub fn send(&mut self, samples: &[Sample]) -> EffectResult<usize> {
        if samples.is_empty() {
            return Err(EffectError::NullPoint("samples"));
        }
        Ok(self.fifo_in.write(samples))
    }

    /// Move everything queued on the input side straight to the output
    pub fn pass_through(&mut self) {
        self.scratch_out.resize(self.fifo_in.len(), 0);
        let n = self.fifo_in.read(&mut self.scratch_out);
        self.fifo_out.write(&self.scratch_out[..n]);
    }

    /// Run `kernel` over the queued input in blocks of at most `block` samples
    ///
    /// The kernel receives an input block and an output block of the same
    /// length and returns how many output samples it produced.
    pub fn process_blocks<F>(&mut self, block: usize, mut kernel: F)
    where
        F: FnMut(&[Sample], &mut [Sample]) -> usize,
    {
        self.scratch_in.resize(block, 0);
        self.scratch_out.resize(block, 0);
        loop {
            let n = self.fifo_in.read(&mut self.scratch_in[..block]);
            if n == 0 {
                break;
            }
            let produced = kernel(&self.scratch_in[..n], &mut self.scratch_out[..n]);
            self.fifo_out.write(&self.scratch_out[..produced.min(n)]);
        }
    }

    /// Like [`process_blocks`](Self::process_blocks) but only whole blocks
    /// are taken from the input; a shorter tail stays queued
    pub fn process_whole_blocks<F>(&mut self, block: usize, mut kernel: F)
    where
        F: FnMut(&[Sample], &mut [Sample]),
    {
        self.scratch_in.resize(block, 0);
        self.scratch_out.resize(block, 0);
        while self.fifo_in.len() >= block {
            self.fifo_in.read(&mut self.scratch_in[..block]);
            kernel(&self.scratch_in[..block], &mut self.scratch_out[..block]);
            self.fifo_out.write(&self.scratch_out[..block]);
        }
    }

    /// Hand processed output to the caller according to `mode`
    pub fn read_output(&mut self, out: &mut [Sample], mode: ReadMode) -> usize {
        if mode == ReadMode::Full && self.fifo_out.len() < out.len() {
            return 0;
        }
        self.fifo_out.read(out)
    }

    /// Drop pending samples on both sides
    pub fn clear(&mut self) {
        self.fifo_in.clear();
        self.fifo_out.clear();
    }
}

/// One effect instance together with its options and shared flags
///
/// All entry points take `&self`; the effect state sits behind a mutex so a
/// control thread may call [`set`](Self::set) while the worker thread pumps
/// samples.
pub struct EffectContext {
    handler: &'static EffectHandler,
    signal: SignalInfo,
    options: Mutex<BTreeMap<String, String>>,
    return_max_nb_samples: AtomicBool,
    effect: Mutex<Box<dyn Effect>>,
}

impl EffectContext {
    /// Instantiate the effect described by `handler`
    pub fn create(handler: &'static EffectHandler, sample_rate: u32, channels: u16) -> Self {
        let signal = SignalInfo::new(sample_rate, channels);
        log::debug!(
            "create_effect: {} ({}Hz, {} channels)",
            handler.name,
            sample_rate,
            channels
        );
        Self {
            handler,
            signal,
            options: Mutex::new(BTreeMap::new()),
            return_max_nb_samples: AtomicBool::new(false),
            effect: Mutex::new((handler.create)(signal)),
        }
    }

    /// Look up `name` in the registry and instantiate it
    pub fn create_by_name(name: &str, sample_rate: u32, channels: u16) -> Option<Self> {
        find_effect(name).map(|handler| Self::create(handler, sample_rate, channels))
    }

    pub fn name(&self) -> &'static str {
        self.handler.name
    }

    pub fn usage(&self) -> &'static str {
        self.handler.usage
    }

    pub fn signal(&self) -> SignalInfo {
        self.signal
    }

    fn lock(&self) -> EffectResult<MutexGuard<'_, Box<dyn Effect>>> {
        self.effect
            .lock()
            .map_err(|_| EffectError::InvalidState(format!("{} effect lock poisoned", self.name())))
    }

    /// Initialise with positional arguments (no effect name in front)
    pub fn init(&self, args: &[&str]) -> EffectResult<()> {
        self.lock()?.init(args).map_err(|e| {
            log::error!("init_effect: {} failed: {}", self.name(), e);
            e
        })
    }

    /// Store `key = value` in the options dictionary and apply it
    pub fn set(&self, key: &str, value: &str) -> EffectResult<()> {
        {
            let mut options = self.options.lock().unwrap_or_else(|e| e.into_inner());
            options.insert(key.to_string(), value.to_string());
        }
        log::info!("set_effect: {} {} = {}", self.name(), key, value);
        let result = self.lock()?.set(key, value);
        if let Err(e) = &result {
            log::warn!("set_effect: {} switched off: {}", self.name(), e);
        }
        result
    }

    /// Value previously stored for `key` (case-insensitive)
    pub fn option(&self, key: &str) -> Option<String> {
        let options = self.options.lock().unwrap_or_else(|e| e.into_inner());
        options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
    }

    /// Make `receive` return 0 instead of short reads
    pub fn set_return_max_nb_samples(&self, enabled: bool) {
        self.return_max_nb_samples.store(enabled, Ordering::Release);
    }

    pub fn send(&self, samples: &[Sample]) -> EffectResult<usize> {
        self.lock()?.send(samples)
    }

    pub fn receive(&self, out: &mut [Sample]) -> EffectResult<usize> {
        let mode = if self.return_max_nb_samples.load(Ordering::Acquire) {
            ReadMode::Full
        } else {
            ReadMode::Partial
        };
        self.lock()?.receive(out, mode)
    }

    pub fn flush(&self, out: &mut [Sample]) -> EffectResult<usize> {
        self.lock()?.flush(out)
    }

    pub fn is_on(&self) -> bool {
        self.lock().map(|e| e.is_on()).unwrap_or(false)
    }

    /// Release the effect's resources
    pub fn close(&self) {
        if let Ok(mut effect) = self.lock() {
            effect.close();
        }
    }
}

impl Drop for EffectContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_buffers_pass_through() {
        let mut buffers = StreamBuffers::new();
        buffers.send(&[1, 2, 3, 4]).unwrap();
        buffers.pass_through();
        let mut out = [0; 4];
        assert_eq!(buffers.read_output(&mut out, ReadMode::Partial), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_stream_buffers_reject_empty_send() {
        let mut buffers = StreamBuffers::new();
        assert!(matches!(buffers.send(&[]), Err(EffectError::NullPoint(_))));
    }

    #[test]
    fn test_full_read_mode_waits_for_enough_output() {
        let mut buffers = StreamBuffers::new();
        buffers.send(&[5; 10]).unwrap();
        buffers.pass_through();
        let mut out = [0; 16];
        assert_eq!(buffers.read_output(&mut out, ReadMode::Full), 0);
        assert_eq!(buffers.read_output(&mut out[..8], ReadMode::Full), 8);
        assert_eq!(buffers.read_output(&mut out, ReadMode::Partial), 2);
    }

    #[test]
    fn test_process_whole_blocks_keeps_tail() {
        let mut buffers = StreamBuffers::new();
        buffers.send(&[1; 10]).unwrap();
        buffers.process_whole_blocks(4, |input, output| {
            for (o, i) in output.iter_mut().zip(input) {
                *o = i * 2;
            }
        });
        assert_eq!(buffers.fifo_out.len(), 8);
        assert_eq!(buffers.fifo_in.len(), 2);
    }

    #[test]
    fn test_context_options_and_lookup() {
        let ctx = EffectContext::create_by_name("lowpass", 44100, 1).unwrap();
        assert_eq!(ctx.name(), "lowpass");
        assert!(!ctx.is_on());
        ctx.set("lowpass", "1000").unwrap();
        assert!(ctx.is_on());
        assert_eq!(ctx.option("LOWPASS").as_deref(), Some("1000"));
        assert!(EffectContext::create_by_name("no-such-effect", 44100, 1).is_none());
    }
}
