//! Timed audio sources and their queues
//!
//! An [`AudioSource`] is one clip placed on the master timeline: the file,
//! the crop window inside the file, the placement window on the timeline,
//! gain settings, and the running mixer state carried between buffers. Its
//! decoder is opened lazily by [`update_source`] and dropped once the clip's
//! window is exhausted.
//!
//! [`AudioSourceQueue`] keeps pending sources sorted by start time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::chain::VoiceEffectSettings;
use crate::decoder::{open_decoder, AudioDecoder, DecoderConfig, DecoderKind};
use crate::error::{DecodeError, EffectError, EffectResult};
use crate::mixer::FadeInOut;

/// One clip placed on the timeline
pub struct AudioSource {
    pub file_path: String,
    pub crop_start_ms: i64,
    /// `-1` (or any value <= 0) plays to the end of the file
    pub crop_end_ms: i64,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    /// Linear gain, 0-1
    pub volume: f32,
    pub fade: FadeInOut,
    pub side_chain_enable: bool,
    /// Makeup gain as a fraction of the configured maximum, 0-1
    pub makeup_gain: f32,
    pub decoder_kind: DecoderKind,
    /// Source format for raw PCM input
    pub src_sample_rate: u32,
    pub src_channels: u16,
    /// Per-source voice effects
    pub effects: VoiceEffectSettings,
    pub left_factor: f32,
    pub right_factor: f32,
    /// Side-chain envelope memory in dB
    pub yl_prev: f32,
    decoder: Option<Box<dyn AudioDecoder>>,
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource")
            .field("file_path", &self.file_path)
            .field("crop", &(self.crop_start_ms, self.crop_end_ms))
            .field("window", &(self.start_time_ms, self.end_time_ms))
            .field("volume", &self.volume)
            .field("side_chain_enable", &self.side_chain_enable)
            .field("decoder_open", &self.decoder.is_some())
            .finish()
    }
}

impl AudioSource {
    pub fn new(file_path: impl Into<String>, start_time_ms: i64, end_time_ms: i64) -> Self {
        Self {
            file_path: file_path.into(),
            crop_start_ms: 0,
            crop_end_ms: -1,
            start_time_ms,
            end_time_ms,
            volume: 1.0,
            fade: FadeInOut::default(),
            side_chain_enable: false,
            makeup_gain: 0.0,
            decoder_kind: DecoderKind::Media,
            src_sample_rate: 0,
            src_channels: 0,
            effects: VoiceEffectSettings::default(),
            left_factor: 1.0,
            right_factor: 1.0,
            yl_prev: 0.0,
            decoder: None,
        }
    }

    /// Copy of the descriptor without its decoder or running mixer state
    pub fn unopened(&self) -> Self {
        let mut copy = Self::new(self.file_path.clone(), self.start_time_ms, self.end_time_ms);
        copy.crop_start_ms = self.crop_start_ms;
        copy.crop_end_ms = self.crop_end_ms;
        copy.volume = self.volume;
        copy.fade = self.fade;
        copy.side_chain_enable = self.side_chain_enable;
        copy.makeup_gain = self.makeup_gain;
        copy.decoder_kind = self.decoder_kind;
        copy.src_sample_rate = self.src_sample_rate;
        copy.src_channels = self.src_channels;
        copy.effects = self.effects.clone();
        copy
    }

    /// Length of the placement window
    pub fn window_ms(&self) -> i64 {
        self.end_time_ms - self.start_time_ms
    }

    pub fn decoder(&self) -> Option<&dyn AudioDecoder> {
        self.decoder.as_deref()
    }

    pub fn decoder_mut(&mut self) -> Option<&mut (dyn AudioDecoder + 'static)> {
        self.decoder.as_deref_mut()
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Open the decoder at the destination format, apply the crop and rewind
    /// to the crop start
    ///
    /// `makeup_db_max` scales `makeup_gain` into the initial side-chain
    /// envelope.
    pub fn open(&mut self, dst_sample_rate: u32, dst_channels: u16, makeup_db_max: f32) -> Result<(), DecodeError> {
        let config = DecoderConfig {
            path: self.file_path.clone().into(),
            src_sample_rate: if self.src_sample_rate > 0 { self.src_sample_rate } else { dst_sample_rate },
            src_channels: if self.src_channels > 0 { self.src_channels } else { dst_channels },
            dst_sample_rate,
            dst_channels,
            volume: 1.0,
            kind: self.decoder_kind,
        };
        let mut decoder = open_decoder(&config)?;
        decoder.set_crop(self.crop_start_ms, self.crop_end_ms)?;
        decoder.seek_to(0)?;
        self.decoder = Some(decoder);
        self.yl_prev = self.makeup_gain * makeup_db_max;
        Ok(())
    }

    /// Drop the decoder; the source is exhausted
    pub fn release(&mut self) {
        if self.decoder.take().is_some() {
            log::info!("release_source: {} [{}, {})", self.file_path, self.start_time_ms, self.end_time_ms);
        }
    }

    /// Reset the running mixer state
    pub fn reset_gain_state(&mut self) {
        self.left_factor = 1.0;
        self.right_factor = 1.0;
        self.yl_prev = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AudioSourceQueue
// ═══════════════════════════════════════════════════════════════════════════════

/// Pending sources in ascending `start_time_ms` order
#[derive(Default)]
pub struct AudioSourceQueue {
    sources: Mutex<VecDeque<AudioSource>>,
}

impl fmt::Debug for AudioSourceQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lock().iter()).finish()
    }
}

impl AudioSourceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AudioSource>> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a source; sources without a file path are rejected
    pub fn put(&self, source: AudioSource) -> EffectResult<()> {
        if source.file_path.trim().is_empty() {
            return Err(EffectError::InvalidParameter("audio source without file_path".into()));
        }
        if source.end_time_ms < source.start_time_ms {
            return Err(EffectError::InvalidParameter(format!(
                "{}: end {} ms before start {} ms",
                source.file_path, source.end_time_ms, source.start_time_ms
            )));
        }
        self.lock().push_back(source);
        Ok(())
    }

    /// Append every valid source and re-sort; invalid ones are logged and skipped
    pub fn extend(&self, sources: impl IntoIterator<Item = AudioSource>) {
        for source in sources {
            let path = source.file_path.clone();
            if let Err(e) = self.put(source) {
                log::warn!("source_queue_put: skipping `{}': {}", path, e);
            }
        }
        self.sort();
    }

    /// Stable sort by start time
    pub fn sort(&self) {
        self.lock().make_contiguous().sort_by_key(|s| s.start_time_ms);
    }

    /// Pop the earliest source
    pub fn get(&self) -> Option<AudioSource> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every pending source
    pub fn flush(&self) {
        self.lock().clear();
    }

    /// Latest end time among the pending sources
    pub fn end_time_ms(&self) -> i64 {
        self.lock().iter().map(|s| s.end_time_ms).max().unwrap_or(0)
    }

    /// Start times in queue order
    pub fn start_times(&self) -> Vec<i64> {
        self.lock().iter().map(|s| s.start_time_ms).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduling
// ═══════════════════════════════════════════════════════════════════════════════

/// Target format and side-chain scaling used when a source is opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub makeup_db_max: f32,
}

/// Advance `current` to the next queued source once it is exhausted
///
/// A current source that still has its decoder is kept. Otherwise the next
/// source is popped, its decoder opened (crop applied) and positioned at 0.
/// Sources that fail to open or rewind are logged and skipped.
pub fn update_source(queue: &AudioSourceQueue, current: &mut Option<AudioSource>, params: OpenParams) {
    if current.as_ref().is_some_and(AudioSource::has_decoder) {
        return;
    }
    *current = None;
    while let Some(mut source) = queue.get() {
        match source.open(params.sample_rate, params.channels, params.makeup_db_max) {
            Ok(()) => {
                log::info!(
                    "update_source: {} [{}, {}) ms",
                    source.file_path,
                    source.start_time_ms,
                    source.end_time_ms
                );
                *current = Some(source);
                return;
            }
            Err(e) => log::error!("update_source: failed to open {}: {}", source.file_path, e),
        }
    }
}

/// Reposition a queue and its current source at `target_ms`
///
/// Sources whose window ends at or before `target_ms` are discarded. The
/// first remaining source becomes current; its decoder is positioned at 0
/// when `target_ms` precedes its start, else at `target_ms - start` clamped
/// into the clip's duration.
pub fn seek_to(
    queue: &AudioSourceQueue,
    current: &mut Option<AudioSource>,
    target_ms: i64,
    params: OpenParams,
) -> EffectResult<()> {
    loop {
        let candidate = match current.take() {
            Some(source) => source,
            None => match queue.get() {
                Some(source) => source,
                None => return Ok(()),
            },
        };
        if candidate.end_time_ms <= target_ms {
            log::debug!("seek_to: dropping {} (ends at {} ms)", candidate.file_path, candidate.end_time_ms);
            continue;
        }
        *current = Some(candidate);
        break;
    }

    let Some(source) = current.as_mut() else {
        return Ok(());
    };
    if !source.has_decoder() {
        source.open(params.sample_rate, params.channels, params.makeup_db_max)?;
    }
    let start = source.start_time_ms;
    if let Some(decoder) = source.decoder_mut() {
        let offset = if target_ms < start {
            0
        } else {
            (target_ms - start).clamp(0, decoder.duration_ms())
        };
        decoder.seek_to(offset)?;
        log::info!("seek_to: {} ms -> {} at offset {} ms", target_ms, source.file_path, offset);
    }
    Ok(())
}
