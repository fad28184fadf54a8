//! Voice effect session

use std::path::Path;

use super::{SessionHandle, SessionStatus};
use crate::chain::{VoiceEffectSettings, VoiceEffects};
use crate::config::SessionConfig;
use crate::decoder::{probe_format, DecoderKind};
use crate::error::{ConfigError, DecodeError, EffectError, EffectResult};
use crate::fifo::SampleFifo;
use crate::muxer::{create_muxer, MuxerConfig};
use crate::source::{self, update_source, AudioSource, AudioSourceQueue, OpenParams};
use crate::types::{ms_to_samples, samples_to_ms, Sample, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, MAX_NB_SAMPLES};

/// Runs the record track through the voice effects
///
/// The timeline runs from 0 to the latest record end time. Gaps before and
/// between record sources come out as silence, which bypasses the effects.
pub struct EffectSession {
    handle: SessionHandle,
    sample_rate: u32,
    channels: u16,
    duration_ms: i64,
    /// Interleaved samples produced on the timeline so far
    cur_size: usize,
    /// Record sources as configured, for seeking backwards
    sources: Vec<AudioSource>,
    queue: AudioSourceQueue,
    current: Option<AudioSource>,
    settings: VoiceEffectSettings,
    /// Settings the current chain was built from
    active: Option<VoiceEffectSettings>,
    effects: Option<VoiceEffects>,
    fifo: SampleFifo,
    frame: Vec<Sample>,
    processed: Vec<Sample>,
    flushed: bool,
    pending_error: Option<EffectError>,
}

impl Default for EffectSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectSession {
    pub fn new() -> Self {
        Self {
            handle: SessionHandle::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            duration_ms: 0,
            cur_size: 0,
            sources: Vec::new(),
            queue: AudioSourceQueue::new(),
            current: None,
            settings: VoiceEffectSettings::default(),
            active: None,
            effects: None,
            fifo: SampleFifo::default(),
            frame: vec![0; MAX_NB_SAMPLES],
            processed: Vec::with_capacity(MAX_NB_SAMPLES),
            flushed: false,
            pending_error: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.handle.status()
    }

    pub fn progress(&self) -> i32 {
        self.handle.progress()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Current position on the record timeline
    pub fn position_ms(&self) -> i64 {
        samples_to_ms(self.cur_size, self.sample_rate, self.channels)
    }

    /// Load the record track and build the voice effects
    ///
    /// The output format is the first record source's native format (mono
    /// or stereo). On failure the session is emptied and left in ERROR.
    pub fn init(&mut self, config: SessionConfig) -> EffectResult<()> {
        log::info!("effect_session_init");
        self.reset();
        self.handle.clear_abort();
        match self.init_l(config) {
            Ok(()) => {
                log::info!(
                    "effect_session_init: {}Hz x{}, {} ms, effects {:?}",
                    self.sample_rate,
                    self.channels,
                    self.duration_ms,
                    self.settings.iter().map(|(slot, _)| slot.config_name()).collect::<Vec<_>>()
                );
                self.handle.set_status(SessionStatus::Initialized);
                Ok(())
            }
            Err(e) => {
                log::error!("effect_session_init: {}", e);
                self.reset();
                self.handle.set_status(SessionStatus::Error);
                Err(e)
            }
        }
    }

    fn init_l(&mut self, config: SessionConfig) -> EffectResult<()> {
        let SessionConfig { record, effects, .. } = config;
        let first = record.first().ok_or(ConfigError::NoRecordSource)?;
        let (sample_rate, channels) = record_format(first)?;
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.settings = effects;

        self.sources = record.iter().map(AudioSource::unopened).collect();
        self.queue.extend(record);
        self.duration_ms = self.queue.end_time_ms();

        let params = self.open_params();
        update_source(&self.queue, &mut self.current, params);
        if self.current.is_none() {
            return Err(ConfigError::NoRecordSource.into());
        }
        self.sync_effects()?;
        self.fifo = SampleFifo::with_capacity(2 * MAX_NB_SAMPLES);
        Ok(())
    }

    fn reset(&mut self) {
        self.duration_ms = 0;
        self.cur_size = 0;
        self.sources.clear();
        self.queue.flush();
        self.current = None;
        self.active = None;
        self.effects = None;
        self.fifo.clear();
        self.flushed = false;
        self.pending_error = None;
    }

    fn open_params(&self) -> OpenParams {
        OpenParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            makeup_db_max: 0.0,
        }
    }

    fn check_ready(&self) -> EffectResult<()> {
        match self.handle.status() {
            SessionStatus::Initialized | SessionStatus::Started => Ok(()),
            status => Err(EffectError::InvalidState(format!("no frames in {:?}", status))),
        }
    }

    /// Rebuild the chain when the current source asks for other effects
    fn sync_effects(&mut self) -> EffectResult<()> {
        let wanted = match self.current.as_ref() {
            Some(source) if !source.effects.is_empty() => source.effects.clone(),
            _ => self.settings.clone(),
        };
        if self.active.as_ref() == Some(&wanted) {
            return Ok(());
        }
        if let Some(old) = self.effects.as_mut() {
            self.processed.clear();
            old.flush(&mut self.processed)?;
            self.fifo.write(&self.processed);
        }
        self.effects = Some(VoiceEffects::build(&wanted, self.sample_rate, self.channels));
        self.active = Some(wanted);
        Ok(())
    }

    /// Zero `len` samples at the front of the frame buffer
    fn silence(&mut self, len: usize) -> (usize, bool) {
        let ch = self.channels as usize;
        let len = len.min(MAX_NB_SAMPLES);
        let len = (len - len % ch).max(ch);
        self.frame[..len].fill(0);
        self.cur_size += len;
        (len, true)
    }

    /// Produce the next block of the record timeline into the frame buffer
    ///
    /// Returns the sample count and whether the block is pure silence.
    fn read_pcm_frame(&mut self) -> EffectResult<(usize, bool)> {
        let pos = self.position_ms();
        if pos >= self.duration_ms {
            return Err(EffectError::Eof);
        }
        let (rate, channels) = (self.sample_rate, self.channels);
        let remaining = ms_to_samples(self.duration_ms - pos, rate, channels);
        let params = self.open_params();
        loop {
            update_source(&self.queue, &mut self.current, params);
            self.sync_effects()?;

            let window = self.current.as_ref().map(|s| (s.start_time_ms, s.end_time_ms));
            match window {
                None => return Ok(self.silence(remaining)),
                Some((start, _)) if pos < start => {
                    let lead = ms_to_samples(start - pos, rate, channels);
                    return Ok(self.silence(lead.min(remaining)));
                }
                Some((_, end)) if pos < end => {
                    let ch = channels as usize;
                    let limit = ms_to_samples(end - pos, rate, channels).min(MAX_NB_SAMPLES);
                    let limit = (limit - limit % ch).max(ch);
                    let decoded = match self.current.as_mut().and_then(|s| s.decoder_mut()) {
                        Some(decoder) => match decoder.get_pcm_frame(&mut self.frame[..limit], false) {
                            Ok(n) => n,
                            Err(DecodeError::EndOfStream) => 0,
                            Err(e) => return Err(e.into()),
                        },
                        None => 0,
                    };
                    if decoded == 0 {
                        if let Some(source) = self.current.as_mut() {
                            source.release();
                        }
                        return Ok(self.silence(limit));
                    }
                    self.cur_size += decoded;
                    return Ok((decoded, false));
                }
                // Past the window: move on to the next source
                Some(_) => match self.current.as_mut() {
                    Some(source) if source.has_decoder() => source.release(),
                    _ => {
                        self.current = None;
                        if self.queue.is_empty() {
                            return Ok(self.silence(remaining));
                        }
                    }
                },
            }
        }
    }

    fn push_frame(&mut self, len: usize, silent: bool) -> EffectResult<()> {
        match self.effects.as_mut() {
            Some(effects) if !silent && !effects.is_empty() => {
                self.processed.clear();
                effects.process(&self.frame[..len], &mut self.processed)?;
                self.fifo.write(&self.processed);
            }
            _ => {
                self.fifo.write(&self.frame[..len]);
            }
        }
        Ok(())
    }

    /// Drain the effects once at end of stream
    fn finish(&mut self) {
        self.flushed = true;
        if let Some(effects) = self.effects.as_mut() {
            self.processed.clear();
            if let Err(e) = effects.flush(&mut self.processed) {
                log::warn!("effect_session: flush failed: {}", e);
            }
            self.fifo.write(&self.processed);
        }
    }

    /// Fill `buf` with processed samples
    ///
    /// Returns fewer than `buf.len()` samples only at the end of the
    /// timeline, then [`EffectError::Eof`]. A failure while reading flushes
    /// the effects first; the error is reported once the buffered output
    /// has been handed out.
    pub fn get_frame(&mut self, buf: &mut [Sample]) -> EffectResult<usize> {
        self.check_ready()?;
        while self.fifo.len() < buf.len() && !self.flushed {
            let step = self
                .read_pcm_frame()
                .and_then(|(len, silent)| self.push_frame(len, silent));
            if let Err(e) = step {
                if !e.is_eof() {
                    log::error!("effect_session_get_frame: {}", e);
                    self.pending_error = Some(e);
                }
                self.finish();
            }
        }
        let n = self.fifo.read(buf);
        if n > 0 {
            return Ok(n);
        }
        Err(self.pending_error.take().unwrap_or(EffectError::Eof))
    }

    /// Move the timeline to `ms`, clamped into `[0, duration]`
    ///
    /// Buffered output is dropped and the effects start from a clean state.
    pub fn seek_to(&mut self, ms: i64) -> EffectResult<()> {
        self.check_ready()?;
        let ms = ms.clamp(0, self.duration_ms.max(0));
        log::info!("effect_session_seek_to: {} ms", ms);
        self.cur_size = ms_to_samples(ms, self.sample_rate, self.channels);
        self.fifo.clear();
        self.flushed = false;
        self.pending_error = None;

        self.queue.flush();
        self.current = None;
        self.queue.extend(self.sources.iter().map(AudioSource::unopened));
        let params = self.open_params();
        source::seek_to(&self.queue, &mut self.current, ms, params)?;

        self.effects = None;
        self.active = None;
        self.sync_effects()
    }

    /// Process the whole timeline into a WAV file at `out_path`
    ///
    /// Allowed once after [`init`](Self::init). A stop request ends the pass
    /// early with a valid, shorter file.
    pub fn add_effects(&mut self, out_path: &Path) -> EffectResult<()> {
        log::info!("add_effects: {}", out_path.display());
        let status = self.handle.status();
        if status != SessionStatus::Initialized {
            return Err(EffectError::InvalidState(format!("add_effects from {:?}", status)));
        }
        self.handle.begin();
        match self.add_effects_l(out_path) {
            Ok(()) => {
                self.handle.complete();
                Ok(())
            }
            Err(e) => {
                log::error!("add_effects: {}", e);
                self.reset();
                self.handle.fail();
                Err(e)
            }
        }
    }

    fn add_effects_l(&mut self, out_path: &Path) -> EffectResult<()> {
        let mut muxer = create_muxer(&MuxerConfig::wav(out_path, self.sample_rate, self.channels))?;
        let mut buf = vec![0; MAX_NB_SAMPLES];
        loop {
            if self.handle.is_aborted() {
                log::info!("add_effects: aborted at {} ms", self.position_ms());
                break;
            }
            if self.duration_ms > 0 {
                let progress = self.position_ms() as f64 / self.duration_ms as f64 * 100.0;
                self.handle.set_progress(progress as i32);
            }
            match self.get_frame(&mut buf) {
                Ok(n) => muxer.write_audio_frame(&buf[..n])?,
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
        }
        muxer.stop()
    }
}

/// Output format taken from the first record source
fn record_format(source: &AudioSource) -> EffectResult<(u32, u16)> {
    let (rate, channels) = match source.decoder_kind {
        DecoderKind::Pcm => (
            if source.src_sample_rate > 0 { source.src_sample_rate } else { DEFAULT_SAMPLE_RATE },
            if source.src_channels > 0 { source.src_channels } else { DEFAULT_CHANNELS },
        ),
        DecoderKind::Media => probe_format(&source.file_path)?,
    };
    Ok((rate, channels.clamp(1, 2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RATE: u32 = 8000;

    fn pcm_file(samples: &[Sample]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytemuck::cast_slice(samples)).unwrap();
        file.flush().unwrap();
        file
    }

    /// 1000 ms mono ramp at 8 kHz: sample i holds i / 4
    fn ramp_clip() -> tempfile::NamedTempFile {
        let samples: Vec<Sample> = (0..RATE as usize).map(|i| (i / 4) as Sample).collect();
        pcm_file(&samples)
    }

    fn config(file: &tempfile::NamedTempFile, start: i64, end: i64, effects: serde_json::Value) -> SessionConfig {
        let json = serde_json::json!({
            "record": [{
                "file_path": file.path().display().to_string(),
                "startTimeMs": start,
                "endTimeMs": end,
                "isPcm": true,
                "sampleRate": RATE,
                "nbChannels": 1
            }],
            "effects": effects
        });
        SessionConfig::parse(&json.to_string()).unwrap()
    }

    fn drain(session: &mut EffectSession) -> Vec<Sample> {
        let mut out = Vec::new();
        let mut buf = vec![0; MAX_NB_SAMPLES];
        loop {
            match session.get_frame(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) => {
                    assert!(e.is_eof(), "{}", e);
                    break;
                }
            }
        }
        out
    }

    #[test]
    fn test_silence_before_start_then_source() {
        let clip = ramp_clip();
        let mut session = EffectSession::new();
        session.init(config(&clip, 500, 1500, serde_json::json!([]))).unwrap();
        assert_eq!(session.status(), SessionStatus::Initialized);
        assert_eq!((session.sample_rate(), session.channels()), (RATE, 1));
        assert_eq!(session.duration_ms(), 1500);

        let out = drain(&mut session);
        assert_eq!(out.len(), 12000);
        assert!(out[..4000].iter().all(|&s| s == 0));
        assert_eq!(out[4000], 0);
        assert_eq!(out[4004], 1);
        assert_eq!(out[11999], 1999);
    }

    #[test]
    fn test_seek_inside_source() {
        let clip = ramp_clip();
        let mut session = EffectSession::new();
        session.init(config(&clip, 500, 1500, serde_json::json!([]))).unwrap();
        let mut buf = vec![0; 100];
        session.get_frame(&mut buf).unwrap();

        session.seek_to(1000).unwrap();
        assert_eq!(session.position_ms(), 1000);
        let out = drain(&mut session);
        assert_eq!(out.len(), 4000);
        assert_eq!(out[0], 1000);

        session.seek_to(-20).unwrap();
        assert_eq!(drain(&mut session).len(), 12000);
    }

    #[test]
    fn test_add_effects_writes_wav() {
        let clip = ramp_clip();
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("voice.wav");
        let mut session = EffectSession::new();
        let effects = serde_json::json!([{"name": "VolumeLimiter", "info": "On"}]);
        session.init(config(&clip, 0, 1000, effects)).unwrap();
        session.add_effects(&out_path).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.progress(), 100);

        let reader = hound::WavReader::open(&out_path).unwrap();
        assert_eq!(reader.spec().sample_rate, RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 8000);

        assert!(matches!(session.add_effects(&out_path), Err(EffectError::InvalidState(_))));
    }

    #[test]
    fn test_stop_before_add_effects_is_honoured() {
        let clip = ramp_clip();
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("voice.wav");
        let mut session = EffectSession::new();
        session.stop();
        session.init(config(&clip, 0, 1000, serde_json::json!([]))).unwrap();
        // A stop issued before init belongs to an earlier job
        assert!(!session.handle().is_aborted());

        session.stop();
        session.add_effects(&out_path).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        let reader = hound::WavReader::open(&out_path).unwrap();
        assert_eq!(reader.len(), 0);
        assert!(!session.handle().is_aborted());
    }

    #[test]
    fn test_init_without_record_fails() {
        let mut session = EffectSession::new();
        let config = SessionConfig::parse(r#"{"bgm": []}"#).unwrap();
        assert!(matches!(
            session.init(config),
            Err(EffectError::Config(ConfigError::NoRecordSource))
        ));
        assert_eq!(session.status(), SessionStatus::Error);
        let mut buf = [0; 16];
        assert!(matches!(session.get_frame(&mut buf), Err(EffectError::InvalidState(_))));
    }

    #[test]
    fn test_gap_between_record_sources_is_silent() {
        let a = pcm_file(&vec![100; 800]);
        let b = pcm_file(&vec![200; 800]);
        let source = |file: &tempfile::NamedTempFile, start: i64, end: i64| {
            serde_json::json!({
                "file_path": file.path().display().to_string(),
                "startTimeMs": start, "endTimeMs": end,
                "isPcm": true, "sampleRate": RATE, "nbChannels": 1
            })
        };
        let json = serde_json::json!({ "record": [source(&b, 300, 400), source(&a, 0, 100)] });
        let mut session = EffectSession::new();
        session.init(SessionConfig::parse(&json.to_string()).unwrap()).unwrap();
        let out = drain(&mut session);
        assert_eq!(out.len(), 3200);
        assert!(out[..800].iter().all(|&s| s == 100));
        assert!(out[800..2400].iter().all(|&s| s == 0));
        assert!(out[2400..].iter().all(|&s| s == 200));
    }
}
