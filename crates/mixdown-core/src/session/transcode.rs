//! Media to WAV transcoding

use std::path::Path;

use super::{SessionHandle, SessionStatus};
use crate::decoder::{open_decoder, probe_format, AudioDecoder, DecoderConfig, DecoderKind};
use crate::error::{DecodeError, EffectError, EffectResult};
use crate::muxer::{create_muxer, Muxer, MuxerConfig};
use crate::types::{ms_to_samples, MAX_NB_SAMPLES};

/// Decodes a media file at its native rate and channel count and writes it
/// as 16-bit WAV
pub struct TranscodeSession {
    handle: SessionHandle,
}

impl Default for TranscodeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscodeSession {
    pub fn new() -> Self {
        let handle = SessionHandle::default();
        handle.set_status(SessionStatus::Initialized);
        Self { handle }
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

    /// Transcode `in_path` into `out_path`
    ///
    /// Allowed from INITIALIZED, COMPLETED or ERROR. A stop request ends the
    /// job early with a valid, shorter file.
    pub fn transcode(&mut self, in_path: &Path, out_path: &Path) -> EffectResult<()> {
        log::info!("transcode: {} -> {}", in_path.display(), out_path.display());
        let status = self.handle.status();
        if !matches!(
            status,
            SessionStatus::Initialized | SessionStatus::Completed | SessionStatus::Error
        ) {
            return Err(EffectError::InvalidState(format!("transcode from {:?}", status)));
        }
        self.handle.begin();
        let result = self.transcode_l(in_path, out_path);
        match &result {
            Ok(()) => self.handle.complete(),
            Err(e) => {
                log::error!("transcode: {}", e);
                self.handle.fail();
            }
        }
        result
    }

    fn transcode_l(&mut self, in_path: &Path, out_path: &Path) -> EffectResult<()> {
        let (sample_rate, channels) = probe_format(in_path)?;
        let config = DecoderConfig {
            kind: DecoderKind::Media,
            ..DecoderConfig::new(in_path, sample_rate, channels)
        };
        let mut decoder = open_decoder(&config)?;
        let total = ms_to_samples(decoder.duration_ms(), sample_rate, channels).max(1);
        log::info!(
            "transcode: {}Hz x{}, {} ms",
            sample_rate,
            channels,
            decoder.duration_ms()
        );

        let mut muxer = create_muxer(&MuxerConfig::wav(out_path, sample_rate, channels))?;
        let copied = self.copy(decoder.as_mut(), muxer.as_mut(), total);
        // The header is finalized even when the copy failed part way
        let stopped = muxer.stop();
        copied?;
        stopped
    }

    fn copy(&self, decoder: &mut dyn AudioDecoder, muxer: &mut dyn Muxer, total: usize) -> EffectResult<()> {
        let mut buf = vec![0; MAX_NB_SAMPLES];
        let mut done = 0;
        loop {
            if self.handle.is_aborted() {
                log::info!("transcode: aborted after {} samples", done);
                return Ok(());
            }
            self.handle.set_progress((done as f64 / total as f64 * 100.0) as i32);
            let n = match decoder.get_pcm_frame(&mut buf, false) {
                Ok(0) | Err(DecodeError::EndOfStream) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(e.into()),
            };
            muxer.write_audio_frame(&buf[..n])?;
            done += n;
        }
    }
}
