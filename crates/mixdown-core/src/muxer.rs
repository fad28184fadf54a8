//! Output muxers
//!
//! A [`Muxer`] consumes interleaved i16 frames and writes the output file.
//! Only the RIFF/WAVE container is produced here: the header goes out as a
//! placeholder when the muxer is created and is rewritten with the final
//! sizes on [`Muxer::stop`]. A muxer dropped without `stop` still leaves a
//! readable file behind.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::{EffectError, EffectResult};
use crate::types::{Sample, BITS_PER_SAMPLE};

pub const MIME_WAV: &str = "audio/wav";
pub const CODEC_PCM_S16LE: &str = "pcm_s16le";

/// Output stream description
#[derive(Debug, Clone, PartialEq)]
pub struct MuxerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Ignored by uncompressed containers
    pub bit_rate: u32,
    pub mime: String,
    pub codec: String,
    pub output_path: PathBuf,
}

impl MuxerConfig {
    /// WAV output at `sample_rate`/`channels`
    pub fn wav(output_path: impl Into<PathBuf>, sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_rate: 0,
            mime: MIME_WAV.to_string(),
            codec: CODEC_PCM_S16LE.to_string(),
            output_path: output_path.into(),
        }
    }
}

/// Sink for mixed or processed PCM
pub trait Muxer: Send {
    fn write_audio_frame(&mut self, samples: &[Sample]) -> EffectResult<()>;

    /// Finalize the container. Later calls are no-ops.
    fn stop(&mut self) -> EffectResult<()>;

    /// Interleaved samples written so far
    fn samples_written(&self) -> u64;
}

/// Create the muxer matching `config.mime`
pub fn create_muxer(config: &MuxerConfig) -> EffectResult<Box<dyn Muxer>> {
    let mime = config.mime.to_ascii_lowercase();
    match mime.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Ok(Box::new(WavMuxer::create(config)?)),
        _ => Err(EffectError::Mux(format!("unsupported output type {}", config.mime))),
    }
}

/// RIFF/WAVE writer for 16-bit PCM
pub struct WavMuxer {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    written: u64,
}

impl WavMuxer {
    pub fn create(config: &MuxerConfig) -> EffectResult<Self> {
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(EffectError::InvalidParameter(format!(
                "muxer format {}Hz x{}",
                config.sample_rate, config.channels
            )));
        }
        if !config.codec.eq_ignore_ascii_case(CODEC_PCM_S16LE) {
            log::warn!("muxer_create: codec {} not supported, writing {}", config.codec, CODEC_PCM_S16LE);
        }
        if let Some(parent) = config.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let spec = WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&config.output_path, spec)
            .map_err(|e| EffectError::Mux(format!("{}: {}", config.output_path.display(), e)))?;
        log::info!(
            "muxer_create: {} {}Hz x{} {}",
            config.output_path.display(),
            config.sample_rate,
            config.channels,
            config.codec
        );
        Ok(Self {
            writer: Some(writer),
            path: config.output_path.clone(),
            written: 0,
        })
    }
}

impl Muxer for WavMuxer {
    fn write_audio_frame(&mut self, samples: &[Sample]) -> EffectResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EffectError::Mux(format!("{} already stopped", self.path.display())))?;
        for &sample in samples {
            writer.write_sample(sample).map_err(|e| EffectError::Mux(e.to_string()))?;
        }
        self.written += samples.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> EffectResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        writer.finalize().map_err(|e| EffectError::Mux(e.to_string()))?;
        log::info!("muxer_stop: {} samples to {}", self.written, self.path.display());
        Ok(())
    }

    fn samples_written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_header_is_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/mix.wav");
        let mut muxer = create_muxer(&MuxerConfig::wav(&path, 8000, 2)).unwrap();
        muxer.write_audio_frame(&[1, -1, 2, -2]).unwrap();
        muxer.write_audio_frame(&[3, -3]).unwrap();
        assert_eq!(muxer.samples_written(), 6);
        muxer.stop().unwrap();
        muxer.stop().unwrap();
        assert!(muxer.write_audio_frame(&[0, 0]).is_err());

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!((spec.sample_rate, spec.channels, spec.bits_per_sample), (8000, 2, 16));
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, -1, 2, -2, 3, -3]);
    }

    #[test]
    fn test_unsupported_mime() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MuxerConfig::wav(dir.path().join("a.m4a"), 44100, 2);
        config.mime = "audio/mp4a-latm".into();
        assert!(matches!(create_muxer(&config), Err(EffectError::Mux(_))));
    }

    #[test]
    fn test_rejects_empty_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = MuxerConfig::wav(dir.path().join("a.wav"), 0, 2);
        assert!(matches!(create_muxer(&config), Err(EffectError::InvalidParameter(_))));
    }
}
