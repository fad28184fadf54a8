//! Raw PCM decoder
//!
//! Headerless native-endian signed 16-bit interleaved samples. The file
//! carries no format, so the source rate and channel count come from the
//! [`DecoderConfig`].

use super::{render_s16, AudioDecoder, ClipBuffer, DecodeResult, DecoderConfig};
use crate::error::DecodeError;
use crate::types::Sample;

pub struct PcmDecoder {
    clip: ClipBuffer,
}

impl PcmDecoder {
    pub fn open(config: &DecoderConfig) -> DecodeResult<Self> {
        if config.src_sample_rate == 0 || config.dst_sample_rate == 0 {
            return Err(DecodeError::UnsupportedFormat("sample rate of 0".into()));
        }
        let bytes = std::fs::read(&config.path).map_err(|e| DecodeError::Open {
            path: config.path.display().to_string(),
            source: e,
        })?;
        // A dangling odd byte cannot form a sample
        let whole = bytes.len() & !1;
        let raw: Vec<Sample> = bytemuck::pod_collect_to_vec(&bytes[..whole]);
        let samples = render_s16(&raw, config.src_sample_rate, config.src_channels, config)?;
        log::debug!(
            "PcmDecoder: {} samples from {} ({} bytes)",
            samples.len(),
            config.path.display(),
            bytes.len()
        );
        Ok(Self {
            clip: ClipBuffer::new(samples, config.dst_sample_rate, config.dst_channels),
        })
    }
}

impl AudioDecoder for PcmDecoder {
    fn get_pcm_frame(&mut self, buf: &mut [Sample], looping: bool) -> DecodeResult<usize> {
        self.clip.read(buf, looping)
    }

    fn seek_to(&mut self, ms: i64) -> DecodeResult<()> {
        self.clip.seek_to(ms);
        Ok(())
    }

    fn set_crop(&mut self, start_ms: i64, end_ms: i64) -> DecodeResult<()> {
        self.clip.set_crop(start_ms, end_ms)
    }

    fn out_sample_rate(&self) -> u32 {
        self.clip.sample_rate()
    }

    fn out_channels(&self) -> u16 {
        self.clip.channels()
    }

    fn duration_ms(&self) -> i64 {
        self.clip.duration_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderKind;
    use std::io::Write;

    fn write_pcm(samples: &[Sample]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytemuck::cast_slice(samples)).unwrap();
        file.flush().unwrap();
        file
    }

    fn config(file: &tempfile::NamedTempFile, rate: u32, channels: u16) -> DecoderConfig {
        DecoderConfig {
            kind: DecoderKind::Pcm,
            ..DecoderConfig::new(file.path(), rate, channels)
        }
    }

    #[test]
    fn test_same_format_is_exact() {
        let input: Vec<Sample> = (0..800).map(|i| (i * 41 % 3000) as Sample - 1500).collect();
        let file = write_pcm(&input);
        let mut decoder = PcmDecoder::open(&config(&file, 8000, 1)).unwrap();
        assert_eq!(decoder.duration_ms(), 100);
        let mut buf = vec![0; 1000];
        assert_eq!(decoder.get_pcm_frame(&mut buf, false).unwrap(), 800);
        assert_eq!(&buf[..800], input.as_slice());
        assert!(decoder.get_pcm_frame(&mut buf, false).is_err());
    }

    #[test]
    fn test_crop_seek_and_loop() {
        let input: Vec<Sample> = (0..1000).map(|i| i as Sample).collect();
        let file = write_pcm(&input);
        // 1 kHz mono, one sample per millisecond
        let mut decoder = PcmDecoder::open(&config(&file, 1000, 1)).unwrap();
        decoder.set_crop(100, 200).unwrap();
        decoder.seek_to(90).unwrap();
        let mut buf = vec![0; 30];
        assert_eq!(decoder.get_pcm_frame(&mut buf, true).unwrap(), 30);
        assert_eq!(buf[0], 190);
        assert_eq!(buf[10], 100);
    }

    #[test]
    fn test_mono_to_stereo() {
        let file = write_pcm(&[1000, -1000, 2000, -2000]);
        let cfg = DecoderConfig {
            src_channels: 1,
            ..config(&file, 8000, 2)
        };
        let mut decoder = PcmDecoder::open(&cfg).unwrap();
        assert_eq!(decoder.out_channels(), 2);
        let mut buf = vec![0; 8];
        assert_eq!(decoder.get_pcm_frame(&mut buf, false).unwrap(), 8);
        assert_eq!(buf, vec![1000, 1000, -1000, -1000, 2000, 2000, -2000, -2000]);
    }

    #[test]
    fn test_missing_file() {
        let cfg = DecoderConfig {
            kind: DecoderKind::Pcm,
            ..DecoderConfig::new("/nonexistent/voice.pcm", 44100, 1)
        };
        assert!(matches!(PcmDecoder::open(&cfg), Err(DecodeError::Open { .. })));
    }
}
