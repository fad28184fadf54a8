//! Decoders - turn a file into interleaved i16 PCM at a requested format
//!
//! Two implementations share one contract:
//! - [`PcmDecoder`]: headerless native-endian 16-bit PCM with a known
//!   source rate and channel count.
//! - [`MediaDecoder`]: any container/codec Symphonia can probe.
//!
//! Both decode the whole file up front, convert channels, resample with
//! rubato and scale by the source volume. Reads, crop and seeks are then
//! served from memory by [`ClipBuffer`].

mod media;
mod pcm;

use std::path::PathBuf;

use rubato::{FftFixedIn, Resampler};

pub use media::{probe_duration_ms, probe_format, MediaDecoder};
pub use pcm::PcmDecoder;

use crate::error::DecodeError;
use crate::types::{f32_to_s16, ms_to_samples, round_clip, samples_to_ms, Sample, BITS_PER_SAMPLE};

/// Result alias for decoder operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Which decoder implementation to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderKind {
    Pcm,
    #[default]
    Media,
}

/// Parameters for opening a decoder
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    pub path: PathBuf,
    /// Source format; only consulted for raw PCM input
    pub src_sample_rate: u32,
    pub src_channels: u16,
    pub dst_sample_rate: u32,
    pub dst_channels: u16,
    /// Linear gain, 1.0 = unchanged
    pub volume: f32,
    pub kind: DecoderKind,
}

impl DecoderConfig {
    pub fn new(path: impl Into<PathBuf>, dst_sample_rate: u32, dst_channels: u16) -> Self {
        Self {
            path: path.into(),
            src_sample_rate: dst_sample_rate,
            src_channels: dst_channels,
            dst_sample_rate,
            dst_channels,
            volume: 1.0,
            kind: DecoderKind::Media,
        }
    }
}

/// The decoder contract consumed by sources and sessions
pub trait AudioDecoder: Send {
    /// Fill `buf` with interleaved samples
    ///
    /// With `looping` the clip restarts at its crop start on end of file and
    /// the request is always satisfied completely. Without it a short count
    /// is returned at the end and [`DecodeError::EndOfStream`] afterwards.
    fn get_pcm_frame(&mut self, buf: &mut [Sample], looping: bool) -> DecodeResult<usize>;

    /// Position at `ms` into the cropped clip
    fn seek_to(&mut self, ms: i64) -> DecodeResult<()>;

    /// Restrict playback to `[start_ms, end_ms)` of the file; `end_ms <= 0`
    /// means "to the end"
    fn set_crop(&mut self, start_ms: i64, end_ms: i64) -> DecodeResult<()>;

    fn out_sample_rate(&self) -> u32;

    fn out_channels(&self) -> u16;

    fn out_bits_per_sample(&self) -> u16 {
        BITS_PER_SAMPLE
    }

    /// Length of the cropped clip
    fn duration_ms(&self) -> i64;
}

/// Open the decoder selected by `config.kind`
pub fn open_decoder(config: &DecoderConfig) -> DecodeResult<Box<dyn AudioDecoder>> {
    log::info!(
        "open_decoder: {} ({:?}, {}Hz/{}ch -> {}Hz/{}ch, volume {})",
        config.path.display(),
        config.kind,
        config.src_sample_rate,
        config.src_channels,
        config.dst_sample_rate,
        config.dst_channels,
        config.volume
    );
    Ok(match config.kind {
        DecoderKind::Pcm => Box::new(PcmDecoder::open(config)?),
        DecoderKind::Media => Box::new(MediaDecoder::open(config)?),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// ClipBuffer
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded clip with crop window and read cursor
#[derive(Debug, Clone)]
pub struct ClipBuffer {
    samples: Vec<Sample>,
    sample_rate: u32,
    channels: u16,
    crop_start: usize,
    crop_end: usize,
    pos: usize,
}

impl ClipBuffer {
    pub fn new(samples: Vec<Sample>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        Self {
            samples,
            sample_rate,
            channels,
            crop_start: 0,
            crop_end: whole,
            pos: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn whole_len(&self) -> usize {
        self.samples.len() - self.samples.len() % self.channels as usize
    }

    pub fn set_crop(&mut self, start_ms: i64, end_ms: i64) -> DecodeResult<()> {
        let len = self.whole_len();
        let start = ms_to_samples(start_ms, self.sample_rate, self.channels).min(len);
        let end = if end_ms <= 0 {
            len
        } else {
            ms_to_samples(end_ms, self.sample_rate, self.channels).min(len)
        };
        if end < start {
            return Err(DecodeError::InvalidCrop { start_ms, end_ms });
        }
        self.crop_start = start;
        self.crop_end = end;
        self.pos = start;
        Ok(())
    }

    pub fn duration_ms(&self) -> i64 {
        samples_to_ms(self.crop_end - self.crop_start, self.sample_rate, self.channels)
    }

    pub fn seek_to(&mut self, ms: i64) {
        let offset = ms_to_samples(ms, self.sample_rate, self.channels);
        self.pos = (self.crop_start + offset).min(self.crop_end);
    }

    pub fn read(&mut self, buf: &mut [Sample], looping: bool) -> DecodeResult<usize> {
        if self.crop_end <= self.crop_start {
            return Err(DecodeError::EndOfStream);
        }
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos >= self.crop_end {
                if !looping {
                    break;
                }
                self.pos = self.crop_start;
            }
            let n = (buf.len() - filled).min(self.crop_end - self.pos);
            buf[filled..filled + n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
            filled += n;
            self.pos += n;
        }
        if filled == 0 {
            return Err(DecodeError::EndOfStream);
        }
        Ok(filled)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Format conversion
// ═══════════════════════════════════════════════════════════════════════════════

/// Remix interleaved float audio from `src` to `dst` channels
fn remix(input: &[f32], src: u16, dst: u16) -> DecodeResult<Vec<f32>> {
    let (src, dst) = (src as usize, dst as usize);
    if src == dst {
        return Ok(input.to_vec());
    }
    let frames = input.chunks_exact(src);
    let out = match (src, dst) {
        (1, _) => frames.flat_map(|f| std::iter::repeat(f[0]).take(dst)).collect(),
        (_, 1) => frames.map(|f| f.iter().sum::<f32>() / src as f32).collect(),
        // Keep the front pair of a surround layout
        (_, 2) => frames.flat_map(|f| [f[0], f[1]]).collect(),
        _ => return Err(DecodeError::UnsupportedChannels(src as u16)),
    };
    Ok(out)
}

/// Resample interleaved float audio between rates
fn resample(input: &[f32], channels: usize, src_rate: u32, dst_rate: u32) -> DecodeResult<Vec<f32>> {
    if src_rate == dst_rate || input.is_empty() {
        return Ok(input.to_vec());
    }
    let chunk_size = 1024;
    let mut resampler = FftFixedIn::<f32>::new(src_rate as usize, dst_rate as usize, chunk_size, 2, channels)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let frames = input.len() / channels;
    let expected = (frames as u64 * dst_rate as u64).div_ceil(src_rate as u64) as usize;
    let delay = resampler.output_delay();

    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    let mut chunk: Vec<Vec<f32>> = vec![vec![0.0; chunk_size]; channels];
    let mut pos = 0;
    while planes[0].len() < expected + delay {
        let end = (pos + chunk_size).min(frames);
        for (c, plane) in chunk.iter_mut().enumerate() {
            plane.fill(0.0);
            for (i, frame) in (pos..end).enumerate() {
                plane[i] = input[frame * channels + c];
            }
        }
        let out = resampler
            .process(&chunk, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for (plane, resampled) in planes.iter_mut().zip(out) {
            plane.extend(resampled);
        }
        pos = end;
    }

    let mut interleaved = Vec::with_capacity(expected * channels);
    for i in delay..delay + expected {
        for plane in &planes {
            interleaved.push(plane[i]);
        }
    }
    Ok(interleaved)
}

/// Convert decoded float audio to the destination i16 format
pub(crate) fn render_f32(
    input: &[f32],
    src_rate: u32,
    src_channels: u16,
    config: &DecoderConfig,
) -> DecodeResult<Vec<Sample>> {
    let dst_channels = config.dst_channels.max(1);
    let remixed = remix(input, src_channels.max(1), dst_channels)?;
    let resampled = resample(&remixed, dst_channels as usize, src_rate, config.dst_sample_rate)?;
    Ok(resampled.iter().map(|&x| f32_to_s16(x * config.volume)).collect())
}

/// Convert decoded i16 audio to the destination format
///
/// Skips the float path when only the volume changes.
pub(crate) fn render_s16(
    input: &[Sample],
    src_rate: u32,
    src_channels: u16,
    config: &DecoderConfig,
) -> DecodeResult<Vec<Sample>> {
    if src_rate == config.dst_sample_rate && src_channels == config.dst_channels {
        if config.volume == 1.0 {
            return Ok(input.to_vec());
        }
        let volume = config.volume as f64;
        return Ok(input.iter().map(|&s| round_clip(s as f64 * volume)).collect());
    }
    let floats: Vec<f32> = input.iter().map(|&s| crate::types::s16_to_f32(s)).collect();
    render_f32(&floats, src_rate, src_channels, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(frames: usize) -> ClipBuffer {
        // 1 kHz mono: one sample per millisecond
        ClipBuffer::new((0..frames as i16).collect(), 1000, 1)
    }

    #[test]
    fn test_read_stops_at_end_without_loop() {
        let mut c = clip(10);
        let mut buf = [0; 8];
        assert_eq!(c.read(&mut buf, false).unwrap(), 8);
        assert_eq!(c.read(&mut buf, false).unwrap(), 2);
        assert!(matches!(c.read(&mut buf, false), Err(DecodeError::EndOfStream)));
    }

    #[test]
    fn test_looping_read_fills_request_across_eof() {
        let mut c = clip(10);
        let mut buf = [0; 25];
        assert_eq!(c.read(&mut buf, true).unwrap(), 25);
        assert_eq!(&buf[8..12], &[8, 9, 0, 1]);
        assert_eq!(buf[24], 4);
    }

    #[test]
    fn test_crop_and_seek() {
        let mut c = clip(100);
        c.set_crop(20, 30).unwrap();
        assert_eq!(c.duration_ms(), 10);
        c.seek_to(5);
        let mut buf = [0; 10];
        assert_eq!(c.read(&mut buf, false).unwrap(), 5);
        assert_eq!(buf[0], 25);
        // Seeking beyond the window parks at the end
        c.seek_to(500);
        assert!(c.read(&mut buf, false).is_err());
        assert!(c.set_crop(50, 10).is_err());
    }

    #[test]
    fn test_crop_end_zero_means_whole_clip() {
        let mut c = clip(40);
        c.set_crop(10, 0).unwrap();
        assert_eq!(c.duration_ms(), 30);
    }

    #[test]
    fn test_remix() {
        assert_eq!(remix(&[0.5, -0.5], 1, 2).unwrap(), vec![0.5, 0.5, -0.5, -0.5]);
        assert_eq!(remix(&[0.2, 0.4, 1.0, 0.0], 2, 1).unwrap(), vec![0.3f32, 0.5]);
        assert!(remix(&[0.0; 6], 3, 1).is_ok());
        assert!(remix(&[0.0; 6], 3, 4).is_err());
    }

    #[test]
    fn test_resample_length_follows_rate_ratio() {
        let input: Vec<f32> = (0..22050).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let out = resample(&input, 1, 22050, 44100).unwrap();
        assert_eq!(out.len(), 44100);
    }

    #[test]
    fn test_render_s16_identity_and_volume() {
        let config = DecoderConfig::new("unused", 8000, 1);
        let input = vec![100, -200, 300];
        assert_eq!(render_s16(&input, 8000, 1, &config).unwrap(), input);
        let half = DecoderConfig { volume: 0.5, ..config };
        assert_eq!(render_s16(&input, 8000, 1, &half).unwrap(), vec![50, -100, 150]);
    }
}
