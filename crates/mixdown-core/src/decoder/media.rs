//! Media decoder backed by Symphonia

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{render_f32, AudioDecoder, ClipBuffer, DecodeResult, DecoderConfig};
use crate::error::DecodeError;
use crate::types::Sample;

/// Any format Symphonia can probe, decoded fully into memory
pub struct MediaDecoder {
    clip: ClipBuffer,
    source_rate: u32,
    source_channels: u16,
}

impl MediaDecoder {
    pub fn open(config: &DecoderConfig) -> DecodeResult<Self> {
        let decoded = decode_file(&config.path)?;
        let samples = render_f32(&decoded.samples, decoded.sample_rate, decoded.channels, config)?;
        log::debug!(
            "MediaDecoder: {} ({}Hz/{}ch) -> {} samples",
            config.path.display(),
            decoded.sample_rate,
            decoded.channels,
            samples.len()
        );
        Ok(Self {
            clip: ClipBuffer::new(samples, config.dst_sample_rate, config.dst_channels),
            source_rate: decoded.sample_rate,
            source_channels: decoded.channels,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn source_channels(&self) -> u16 {
        self.source_channels
    }
}

impl AudioDecoder for MediaDecoder {
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

struct DecodedAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

struct ProbedTrack {
    format: Box<dyn FormatReader>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    n_frames: Option<u64>,
}

fn probe(path: &Path) -> DecodeResult<ProbedTrack> {
    let file = File::open(path).map_err(|e| DecodeError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::UnsupportedFormat("no audio track".into()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat("unknown sample rate".into()))?;
    let channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
    let track_id = track.id;
    let n_frames = track.codec_params.n_frames;

    Ok(ProbedTrack {
        format,
        track_id,
        sample_rate,
        channels,
        n_frames,
    })
}

fn decode_file(path: &Path) -> DecodeResult<DecodedAudio> {
    let ProbedTrack {
        mut format,
        track_id,
        sample_rate,
        channels,
        ..
    } = probe(path)?;

    let params = format
        .tracks()
        .iter()
        .find(|t| t.id == track_id)
        .map(|t| t.codec_params.clone())
        .ok_or_else(|| DecodeError::UnsupportedFormat("track vanished".into()))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                log::warn!("MediaDecoder: error reading packet: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("MediaDecoder: error decoding packet: {}", e);
                continue;
            }
        };
        if sample_buf.is_none() {
            let spec = *decoded.spec();
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Native sample rate and channel count of a media file
pub fn probe_format(path: impl AsRef<Path>) -> DecodeResult<(u32, u16)> {
    let track = probe(path.as_ref())?;
    Ok((track.sample_rate, track.channels))
}

/// Duration of a media file in milliseconds
///
/// Uses the container's frame count when it has one and decodes the whole
/// file otherwise.
pub fn probe_duration_ms(path: impl AsRef<Path>) -> DecodeResult<i64> {
    let path = path.as_ref();
    let track = probe(path)?;
    if let Some(frames) = track.n_frames {
        return Ok((frames * 1000 / track.sample_rate.max(1) as u64) as i64);
    }
    let decoded = decode_file(path)?;
    let frames = decoded.samples.len() as u64 / decoded.channels.max(1) as u64;
    Ok((frames * 1000 / decoded.sample_rate.max(1) as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(samples: &[i16], rate: u32, channels: u16) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        file
    }

    #[test]
    fn test_wav_same_format_is_exact() {
        let input: Vec<i16> = (0..4410).map(|i| (i * 13 % 8000) as i16 - 4000).collect();
        let file = write_wav(&input, 44100, 2);
        let mut decoder = MediaDecoder::open(&DecoderConfig::new(file.path(), 44100, 2)).unwrap();
        assert_eq!(decoder.source_rate(), 44100);
        assert_eq!(decoder.source_channels(), 2);
        assert_eq!(decoder.duration_ms(), 50);
        let mut buf = vec![0; 5000];
        assert_eq!(decoder.get_pcm_frame(&mut buf, false).unwrap(), 4410);
        assert_eq!(&buf[..4410], input.as_slice());
    }

    #[test]
    fn test_resampled_stereo_output() {
        let input: Vec<i16> = (0..22050)
            .map(|i| (8000.0 * (i as f64 * 0.05).sin()) as i16)
            .collect();
        let file = write_wav(&input, 22050, 1);
        let mut decoder = MediaDecoder::open(&DecoderConfig::new(file.path(), 44100, 2)).unwrap();
        assert_eq!(decoder.out_sample_rate(), 44100);
        assert_eq!(decoder.duration_ms(), 1000);
        let mut buf = vec![0; 1024];
        decoder.get_pcm_frame(&mut buf, false).unwrap();
        assert!(buf.chunks_exact(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn test_probe_duration() {
        let file = write_wav(&vec![0; 16000], 16000, 1);
        assert_eq!(probe_duration_ms(file.path()).unwrap(), 1000);
        assert_eq!(probe_format(file.path()).unwrap(), (16000, 1));
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        std::fs::write(file.path(), b"definitely not audio").unwrap();
        assert!(matches!(
            MediaDecoder::open(&DecoderConfig::new(file.path(), 44100, 1)),
            Err(DecodeError::UnsupportedFormat(_))
        ));
    }
}
