//! Placing a source's audio onto a primary buffer
//!
//! [`mixer_combine`] handles one buffer against one source; [`MixerLayer`]
//! walks a whole queue, moving on to the next source whenever the current
//! one ends inside the buffer.

use super::agc::mix_buffer_s16;
use super::side_chain::{side_chain_compress, SideChainParams};
use crate::error::{DecodeError, EffectResult};
use crate::source::{seek_to, update_source, AudioSource, AudioSourceQueue, OpenParams};
use crate::types::{ms_to_samples, samples_to_ms, Sample};

/// Output format and tunables shared by every layer of a mix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub side_chain: SideChainParams,
    pub agc_recovery_divisor: f32,
}

impl MixParams {
    pub fn open_params(&self) -> OpenParams {
        OpenParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            makeup_db_max: self.side_chain.makeup_db_max,
        }
    }
}

/// How a buffer `[b0, b1)` overlaps a placement window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Buffer lies entirely inside the window
    Inside,
    /// Buffer begins before the window and ends inside it
    StraddlesStart,
    /// Buffer begins inside the window and ends after it
    StraddlesEnd,
    /// Window lies entirely inside the buffer
    Spans,
    /// No common part
    Outside,
}

impl Overlap {
    pub fn classify(b0: i64, b1: i64, start: i64, end: i64) -> Self {
        if b1 <= start || b0 >= end {
            return Overlap::Outside;
        }
        match (b0 < start, b1 > end) {
            (false, false) => Overlap::Inside,
            (true, false) => Overlap::StraddlesStart,
            (false, true) => Overlap::StraddlesEnd,
            (true, true) => Overlap::Spans,
        }
    }
}

/// Mix `source` onto `pcm`, which starts at `pcm_start_ms` on the timeline,
/// writing the result to `dst`
///
/// Samples outside the source window are copied from `pcm` unchanged. The
/// decoded part gets the fade law and optional side-chain ducking before
/// the anti-clip sum. A source whose window ends inside (or before) the
/// buffer is released.
pub fn mixer_combine(
    params: &MixParams,
    pcm: &[Sample],
    pcm_start_ms: i64,
    source: &mut AudioSource,
    scratch: &mut Vec<Sample>,
    dst: &mut [Sample],
) -> EffectResult<Overlap> {
    let (rate, channels) = (params.sample_rate, params.channels);
    let ch = channels.max(1) as usize;
    let len = pcm.len().min(dst.len());
    dst[..len].copy_from_slice(&pcm[..len]);

    let pcm_end_ms = pcm_start_ms + samples_to_ms(len, rate, channels);
    let (start, end) = (source.start_time_ms, source.end_time_ms);
    let overlap = Overlap::classify(pcm_start_ms, pcm_end_ms, start, end);
    let reaches_end = pcm_end_ms > end;

    if overlap == Overlap::Outside {
        if pcm_start_ms >= end {
            source.release();
        }
        return Ok(overlap);
    }

    let whole = len - len % ch;
    let lead = ms_to_samples(start - pcm_start_ms, rate, channels).min(whole);
    let stop = if reaches_end {
        ms_to_samples(end - pcm_start_ms, rate, channels).min(whole)
    } else {
        whole
    };

    let got = match source.decoder_mut() {
        Some(decoder) if stop > lead => {
            scratch.resize(stop - lead, 0);
            match decoder.get_pcm_frame(scratch, true) {
                Ok(n) => n,
                Err(DecodeError::EndOfStream) => 0,
                Err(e) => return Err(e.into()),
            }
        }
        _ => 0,
    };

    if got == 0 {
        log::warn!("mixer_combine: nothing decoded from {} ({:?})", source.file_path, overlap);
    } else {
        let offset = ms_to_samples(pcm_start_ms - start, rate, channels) / ch;
        let window = ms_to_samples(end - start, rate, channels) / ch;
        let segment = &mut scratch[..got];
        source.fade.apply(segment, channels, rate, offset, window, source.volume);

        let primary = &pcm[lead..lead + got];
        if source.side_chain_enable {
            side_chain_compress(
                primary,
                segment,
                &mut source.yl_prev,
                rate,
                channels,
                &params.side_chain,
                source.makeup_gain,
            );
        }
        mix_buffer_s16(
            primary,
            segment,
            channels,
            &mut dst[lead..lead + got],
            &mut source.left_factor,
            &mut source.right_factor,
            params.agc_recovery_divisor,
        );
    }

    if reaches_end {
        source.release();
    }
    Ok(overlap)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MixerLayer
// ═══════════════════════════════════════════════════════════════════════════════

/// One queue of sources (bgm or music) mixed onto the primary stream
pub struct MixerLayer {
    name: &'static str,
    queue: AudioSourceQueue,
    current: Option<AudioSource>,
    input: Vec<Sample>,
    scratch: Vec<Sample>,
}

impl MixerLayer {
    pub fn new(name: &'static str, queue: AudioSourceQueue) -> Self {
        Self {
            name,
            queue,
            current: None,
            input: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Latest end time across the current and pending sources
    pub fn end_time_ms(&self) -> i64 {
        let current = self.current.as_ref().map_or(0, |s| s.end_time_ms);
        current.max(self.queue.end_time_ms())
    }

    /// True once every source has been played out
    pub fn is_finished(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Open the first source
    pub fn start(&mut self, params: &MixParams) {
        update_source(&self.queue, &mut self.current, params.open_params());
    }

    pub fn seek_to(&mut self, target_ms: i64, params: &MixParams) -> EffectResult<()> {
        seek_to(&self.queue, &mut self.current, target_ms, params.open_params())
    }

    /// Mix this layer onto `pcm` (starting at `pcm_start_ms`) into `dst`
    ///
    /// When a source ends inside the buffer the next one is opened and mixed
    /// over the same buffer, so a buffer can cover several short sources.
    pub fn mix(&mut self, params: &MixParams, pcm: &[Sample], pcm_start_ms: i64, dst: &mut [Sample]) -> EffectResult<()> {
        let len = pcm.len().min(dst.len());
        dst[..len].copy_from_slice(&pcm[..len]);
        loop {
            update_source(&self.queue, &mut self.current, params.open_params());
            let Some(source) = self.current.as_mut() else {
                return Ok(());
            };
            self.input.clear();
            self.input.extend_from_slice(&dst[..len]);
            mixer_combine(params, &self.input, pcm_start_ms, source, &mut self.scratch, &mut dst[..len])?;
            if source.has_decoder() {
                return Ok(());
            }
            log::debug!("{}: {} finished", self.name, source.file_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderKind;
    use crate::mixer::AGC_RECOVERY_DIVISOR;
    use std::io::Write;

    const RATE: u32 = 8000;

    fn params() -> MixParams {
        MixParams {
            sample_rate: RATE,
            channels: 2,
            side_chain: SideChainParams::default(),
            agc_recovery_divisor: AGC_RECOVERY_DIVISOR,
        }
    }

    /// Stereo PCM clip of constant `value`
    fn clip(ms: usize, value: i16) -> tempfile::NamedTempFile {
        let samples = vec![value; ms * RATE as usize / 1000 * 2];
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytemuck::cast_slice(&samples)).unwrap();
        file.flush().unwrap();
        file
    }

    fn source(file: &tempfile::NamedTempFile, start: i64, end: i64) -> AudioSource {
        let mut source = AudioSource::new(file.path().display().to_string(), start, end);
        source.decoder_kind = DecoderKind::Pcm;
        source.src_sample_rate = RATE;
        source.src_channels = 2;
        source.open(RATE, 2, 6.0).unwrap();
        source
    }

    fn voice(ms: usize) -> Vec<Sample> {
        (0..ms * RATE as usize / 1000 * 2).map(|i| (i % 200) as Sample).collect()
    }

    fn samples(ms: i64) -> usize {
        ms_to_samples(ms, RATE, 2)
    }

    #[test]
    fn test_classify() {
        assert_eq!(Overlap::classify(1500, 1900, 1000, 4000), Overlap::Inside);
        assert_eq!(Overlap::classify(800, 1200, 1000, 4000), Overlap::StraddlesStart);
        assert_eq!(Overlap::classify(3900, 4100, 1000, 4000), Overlap::StraddlesEnd);
        assert_eq!(Overlap::classify(0, 5000, 1000, 4000), Overlap::Spans);
        assert_eq!(Overlap::classify(0, 1000, 1000, 4000), Overlap::Outside);
        assert_eq!(Overlap::classify(4000, 4100, 1000, 4000), Overlap::Outside);
    }

    #[test]
    fn test_buffer_straddling_start() {
        let file = clip(5000, 1000);
        let mut src = source(&file, 1000, 4000);
        let pcm = voice(400);
        let mut dst = vec![0; pcm.len()];
        let overlap = mixer_combine(&params(), &pcm, 800, &mut src, &mut Vec::new(), &mut dst).unwrap();
        assert_eq!(overlap, Overlap::StraddlesStart);
        let split = samples(200);
        assert_eq!(&dst[..split], &pcm[..split]);
        assert!(dst[split..].iter().zip(&pcm[split..]).all(|(&d, &p)| d == p + 1000));
        assert!(src.has_decoder());
    }

    #[test]
    fn test_buffer_straddling_end_releases_source() {
        let file = clip(5000, 1000);
        let mut src = source(&file, 1000, 4000);
        let pcm = voice(200);
        let mut dst = vec![0; pcm.len()];
        let overlap = mixer_combine(&params(), &pcm, 3900, &mut src, &mut Vec::new(), &mut dst).unwrap();
        assert_eq!(overlap, Overlap::StraddlesEnd);
        let split = samples(100);
        assert!(dst[..split].iter().zip(&pcm[..split]).all(|(&d, &p)| d == p + 1000));
        assert_eq!(&dst[split..], &pcm[split..]);
        assert!(!src.has_decoder());
    }

    #[test]
    fn test_buffer_outside_passes_through() {
        let file = clip(5000, 1000);
        let mut src = source(&file, 1000, 4000);
        let pcm = voice(100);
        let mut dst = vec![0; pcm.len()];
        assert_eq!(
            mixer_combine(&params(), &pcm, 0, &mut src, &mut Vec::new(), &mut dst).unwrap(),
            Overlap::Outside
        );
        assert_eq!(dst, pcm);
        assert!(src.has_decoder());
    }

    #[test]
    fn test_inside_buffer_loops_short_clip() {
        let file = clip(50, 500);
        let mut src = source(&file, 0, 1000);
        let pcm = vec![0; samples(200)];
        let mut dst = vec![0; pcm.len()];
        mixer_combine(&params(), &pcm, 0, &mut src, &mut Vec::new(), &mut dst).unwrap();
        assert!(dst.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_layer_mixes_two_sources_inside_one_buffer() {
        let a = clip(100, 100);
        let b = clip(100, 300);
        let queue = AudioSourceQueue::new();
        let mut first = source(&a, 100, 200);
        let mut second = source(&b, 300, 400);
        first.release();
        second.release();
        queue.extend([second, first]);
        let mut layer = MixerLayer::new("bgm", queue);
        let pcm = vec![0; samples(500)];
        let mut dst = vec![0; pcm.len()];
        layer.mix(&params(), &pcm, 0, &mut dst).unwrap();
        assert_eq!(dst[samples(50)], 0);
        assert_eq!(dst[samples(150)], 100);
        assert_eq!(dst[samples(250)], 0);
        assert_eq!(dst[samples(350)], 300);
        assert_eq!(dst[samples(450)], 0);
        assert!(layer.is_finished());
    }

    #[test]
    fn test_layer_without_sources_is_identity() {
        let mut layer = MixerLayer::new("music", AudioSourceQueue::new());
        let pcm = voice(100);
        let mut dst = vec![0; pcm.len()];
        layer.mix(&params(), &pcm, 0, &mut dst).unwrap();
        assert_eq!(dst, pcm);
    }
}
