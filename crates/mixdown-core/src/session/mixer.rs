//! Timeline mixer session
//!
//! The voice track is a headerless 16-bit PCM file. It is read in blocks,
//! upmixed to stereo when mono, and the bgm layer then the music layer are
//! combined over it. The optional total effects and the mixer limiter run
//! last, on the summed stream.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::{SessionHandle, SessionStatus};
use crate::chain::{EffectInfo, TotalEffects};
use crate::config::{EngineSettings, SessionConfig};
use crate::effect::limiter::Limiter;
use crate::error::{DecodeError, EffectError, EffectResult};
use crate::fifo::SampleFifo;
use crate::mixer::{MixParams, MixerLayer};
use crate::muxer::{create_muxer, MuxerConfig};
use crate::source::{AudioSource, AudioSourceQueue};
use crate::types::{
    f32_to_s16, mono_to_stereo, ms_to_samples, s16_to_f32, samples_to_ms, Sample, MAX_NB_SAMPLES,
};

/// Channels of every mix output
const OUTPUT_CHANNELS: u16 = 2;

// ═══════════════════════════════════════════════════════════════════════════════
// Voice input
// ═══════════════════════════════════════════════════════════════════════════════

/// Headerless PCM reader delivering whole frames
struct PcmInput {
    reader: BufReader<File>,
    file_size: u64,
    position: u64,
    frame_bytes: u64,
    bytes: Vec<u8>,
}

impl PcmInput {
    fn open(path: &Path, channels: u16) -> EffectResult<Self> {
        let file = File::open(path).map_err(|e| DecodeError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            file_size,
            position: 0,
            frame_bytes: 2 * channels as u64,
            bytes: Vec::new(),
        })
    }

    /// Read up to `max_samples` samples into `out`; 0 at end of file
    fn read(&mut self, max_samples: usize, out: &mut Vec<Sample>) -> EffectResult<usize> {
        self.bytes.clear();
        let read = (&mut self.reader)
            .take(2 * max_samples as u64)
            .read_to_end(&mut self.bytes)?;
        self.position += read as u64;
        let whole = read - read % self.frame_bytes as usize;
        out.clear();
        out.extend(
            self.bytes[..whole]
                .chunks_exact(2)
                .map(|b| Sample::from_ne_bytes([b[0], b[1]])),
        );
        Ok(out.len())
    }

    /// Position at `byte`, rounded down to a frame and clamped to the file
    fn seek(&mut self, byte: u64) -> EffectResult<u64> {
        let byte = byte.min(self.file_size);
        let byte = byte - byte % self.frame_bytes;
        self.reader.seek(SeekFrom::Start(byte))?;
        self.position = byte;
        Ok(byte)
    }

    fn progress(&self) -> i32 {
        if self.file_size == 0 {
            return 100;
        }
        (self.position as f64 / self.file_size as f64 * 100.0) as i32
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MixStream
// ═══════════════════════════════════════════════════════════════════════════════

fn layer(name: &'static str, sources: &[AudioSource]) -> MixerLayer {
    let queue = AudioSourceQueue::new();
    queue.extend(sources.iter().map(AudioSource::unopened));
    MixerLayer::new(name, queue)
}

fn mixer_limiter(settings: &EngineSettings, sample_rate: u32) -> Limiter {
    let mut limiter = Limiter::new(sample_rate, OUTPUT_CHANNELS);
    let l = settings.mixer_limiter;
    limiter.set(l.threshold_db, l.attack_ms, l.decay_ms, l.gain_db);
    limiter
}

fn total_effects(effects: &[EffectInfo], sample_rate: u32) -> Option<TotalEffects> {
    if effects.is_empty() {
        return None;
    }
    let total = TotalEffects::new(effects, sample_rate, OUTPUT_CHANNELS);
    log::info!("mixer: total effects {:?}", total.names());
    Some(total)
}

/// Run `samples` through the limiter and queue the result
fn limit_into(limiter: &mut Limiter, floats: &mut Vec<f32>, samples: &[Sample], fifo: &mut SampleFifo) {
    floats.clear();
    floats.extend(samples.iter().map(|&s| s16_to_f32(s)));
    let n = limiter.process(floats);
    let limited: Vec<Sample> = floats[..n].iter().map(|&x| f32_to_s16(x)).collect();
    fifo.write(&limited);
}

/// An open mix: voice input, layers and output stages
struct MixStream {
    params: MixParams,
    pcm_channels: u16,
    input: PcmInput,
    /// Samples read from the voice file so far (voice channel count)
    cur_size: usize,
    bgm_sources: Vec<AudioSource>,
    music_sources: Vec<AudioSource>,
    effect_list: Vec<EffectInfo>,
    bgm: MixerLayer,
    music: MixerLayer,
    total: Option<TotalEffects>,
    limiter: Limiter,
    fifo: SampleFifo,
    raw: Vec<Sample>,
    stereo: Vec<Sample>,
    voice_bgm: Vec<Sample>,
    mixed: Vec<Sample>,
    post: Vec<Sample>,
    floats: Vec<f32>,
    settings: EngineSettings,
    finished: bool,
}

impl MixStream {
    fn open(
        settings: &EngineSettings,
        pcm_path: &Path,
        pcm_sample_rate: u32,
        pcm_channels: u16,
        config: SessionConfig,
    ) -> EffectResult<Self> {
        if pcm_sample_rate == 0 {
            return Err(EffectError::InvalidParameter("pcm sample rate 0".into()));
        }
        if !(1..=2).contains(&pcm_channels) {
            return Err(EffectError::InvalidParameter(format!(
                "unsupported pcm_channels {}",
                pcm_channels
            )));
        }
        let SessionConfig {
            record,
            bgm,
            music,
            total_effects: effect_list,
            ..
        } = config;
        if !record.is_empty() {
            log::debug!("mixer: {} record entries ignored, voice is {}", record.len(), pcm_path.display());
        }

        let params = MixParams {
            sample_rate: pcm_sample_rate,
            channels: OUTPUT_CHANNELS,
            side_chain: settings.side_chain,
            agc_recovery_divisor: settings.agc_recovery_divisor,
        };
        let input = PcmInput::open(pcm_path, pcm_channels)?;
        let mut stream = Self {
            params,
            pcm_channels,
            input,
            cur_size: 0,
            bgm: layer("bgm", &bgm),
            music: layer("music", &music),
            bgm_sources: bgm,
            music_sources: music,
            total: total_effects(&effect_list, pcm_sample_rate),
            effect_list,
            limiter: mixer_limiter(settings, pcm_sample_rate),
            fifo: SampleFifo::with_capacity(2 * MAX_NB_SAMPLES),
            raw: Vec::with_capacity(MAX_NB_SAMPLES),
            stereo: Vec::with_capacity(MAX_NB_SAMPLES),
            voice_bgm: Vec::with_capacity(MAX_NB_SAMPLES),
            mixed: Vec::with_capacity(MAX_NB_SAMPLES),
            post: Vec::with_capacity(MAX_NB_SAMPLES),
            floats: Vec::with_capacity(MAX_NB_SAMPLES),
            settings: settings.clone(),
            finished: false,
        };
        stream.bgm.start(&stream.params);
        stream.music.start(&stream.params);
        log::info!(
            "mixer_open: {} {}Hz x{}, bgm until {} ms, music until {} ms",
            pcm_path.display(),
            pcm_sample_rate,
            pcm_channels,
            stream.bgm.end_time_ms(),
            stream.music.end_time_ms()
        );
        Ok(stream)
    }

    fn progress(&self) -> i32 {
        self.input.progress()
    }

    /// Mix one block of voice into the output FIFO
    fn process_block(&mut self) -> EffectResult<()> {
        let rate = self.params.sample_rate;
        let start_ms = samples_to_ms(self.cur_size, rate, self.pcm_channels);
        let want = if self.pcm_channels == 1 { MAX_NB_SAMPLES / 2 } else { MAX_NB_SAMPLES };
        let got = self.input.read(want, &mut self.raw)?;
        if got == 0 {
            return self.finish();
        }
        self.cur_size += got;

        if self.pcm_channels == 1 {
            self.stereo.resize(2 * got, 0);
            mono_to_stereo(&mut self.stereo, &self.raw);
        } else {
            self.stereo.clear();
            self.stereo.extend_from_slice(&self.raw);
        }
        let len = self.stereo.len();

        self.voice_bgm.resize(len, 0);
        self.bgm.mix(&self.params, &self.stereo, start_ms, &mut self.voice_bgm)?;
        self.mixed.resize(len, 0);
        self.music.mix(&self.params, &self.voice_bgm, start_ms, &mut self.mixed)?;

        match self.total.as_mut() {
            Some(total) => {
                total.send(&self.mixed);
                drain_total(total, &mut self.post, false)?;
                limit_into(&mut self.limiter, &mut self.floats, &self.post, &mut self.fifo);
            }
            None => limit_into(&mut self.limiter, &mut self.floats, &self.mixed, &mut self.fifo),
        }
        Ok(())
    }

    fn finish(&mut self) -> EffectResult<()> {
        self.finished = true;
        if let Some(total) = self.total.as_mut() {
            drain_total(total, &mut self.post, true)?;
            limit_into(&mut self.limiter, &mut self.floats, &self.post, &mut self.fifo);
        }
        log::info!("mixer: voice finished after {} ms", self.position_ms());
        Ok(())
    }

    fn position_ms(&self) -> i64 {
        samples_to_ms(self.cur_size, self.params.sample_rate, self.pcm_channels)
    }

    /// Fill `buf` with mixed stereo samples; [`EffectError::Eof`] at the end
    fn read(&mut self, buf: &mut [Sample]) -> EffectResult<usize> {
        while self.fifo.len() < buf.len() && !self.finished {
            self.process_block()?;
        }
        match self.fifo.read(buf) {
            0 => Err(EffectError::Eof),
            n => Ok(n),
        }
    }

    fn seek_to(&mut self, ms: i64) -> EffectResult<()> {
        let ms = ms.max(0);
        let samples = ms_to_samples(ms, self.params.sample_rate, self.pcm_channels);
        let byte = self.input.seek(2 * samples as u64)?;
        self.cur_size = (byte / 2) as usize;
        let ms = self.position_ms();
        log::info!("mixer_seek_to: {} ms", ms);

        self.bgm = layer("bgm", &self.bgm_sources);
        self.music = layer("music", &self.music_sources);
        self.bgm.seek_to(ms, &self.params)?;
        self.music.seek_to(ms, &self.params)?;

        self.total = total_effects(&self.effect_list, self.params.sample_rate);
        self.limiter = mixer_limiter(&self.settings, self.params.sample_rate);
        self.fifo.clear();
        self.finished = false;
        Ok(())
    }
}

/// Pull everything the total effects have ready, flushing at end of stream
fn drain_total(total: &mut TotalEffects, out: &mut Vec<Sample>, flush: bool) -> EffectResult<()> {
    out.clear();
    let mut chunk = [0 as Sample; 1024];
    loop {
        let n = if flush { total.flush(&mut chunk)? } else { total.receive(&mut chunk)? };
        if n == 0 {
            return Ok(());
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MixerSession
// ═══════════════════════════════════════════════════════════════════════════════

/// Mixes a voice PCM file with the bgm and music layers of a session config
pub struct MixerSession {
    handle: SessionHandle,
    settings: EngineSettings,
    stream: Option<MixStream>,
}

impl MixerSession {
    pub fn new(settings: EngineSettings) -> Self {
        let handle = SessionHandle::default();
        handle.set_status(SessionStatus::Initialized);
        Self {
            handle,
            settings,
            stream: None,
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

    /// Mix `pcm_path` with `config` into a stereo WAV at the PCM rate
    ///
    /// Allowed from INITIALIZED, COMPLETED or ERROR. A stop request ends the
    /// mix early with a valid, shorter file.
    pub fn mix(
        &mut self,
        pcm_path: &Path,
        pcm_sample_rate: u32,
        pcm_channels: u16,
        config: SessionConfig,
        out_path: &Path,
    ) -> EffectResult<()> {
        log::info!(
            "mixer_mix: {} ({}Hz x{}) -> {}",
            pcm_path.display(),
            pcm_sample_rate,
            pcm_channels,
            out_path.display()
        );
        let status = self.handle.status();
        if !matches!(
            status,
            SessionStatus::Initialized | SessionStatus::Completed | SessionStatus::Error
        ) {
            return Err(EffectError::InvalidState(format!("mix from {:?}", status)));
        }
        self.handle.begin();
        self.stream = None;
        let result = self.mix_l(pcm_path, pcm_sample_rate, pcm_channels, config, out_path);
        match &result {
            Ok(()) => self.handle.complete(),
            Err(e) => {
                log::error!("mixer_mix: {}", e);
                self.handle.fail();
            }
        }
        result
    }

    fn mix_l(
        &mut self,
        pcm_path: &Path,
        pcm_sample_rate: u32,
        pcm_channels: u16,
        config: SessionConfig,
        out_path: &Path,
    ) -> EffectResult<()> {
        let mut stream = MixStream::open(&self.settings, pcm_path, pcm_sample_rate, pcm_channels, config)?;
        let mut muxer = create_muxer(&MuxerConfig {
            bit_rate: self.settings.output_bit_rate,
            ..MuxerConfig::wav(out_path, pcm_sample_rate, OUTPUT_CHANNELS)
        })?;
        let mut block = vec![0; MAX_NB_SAMPLES];
        loop {
            if self.handle.is_aborted() {
                log::info!("mixer_mix: aborted at {} ms", stream.position_ms());
                break;
            }
            let n = match stream.read(&mut block) {
                Ok(n) => n,
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            };
            self.handle.set_progress(stream.progress());
            muxer.write_audio_frame(&block[..n])?;
        }
        muxer.stop()
    }

    /// Prepare the mix for pulling with [`get_frame`](Self::get_frame)
    pub fn open(
        &mut self,
        pcm_path: &Path,
        pcm_sample_rate: u32,
        pcm_channels: u16,
        config: SessionConfig,
    ) -> EffectResult<()> {
        self.stream = None;
        let stream = MixStream::open(&self.settings, pcm_path, pcm_sample_rate, pcm_channels, config)?;
        self.stream = Some(stream);
        self.handle.set_progress(0);
        Ok(())
    }

    fn stream_mut(&mut self) -> EffectResult<&mut MixStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| EffectError::InvalidState("mixer not opened".into()))
    }

    /// Fill `buf` with mixed stereo samples; [`EffectError::Eof`] at the end
    pub fn get_frame(&mut self, buf: &mut [Sample]) -> EffectResult<usize> {
        let stream = self.stream_mut()?;
        let result = stream.read(buf);
        let progress = stream.progress();
        self.handle.set_progress(progress);
        result
    }

    /// Move the opened mix to `ms` on the voice timeline
    pub fn seek_to(&mut self, ms: i64) -> EffectResult<()> {
        self.stream_mut()?.seek_to(ms)
    }
}
