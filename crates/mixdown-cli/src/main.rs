//! mixdown - command line front end
//!
//! ```text
//! mixdown [--settings FILE] effects <config.json> <out.wav>
//! mixdown [--settings FILE] mix <voice.pcm> <rate> <channels> <config.json> <out.wav>
//! mixdown transcode <in> <out.wav>
//! mixdown init-settings <file.yaml>
//! ```
//!
//! Jobs run on a worker thread while the main thread logs progress. Set
//! RUST_LOG=debug for verbose output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::RecvTimeoutError;

use mixdown_core::config::{EngineSettings, SessionConfig};
use mixdown_core::{EffectResult, EffectSession, MixerSession, SessionHandle, TranscodeSession};

const USAGE: &str = "usage:
  mixdown [--settings FILE] effects <config.json> <out.wav>
  mixdown [--settings FILE] mix <voice.pcm> <rate> <channels> <config.json> <out.wav>
  mixdown transcode <in> <out.wav>
  mixdown init-settings <file.yaml>";

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(mut args: Vec<String>) -> Result<()> {
    let mut settings_path: Option<PathBuf> = None;
    if let Some(i) = args.iter().position(|a| a == "--settings") {
        if i + 1 >= args.len() {
            bail!("--settings needs a file\n{}", USAGE);
        }
        settings_path = Some(PathBuf::from(args.remove(i + 1)));
        args.remove(i);
    }
    let settings = match &settings_path {
        Some(path) => EngineSettings::load(path),
        None => EngineSettings::default(),
    };

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["effects", config, out] => run_effects(Path::new(config), Path::new(out)),
        ["mix", voice, rate, channels, config, out] => {
            let rate: u32 = rate.parse().with_context(|| format!("Invalid sample rate: {}", rate))?;
            let channels: u16 = channels
                .parse()
                .with_context(|| format!("Invalid channel count: {}", channels))?;
            run_mix(settings, Path::new(voice), rate, channels, Path::new(config), Path::new(out))
        }
        ["transcode", input, out] => run_transcode(Path::new(input), Path::new(out)),
        ["init-settings", path] => settings.save(Path::new(path)),
        _ => bail!("{}", USAGE),
    }
}

fn run_effects(config_path: &Path, out: &Path) -> Result<()> {
    let config = SessionConfig::load(config_path)
        .with_context(|| format!("Failed to load session config: {:?}", config_path))?;
    let mut session = EffectSession::new();
    session.init(config).context("Failed to initialize effect session")?;
    log::info!(
        "effects: {} ms at {}Hz x{}",
        session.duration_ms(),
        session.sample_rate(),
        session.channels()
    );
    let handle = session.handle();
    run_with_progress(handle, || session.add_effects(out))
        .with_context(|| format!("Failed to write {:?}", out))
}

fn run_mix(
    settings: EngineSettings,
    voice: &Path,
    rate: u32,
    channels: u16,
    config_path: &Path,
    out: &Path,
) -> Result<()> {
    let config = SessionConfig::load(config_path)
        .with_context(|| format!("Failed to load session config: {:?}", config_path))?;
    let mut session = MixerSession::new(settings);
    let handle = session.handle();
    run_with_progress(handle, || session.mix(voice, rate, channels, config, out))
        .with_context(|| format!("Failed to mix {:?} into {:?}", voice, out))
}

fn run_transcode(input: &Path, out: &Path) -> Result<()> {
    let mut session = TranscodeSession::new();
    let handle = session.handle();
    run_with_progress(handle, || session.transcode(input, out))
        .with_context(|| format!("Failed to transcode {:?} into {:?}", input, out))
}

/// Run `job` on a worker thread, logging the session progress until it ends
fn run_with_progress<F>(handle: SessionHandle, job: F) -> Result<()>
where
    F: FnOnce() -> EffectResult<()> + Send,
{
    let (done_tx, done_rx) = crossbeam::channel::bounded(1);
    let result = crossbeam::thread::scope(|scope| {
        scope.spawn(move |_| {
            let _ = done_tx.send(job());
        });
        let mut last = -1;
        loop {
            match done_rx.recv_timeout(PROGRESS_INTERVAL) {
                Ok(result) => return Some(result),
                Err(RecvTimeoutError::Timeout) => {
                    let progress = handle.progress();
                    if progress != last {
                        log::info!("progress: {}%", progress);
                        last = progress;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    })
    .map_err(|_| anyhow!("Session worker panicked"))?;

    match result {
        Some(result) => {
            result?;
            log::info!("done ({:?})", handle.status());
            Ok(())
        }
        None => bail!("Session worker exited without a result"),
    }
}
