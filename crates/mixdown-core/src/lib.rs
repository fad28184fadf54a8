//! Mixdown Core - audio post-production pipeline
//!
//! - [`effect`] and [`chain`]: the DSP effects and the chains that drive them
//! - [`decoder`] and [`source`]: timed clips decoded on demand
//! - [`mixer`]: placing clips on a voice track (fades, side-chain, anti-clip)
//! - [`session`]: the voice effect, mix and transcode jobs
//! - [`config`] and [`muxer`]: session JSON, engine settings and WAV output

pub mod types;
pub mod error;
pub mod fifo;
pub mod effect;
pub mod chain;
pub mod decoder;
pub mod source;
pub mod mixer;
pub mod config;
pub mod muxer;
pub mod session;

pub use error::{ConfigError, DecodeError, EffectError, EffectResult};
pub use session::{EffectSession, MixerSession, SessionHandle, SessionStatus, TranscodeSession};
pub use types::*;
