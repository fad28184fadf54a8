//! Configuration
//!
//! - [`SessionConfig`]: the per-job JSON document listing record, bgm and
//!   music sources plus the voice effects. Sections may be nested arrays or
//!   JSON-encoded strings.
//! - [`EngineSettings`]: process-wide YAML tunables (side-chain, mixer
//!   limiter, AGC recovery, output bit rate).
//!
//! # Usage
//!
//! ```ignore
//! use mixdown_core::config::{EngineSettings, SessionConfig};
//!
//! let settings = EngineSettings::load(Path::new("mixdown.yaml"));
//! let session = SessionConfig::load(Path::new("job.json"))?;
//! ```

mod session;
mod settings;

pub use session::SessionConfig;
pub use settings::{EngineSettings, MixerLimiterSettings};
