//! Timeline mixer
//!
//! - [`FadeInOut`]: linear fade law over a source's placement window.
//! - [`side_chain_compress`]: voice-keyed ducking of a music buffer.
//! - [`mix_buffer_s16`]: anti-clip sum with a persistent per-channel gain.
//! - [`mixer_combine`] / [`MixerLayer`]: aligning queued sources against
//!   the primary stream buffer by buffer.

mod agc;
mod combine;
mod fade;
mod side_chain;

pub use agc::{mix_buffer_s16, AGC_RECOVERY_DIVISOR};
pub use combine::{mixer_combine, MixParams, MixerLayer, Overlap};
pub use fade::FadeInOut;
pub use side_chain::{side_chain_compress, SideChainParams};
