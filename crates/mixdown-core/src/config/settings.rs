//! Engine settings (YAML)
//!
//! Tunables that the session JSON does not carry. A missing or unreadable
//! file yields the defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mixer::{SideChainParams, AGC_RECOVERY_DIVISOR};

/// Limiter run over the final mix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerLimiterSettings {
    pub threshold_db: f32,
    pub attack_ms: f32,
    pub decay_ms: f32,
    pub gain_db: f32,
}

impl Default for MixerLimiterSettings {
    fn default() -> Self {
        Self {
            threshold_db: -0.5,
            attack_ms: 0.0,
            decay_ms: 0.0,
            gain_db: 0.0,
        }
    }
}

/// Process-wide mixing and encoding tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub side_chain: SideChainParams,
    pub mixer_limiter: MixerLimiterSettings,
    /// A factor below 1.0 recovers by `(1 - factor) / agc_recovery_divisor`
    /// per sample
    pub agc_recovery_divisor: f32,
    /// Bits per second handed to the muxer
    pub output_bit_rate: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            side_chain: SideChainParams::default(),
            mixer_limiter: MixerLimiterSettings::default(),
            agc_recovery_divisor: AGC_RECOVERY_DIVISOR,
            output_bit_rate: 128_000,
        }
    }
}

impl EngineSettings {
    /// Load settings, falling back to defaults on any problem
    pub fn load(path: &Path) -> Self {
        log::info!("load_settings: Loading from {:?}", path);
        if !path.exists() {
            log::info!("load_settings: Settings file doesn't exist, using defaults");
            return Self::default();
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("load_settings: Failed to read settings file: {}, using defaults", e);
                return Self::default();
            }
        };
        match serde_yaml::from_str::<Self>(&contents) {
            Ok(settings) => {
                log::info!("load_settings: Successfully loaded settings from {:?}", path);
                settings.sanitized()
            }
            Err(e) => {
                log::warn!("load_settings: Failed to parse settings: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Write settings as YAML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        log::info!("save_settings: Saving to {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize settings to YAML")?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write settings file: {:?}", path))?;
        log::info!("save_settings: Settings saved successfully");
        Ok(())
    }

    fn sanitized(mut self) -> Self {
        if !(self.agc_recovery_divisor >= 1.0) {
            log::warn!(
                "load_settings: agc_recovery_divisor {} out of range, using {}",
                self.agc_recovery_divisor,
                AGC_RECOVERY_DIVISOR
            );
            self.agc_recovery_divisor = AGC_RECOVERY_DIVISOR;
        }
        if !(self.side_chain.ratio >= 1.0) {
            self.side_chain.ratio = 1.0;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = EngineSettings::load(Path::new("/nonexistent/mixdown.yaml"));
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.agc_recovery_divisor, 32.0);
        assert_eq!(settings.mixer_limiter.threshold_db, -0.5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/mixdown.yaml");
        let mut settings = EngineSettings::default();
        settings.side_chain.threshold_db = -24.0;
        settings.output_bit_rate = 96_000;
        settings.save(&path).unwrap();
        assert_eq!(EngineSettings::load(&path), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixdown.yaml");
        std::fs::write(&path, "side_chain:\n  ratio: 8.0\nagc_recovery_divisor: 0\n").unwrap();
        let settings = EngineSettings::load(&path);
        assert_eq!(settings.side_chain.ratio, 8.0);
        assert_eq!(settings.side_chain.attack_ms, SideChainParams::default().attack_ms);
        assert_eq!(settings.agc_recovery_divisor, AGC_RECOVERY_DIVISOR);
    }

    #[test]
    fn test_invalid_yaml_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixdown.yaml");
        std::fs::write(&path, "side_chain: [not, a, map").unwrap();
        assert_eq!(EngineSettings::load(&path), EngineSettings::default());
    }
}
