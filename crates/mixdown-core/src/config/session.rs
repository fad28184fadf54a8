//! Session JSON schema
//!
//! ```json
//! {
//!   "record":  [{"file_path": "voice.pcm", "startTimeMs": 0, "endTimeMs": 60000,
//!                "isPcm": true, "sampleRate": 44100, "nbChannels": 1}],
//!   "bgm":     [{"file_path": "bed.mp3", "startTimeMs": 0, "endTimeMs": 60000,
//!                "volume": 40, "fadeInTimeMs": 2000, "sideChain": "On", "makeUpGain": 50}],
//!   "music":   "[...]",
//!   "effects": [{"name": "NoiseSuppression", "info": "On"}]
//! }
//! ```
//!
//! Every section is optional and may be given as a JSON-encoded string.
//! Entries are parsed one by one: an entry missing `file_path`,
//! `startTimeMs` or `endTimeMs` is skipped with a log line, and optional
//! fields that are absent or of the wrong type take their defaults.

use std::path::Path;

use serde_json::{Map, Value};

use crate::chain::{EffectInfo, VoiceEffectSettings, VoiceSlot};
use crate::decoder::DecoderKind;
use crate::error::ConfigError;
use crate::mixer::FadeInOut;
use crate::source::AudioSource;

/// Parsed session document
#[derive(Debug, Default)]
pub struct SessionConfig {
    pub record: Vec<AudioSource>,
    pub bgm: Vec<AudioSource>,
    pub music: Vec<AudioSource>,
    /// Voice effects applied to the record track
    pub effects: VoiceEffectSettings,
    /// Effects applied to the whole mixed stream
    pub total_effects: Vec<EffectInfo>,
}

impl SessionConfig {
    /// Read and parse a session file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("load_session_config: Loading from {:?}", path);
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(json)?;
        let config = Self {
            record: sources(&section(&root, "record")?),
            bgm: sources(&section(&root, "bgm")?),
            music: sources(&section(&root, "music")?),
            effects: voice_effects(&section(&root, "effects")?),
            total_effects: effect_list(&section(&root, "totalEffects")?),
        };
        log::info!(
            "load_session_config: {} record, {} bgm, {} music sources; {} voice effects; {} total effects",
            config.record.len(),
            config.bgm.len(),
            config.music.len(),
            config.effects.iter().count(),
            config.total_effects.len()
        );
        Ok(config)
    }

    /// Latest end time across every listed source
    pub fn duration_ms(&self) -> i64 {
        self.record
            .iter()
            .chain(&self.bgm)
            .chain(&self.music)
            .map(|s| s.end_time_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Fetch `key` as a list, decoding the string form when needed
fn section(root: &Value, key: &'static str) -> Result<Vec<Value>, ConfigError> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::String(encoded)) if encoded.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded)? {
            Value::Array(items) => Ok(items),
            _ => Err(ConfigError::BadSection(key)),
        },
        Some(_) => Err(ConfigError::BadSection(key)),
    }
}

fn number(entry: &Map<String, Value>, key: &str) -> Option<f64> {
    entry.get(key).and_then(Value::as_f64)
}

fn flag(entry: &Map<String, Value>, key: &str) -> bool {
    match entry.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on") || s == "1",
        _ => false,
    }
}

fn sources(items: &[Value]) -> Vec<AudioSource> {
    items.iter().filter_map(source).collect()
}

fn source(item: &Value) -> Option<AudioSource> {
    let Some(entry) = item.as_object() else {
        log::error!("parse_audio_source: entry is not an object, skipping");
        return None;
    };
    let file_path = entry.get("file_path").and_then(Value::as_str);
    let start = number(entry, "startTimeMs");
    let end = number(entry, "endTimeMs");
    let (Some(file_path), Some(start), Some(end)) = (file_path, start, end) else {
        log::error!("parse_audio_source: missing file_path/startTimeMs/endTimeMs, parse next source");
        return None;
    };

    let mut source = AudioSource::new(file_path, start as i64, end as i64);
    source.crop_start_ms = number(entry, "cropStartTimeMs").map_or(0, |v| v as i64);
    source.crop_end_ms = number(entry, "cropEndTimeMs").map_or(-1, |v| v as i64);
    source.volume = number(entry, "volume").map_or(1.0, |v| (v / 100.0) as f32);
    source.fade = FadeInOut::new(
        number(entry, "fadeInTimeMs").map_or(0, |v| v as i64),
        number(entry, "fadeOutTimeMs").map_or(0, |v| v as i64),
    );

    let side_chain = entry.get("sideChain").and_then(Value::as_str);
    if side_chain.is_some_and(|s| s.eq_ignore_ascii_case("On")) {
        source.side_chain_enable = true;
        source.makeup_gain = number(entry, "makeUpGain").map_or(0.5, |v| (v / 100.0) as f32);
    }

    if flag(entry, "isPcm") {
        source.decoder_kind = DecoderKind::Pcm;
        source.src_sample_rate = number(entry, "sampleRate").map_or(0, |v| v as u32);
        source.src_channels = number(entry, "nbChannels").map_or(0, |v| v as u16);
    }

    if let Some(effects) = entry.get("effects") {
        let wrapped = serde_json::json!({ "effects": effects });
        match section(&wrapped, "effects") {
            Ok(items) => source.effects = voice_effects(&items),
            Err(e) => log::warn!("parse_audio_source: bad effects for {}: {}", source.file_path, e),
        }
    }

    log::info!(
        "parse_audio_source: {} [{}, {}) crop [{}, {}) volume {} fade {:?} side_chain {} makeup {}",
        source.file_path,
        source.start_time_ms,
        source.end_time_ms,
        source.crop_start_ms,
        source.crop_end_ms,
        source.volume,
        source.fade,
        source.side_chain_enable,
        source.makeup_gain
    );
    Some(source)
}

fn effect_list(items: &[Value]) -> Vec<EffectInfo> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<EffectInfo>(item.clone()) {
            Ok(info) => Some(info),
            Err(e) => {
                log::error!("parse_effects: get effect failed ({}), continue", e);
                None
            }
        })
        .collect()
}

fn voice_effects(items: &[Value]) -> VoiceEffectSettings {
    let mut settings = VoiceEffectSettings::default();
    for EffectInfo { name, info } in effect_list(items) {
        match VoiceSlot::from_config_name(&name) {
            Some(slot) => {
                log::info!("parse_voice_effects: {} = {}", slot.config_name(), info);
                settings.set(slot, info);
            }
            None => log::warn!("parse_voice_effects: unsupported effect {}", name),
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_and_encoded_sections_are_equivalent() {
        let nested = r#"{"bgm": [{"file_path": "a.mp3", "startTimeMs": 0, "endTimeMs": 1000}]}"#;
        let encoded = r#"{"bgm": "[{\"file_path\": \"a.mp3\", \"startTimeMs\": 0, \"endTimeMs\": 1000}]"}"#;
        let a = SessionConfig::parse(nested).unwrap();
        let b = SessionConfig::parse(encoded).unwrap();
        assert_eq!(a.bgm.len(), 1);
        assert_eq!(b.bgm.len(), 1);
        assert_eq!(a.bgm[0].file_path, b.bgm[0].file_path);
        assert_eq!(a.duration_ms(), 1000);
    }

    #[test]
    fn test_defaults() {
        let json = r#"{"music": [{"file_path": "m.wav", "startTimeMs": 500, "endTimeMs": 900}]}"#;
        let config = SessionConfig::parse(json).unwrap();
        let source = &config.music[0];
        assert_eq!(source.crop_start_ms, 0);
        assert_eq!(source.crop_end_ms, -1);
        assert_eq!(source.volume, 1.0);
        assert_eq!(source.fade, FadeInOut::default());
        assert!(!source.side_chain_enable);
        assert_eq!(source.makeup_gain, 0.0);
        assert_eq!(source.decoder_kind, DecoderKind::Media);
    }

    #[test]
    fn test_full_entry() {
        let json = r#"{"bgm": [{
            "file_path": "bed.mp3", "startTimeMs": 100, "endTimeMs": 9000,
            "volume": 40, "cropStartTimeMs": 2000, "cropEndTimeMs": 11000,
            "fadeInTimeMs": 1500, "fadeOutTimeMs": 2500,
            "sideChain": "on", "makeUpGain": 80
        }]}"#;
        let config = SessionConfig::parse(json).unwrap();
        let s = &config.bgm[0];
        assert_eq!((s.start_time_ms, s.end_time_ms), (100, 9000));
        assert_eq!((s.crop_start_ms, s.crop_end_ms), (2000, 11000));
        assert!((s.volume - 0.4).abs() < 1e-6);
        assert_eq!(s.fade, FadeInOut::new(1500, 2500));
        assert!(s.side_chain_enable);
        assert!((s.makeup_gain - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_side_chain_default_makeup() {
        let json = r#"{"bgm": [{"file_path": "a", "startTimeMs": 0, "endTimeMs": 1, "sideChain": "On"}]}"#;
        let config = SessionConfig::parse(json).unwrap();
        assert_eq!(config.bgm[0].makeup_gain, 0.5);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let json = r#"{"bgm": [
            {"startTimeMs": 0, "endTimeMs": 10},
            {"file_path": "b", "startTimeMs": "soon", "endTimeMs": 10},
            "junk",
            {"file_path": "c", "startTimeMs": 0, "endTimeMs": 10, "volume": "loud"}
        ]}"#;
        let config = SessionConfig::parse(json).unwrap();
        assert_eq!(config.bgm.len(), 1);
        assert_eq!(config.bgm[0].file_path, "c");
        assert_eq!(config.bgm[0].volume, 1.0);
    }

    #[test]
    fn test_record_and_voice_effects() {
        let json = r#"{
            "record": [{"file_path": "v.pcm", "startTimeMs": 0, "endTimeMs": 5000,
                        "isPcm": true, "sampleRate": 16000, "nbChannels": 1}],
            "effects": "[{\"name\": \"beautify\", \"info\": \"Magnetic\"}, {\"name\": \"VolumeLimiter\", \"info\": \"On\"}, {\"name\": \"Chorus\", \"info\": \"x\"}]"
        }"#;
        let config = SessionConfig::parse(json).unwrap();
        let record = &config.record[0];
        assert_eq!(record.decoder_kind, DecoderKind::Pcm);
        assert_eq!((record.src_sample_rate, record.src_channels), (16000, 1));
        assert_eq!(config.effects.get(VoiceSlot::Beautify), Some("Magnetic"));
        assert_eq!(config.effects.get(VoiceSlot::VolumeLimiter), Some("On"));
        assert_eq!(config.effects.iter().count(), 2);
    }

    #[test]
    fn test_per_source_effects() {
        let json = r#"{"record": [{"file_path": "v", "startTimeMs": 0, "endTimeMs": 1,
            "effects": [{"name": "Reverb", "info": "Hall"}]}]}"#;
        let config = SessionConfig::parse(json).unwrap();
        assert_eq!(config.record[0].effects.get(VoiceSlot::Reverb), Some("Hall"));
    }

    #[test]
    fn test_bad_sections() {
        assert!(matches!(
            SessionConfig::parse(r#"{"bgm": 42}"#),
            Err(ConfigError::BadSection("bgm"))
        ));
        assert!(matches!(
            SessionConfig::parse(r#"{"music": "{\"a\": 1}"}"#),
            Err(ConfigError::BadSection("music"))
        ));
        assert!(matches!(SessionConfig::parse("not json"), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            SessionConfig::load(Path::new("/nonexistent/job.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
