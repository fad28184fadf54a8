//! Error types for effects, decoders and sessions

use thiserror::Error;

/// Numeric status codes reported at the session boundary
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const EOF: i32 = -1;
    pub const NULL_POINT: i32 = -1008;
    pub const INVALID_PARAMETER: i32 = -2000;
    pub const INVALID_STATE: i32 = -2001;
    pub const NO_MEMORY: i32 = -5000;
    pub const INVAL: i32 = -5001;
    pub const EXTERNAL: i32 = -6000;
}

/// Errors raised by the effect pipeline, the mixer and the sessions
#[derive(Error, Debug)]
pub enum EffectError {
    #[error("Clean end of stream")]
    Eof,

    #[error("Missing required argument: {0}")]
    NullPoint(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Allocation failed: {0}")]
    NoMemory(String),

    #[error("Unsupported sample rate {rate}Hz for {effect}")]
    UnsupportedSampleRate { effect: &'static str, rate: u32 },

    #[error("{effect}: {message}\nusage: {usage}")]
    Usage {
        effect: &'static str,
        message: String,
        usage: &'static str,
    },

    #[error("Decoder error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Muxer error: {0}")]
    Mux(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EffectError {
    /// Numeric status code reported at the session boundary
    pub fn error_code(&self) -> i32 {
        match self {
            EffectError::Eof => code::EOF,
            EffectError::NullPoint(_) => code::NULL_POINT,
            EffectError::InvalidParameter(_)
            | EffectError::UnsupportedSampleRate { .. }
            | EffectError::Usage { .. } => code::INVALID_PARAMETER,
            EffectError::InvalidState(_) => code::INVALID_STATE,
            EffectError::NoMemory(_) => code::NO_MEMORY,
            EffectError::Config(_) => code::INVAL,
            EffectError::Decode(_) | EffectError::Mux(_) | EffectError::Io(_) => code::EXTERNAL,
        }
    }

    /// True for the clean end-of-stream marker
    pub fn is_eof(&self) -> bool {
        matches!(self, EffectError::Eof | EffectError::Decode(DecodeError::EndOfStream))
    }

    pub(crate) fn usage(effect: &'static str, usage: &'static str, message: impl Into<String>) -> Self {
        EffectError::Usage {
            effect,
            message: message.into(),
            usage,
        }
    }
}

/// Errors raised by PCM and media decoders
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Sample rate mismatch: source={source_rate}Hz, output={output_rate}Hz")]
    SampleRateMismatch { source_rate: u32, output_rate: u32 },

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Resampler error: {0}")]
    Resample(String),

    #[error("Invalid crop window {start_ms}..{end_ms} ms")]
    InvalidCrop { start_ms: i64, end_ms: i64 },

    #[error("End of stream")]
    EndOfStream,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading session configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Section {0} is neither an array nor an encoded array")]
    BadSection(&'static str),

    #[error("No usable record source")]
    NoRecordSource,
}

/// Result alias for the effect pipeline and sessions
pub type EffectResult<T> = Result<T, EffectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EffectError::Eof.error_code(), code::EOF);
        assert_eq!(EffectError::NullPoint("buffer").error_code(), code::NULL_POINT);
        assert_eq!(
            EffectError::UnsupportedSampleRate { effect: "riaa", rate: 22050 }.error_code(),
            code::INVALID_PARAMETER
        );
        assert_eq!(
            EffectError::InvalidState("not initialized".into()).error_code(),
            code::INVALID_STATE
        );
        assert_eq!(EffectError::Mux("closed".into()).error_code(), code::EXTERNAL);
    }

    #[test]
    fn test_decoder_eof_is_eof() {
        assert!(EffectError::from(DecodeError::EndOfStream).is_eof());
        assert!(!EffectError::NoMemory("fifo".into()).is_eof());
    }
}
