//! Option-string parsing shared by the effects
//!
//! Effects take their parameters as whitespace separated tokens. Numbers
//! follow C `strtod` prefix rules: the longest numeric prefix is consumed and
//! whatever follows is the caller's business (width suffixes, `k`, ...).

use crate::error::{EffectError, EffectResult};

/// Split an option string into tokens
pub fn split_args(options: &str) -> Vec<&str> {
    options.split_whitespace().collect()
}

/// Parse the longest floating point prefix of `text`
///
/// Returns the value and the unparsed remainder, or `None` when no digits
/// could be read. Accepts `inf`/`infinity` and `nan` like `strtod`.
pub fn parse_f64_prefix(text: &str) -> Option<(f64, &str)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }

    let lower = text[i..].to_ascii_lowercase();
    for word in ["infinity", "inf", "nan"] {
        if lower.starts_with(word) {
            let end = i + word.len();
            let value: f64 = match word {
                "nan" => f64::NAN,
                _ if bytes.first() == Some(&b'-') => f64::NEG_INFINITY,
                _ => f64::INFINITY,
            };
            return Some((value, &text[end..]));
        }
    }

    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }

    // Exponent only counts when at least one digit follows it
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }

    text[..i].parse::<f64>().ok().map(|v| (v, &text[i..]))
}

/// Parse a whole token as a number, rejecting trailing characters
pub fn parse_f64_exact(text: &str) -> Option<f64> {
    match parse_f64_prefix(text.trim()) {
        Some((v, rest)) if rest.is_empty() => Some(v),
        _ => None,
    }
}

/// Frequency of a note given in semitones relative to A4 (440 Hz)
fn note_frequency(note: f64) -> f64 {
    440.0 * 2f64.powf(note / 12.0)
}

/// Parse a note name such as `A`, `C#5` or `Eb3` into semitones from A4
fn parse_note(text: &str) -> Option<(i32, &str)> {
    let bytes = text.as_bytes();
    let first = *bytes.first()?;
    if !(b'A'..=b'G').contains(&first) {
        return None;
    }
    let mut result = ((5.0 / 3.0 * (first - b'A') as f64 + 9.5) as i32) % 12 - 9;
    let mut i = 1;
    match bytes.get(i) {
        Some(b'b') => {
            result -= 1;
            i += 1;
        }
        Some(b'#') => {
            result += 1;
            i += 1;
        }
        _ => {}
    }
    if let Some(d) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
        result += 12 * (*d as i32 - b'4' as i32);
        i += 1;
    }
    Some((result, &text[i..]))
}

/// Parse a frequency token
///
/// Accepts plain Hz, a `k` suffix for kHz, `%n` for a semitone offset from
/// A4, or a note name. Negative results are rejected.
pub fn parse_frequency(text: &str) -> Option<(f64, &str)> {
    if let Some(stripped) = text.strip_prefix('%') {
        let (note, rest) = parse_f64_prefix(stripped)?;
        return Some((note_frequency(note), rest));
    }
    if let Some((note, rest)) = parse_note(text) {
        return Some((note_frequency(note as f64), rest));
    }
    let (mut value, mut rest) = parse_f64_prefix(text)?;
    if let Some(after_k) = rest.strip_prefix('k') {
        value *= 1000.0;
        rest = after_k;
    }
    if value < 0.0 {
        None
    } else {
        Some((value, rest))
    }
}

/// Cursor over effect arguments for optional positional numbers
///
/// Each call to [`ArgCursor::numeric`] looks at the next token: a token that
/// starts with a number must be fully numeric and within range, otherwise the
/// parse fails; a token that is not numeric at all is left for the caller.
pub struct ArgCursor<'a> {
    effect: &'static str,
    usage: &'static str,
    args: &'a [&'a str],
}

impl<'a> ArgCursor<'a> {
    pub fn new(effect: &'static str, usage: &'static str, args: &'a [&'a str]) -> Self {
        Self { effect, usage, args }
    }

    /// Read an optional bounded number
    pub fn numeric(&mut self, name: &str, min: f64, max: f64) -> EffectResult<Option<f64>> {
        let Some(token) = self.args.first() else {
            return Ok(None);
        };
        match parse_f64_prefix(token) {
            Some((value, rest)) => {
                if value < min || value > max || !rest.is_empty() {
                    return Err(EffectError::usage(
                        self.effect,
                        self.usage,
                        format!("parameter `{}' must be between {} and {}", name, min, max),
                    ));
                }
                self.args = &self.args[1..];
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Consume the next token if it equals one of `flags`
    pub fn flag(&mut self, flags: &[&str]) -> bool {
        match self.args.first() {
            Some(token) if flags.contains(token) => {
                self.args = &self.args[1..];
                true
            }
            _ => false,
        }
    }

    /// Tokens not consumed yet
    pub fn remaining(&self) -> &'a [&'a str] {
        self.args
    }
}
