//! Promotional Code Extractor: pure, deterministic scan of message text.
//!
//! Patterns are tried in priority order and the first match wins:
//! 1. an explicit label (`Descuento: Nv5M-ilY.`)
//! 2. any word-bounded token of 8–21 code characters
//! 3. any word-bounded token of 1–21 code characters
//!
//! Pattern 3 matches nearly every message. Callers decide through
//! `FallbackPolicy` how much to trust fallback matches.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static LABELED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:descuento|codigo|código|token|promocion|promoción)\s*:\s*([A-Za-z0-9_-]{1,21})\.?")
        .expect("labeled code pattern is valid")
});

static FALLBACK_LONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z0-9_-]{8,21})\b").expect("long fallback pattern is valid")
});

static FALLBACK_ANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z0-9_-]{1,21})\b").expect("short fallback pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSource {
    Labeled,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedCode {
    pub code: String,
    pub source: CodeSource,
}

/// How fallback (unlabeled) matches are treated by the message pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Fallback matches are used like labeled ones.
    #[default]
    Permissive,
    /// Fallback matches are used only when a tracking visit exists for the code.
    KnownOnly,
    /// Only labeled matches are used.
    Disabled,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(FallbackPolicy::Permissive),
            "known_only" => Ok(FallbackPolicy::KnownOnly),
            "disabled" => Ok(FallbackPolicy::Disabled),
            other => Err(format!(
                "CODE_FALLBACK must be one of permissive, known_only, disabled (got '{other}')"
            )),
        }
    }
}

/// Returns the code embedded in `text` and the pattern family that matched,
/// or `None` when no pattern matches.
pub fn extract_code(text: &str) -> Option<ExtractedCode> {
    if let Some(code) = first_capture(&LABELED, text) {
        return Some(ExtractedCode {
            code,
            source: CodeSource::Labeled,
        });
    }
    first_capture(&FALLBACK_LONG, text)
        .or_else(|| first_capture(&FALLBACK_ANY, text))
        .map(|code| ExtractedCode {
            code,
            source: CodeSource::Fallback,
        })
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
