//! Decoding of Claude CLI JSON output.
//!
//! `--output-format json` prints one [`CliResult`] object. With
//! `--output-format stream-json` the CLI prints one JSON event per line in one
//! of these envelopes:
//!
//! ```text
//! {"type":"content_block_delta","delta":{"type":"text_delta","text":"..."}}
//! {"type":"stream_event","event":{"type":"content_block_delta","delta":{...}},"session_id":"..."}
//! {"delta":{"type":"text_delta","text":"..."}}
//! ```
//!
//! Anything else (system init, assistant messages, results, diagnostics that
//! are not JSON at all) carries no text.

use serde::Deserialize;
use serde_json::Value;

/// What one stream line contributes to the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    /// Text fragment to forward, never empty.
    pub text: Option<String>,
    /// CLI session id reported by the line.
    pub resume_token: Option<String>,
}

impl Frame {
    /// True when the line carried nothing of interest.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.resume_token.is_none()
    }
}

/// Classify one decoded stream event.
#[must_use]
pub fn decode_frame(raw: &Value) -> Frame {
    Frame {
        text: extract_text(raw).filter(|t| !t.is_empty()).map(String::from),
        resume_token: extract_resume_token(raw).map(String::from),
    }
}

/// Decode one raw stream line.
///
/// Returns `None` for blank lines and lines that are not JSON.
#[must_use]
pub fn decode_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(raw) => Some(decode_frame(&raw)),
        Err(e) => {
            tracing::trace!(error = %e, line, "Skipping non-JSON stream line");
            None
        }
    }
}

fn kind(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

fn text_delta(delta: Option<&Value>) -> Option<&str> {
    let delta = delta?;
    if kind(delta) == Some("text_delta") {
        delta.get("text").and_then(Value::as_str)
    } else {
        None
    }
}

fn extract_text(raw: &Value) -> Option<&str> {
    // Wrapped envelope: decided entirely by the inner event.
    if kind(raw) == Some("stream_event") {
        if let Some(event) = raw.get("event").filter(|e| e.is_object()) {
            if kind(event) == Some("content_block_delta") {
                return text_delta(event.get("delta"));
            }
            return None;
        }
    }

    if kind(raw) == Some("content_block_delta") {
        return text_delta(raw.get("delta"));
    }

    text_delta(raw.get("delta")).filter(|text| !text.is_empty())
}

fn extract_resume_token(raw: &Value) -> Option<&str> {
    raw.get("session_id")
        .and_then(Value::as_str)
        .or_else(|| {
            raw.get("event")
                .and_then(|event| event.get("session_id"))
                .and_then(Value::as_str)
        })
}

/// Result object printed by `--output-format json`.
///
/// Only the fields the proxy consumes are modelled; the CLI also reports cost,
/// duration and turn counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CliResult {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl CliResult {
    /// Parse a result object, `None` if `stdout` is not one.
    #[must_use]
    pub fn parse(stdout: &str) -> Option<Self> {
        serde_json::from_str(stdout.trim()).ok()
    }
}
