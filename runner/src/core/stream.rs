//! Decoding of line-delimited agent events (`--output-format stream-json`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured event emitted by the agent on its own line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event type; never empty.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event subtype, empty when absent or not a string.
    pub subtype: String,
    /// The whole decoded object. Shapes vary by type/subtype.
    pub data: Value,
    /// The line exactly as it was handed to [`decode`].
    pub raw: String,
}

impl StreamEvent {
    /// Look up a string field on the decoded payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Decode a single line into an event.
///
/// Returns `None` for anything that is not a JSON object with a non-empty
/// string `type`: plain text, truncated JSON, arrays, blank lines.
pub fn decode(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let data: Value = serde_json::from_str(trimmed).ok()?;
    let kind = data.get("type")?.as_str()?.to_string();
    if kind.is_empty() {
        return None;
    }
    let subtype = data
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(StreamEvent {
        kind,
        subtype,
        data,
        raw: line.to_string(),
    })
}
