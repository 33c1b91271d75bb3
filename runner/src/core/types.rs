//! Shared types for agent invocation results.
//!
//! These types define stable contracts between the caller, the scheduler and
//! the CLI. They carry no I/O handles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::stream::StreamEvent;

/// Output format requested from the agent via `--output-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Plain text, captured after exit.
    Text,
    /// A single JSON document, captured after exit.
    Json,
    /// One JSON event per line, consumed while the agent runs.
    #[default]
    StreamJson,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::StreamJson => "stream-json",
        }
    }

    /// True when stdout is decoded line by line into events.
    pub fn is_streaming(self) -> bool {
        self == OutputFormat::StreamJson
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "stream-json" => Ok(OutputFormat::StreamJson),
            other => Err(format!(
                "unknown output format '{other}' (expected text, json or stream-json)"
            )),
        }
    }
}

/// Outcome of one agent invocation.
///
/// Built exactly once per call. Text fields are already sanitized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallResult {
    /// True only when the process exited with status zero.
    pub success: bool,
    /// Sanitized stdout, in arrival order.
    pub output: String,
    /// Sanitized failure text; empty on success.
    pub error: String,
    /// Exit code, `None` when the process was killed or never ran.
    pub exit_code: Option<i32>,
    /// Decoded events, empty unless streaming was requested.
    pub stream_events: Vec<StreamEvent>,
}

impl CallResult {
    /// Text of the last `result` event, if the agent emitted one.
    pub fn final_result_text(&self) -> Option<&str> {
        self.stream_events
            .iter()
            .rev()
            .find(|event| event.kind == "result")
            .and_then(|event| event.str_field("result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::decode;

    #[test]
    fn output_format_parses_and_displays() {
        for format in [
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::StreamJson,
        ] {
            assert_eq!(format.as_str().parse::<OutputFormat>(), Ok(format));
        }
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert!(OutputFormat::StreamJson.is_streaming());
        assert!(!OutputFormat::Json.is_streaming());
    }

    #[test]
    fn final_result_text_uses_last_result_event() {
        let result = CallResult {
            stream_events: [
                r#"{"type":"result","result":"first"}"#,
                r#"{"type":"assistant","text":"x"}"#,
                r#"{"type":"result","result":"second"}"#,
            ]
            .into_iter()
            .filter_map(decode)
            .collect(),
            ..CallResult::default()
        };
        assert_eq!(result.final_result_text(), Some("second"));
    }
}
