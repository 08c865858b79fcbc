//! Conversation envelope exchanged with agent providers.
//!
//! ```text
//! {
//!   "user_data": { "subject": "...", "fields": { "prompt": "...", "turn": 1 } },
//!   "actions": "<script run in a fresh fork; its output is the turn output>",
//!   "loop": { "signal": "continue" | "done" | "abort", "notes": "...", "reason": "..." }
//! }
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("reply is not valid envelope json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reply is empty")]
    Empty,
}

/// Parsed signal. Anything unrecognised is kept verbatim and treated as a
/// request to stop.
#[derive(Debug, Clone, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LoopSignal {
    Continue,
    Done,
    Abort,
    #[strum(default)]
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopControl {
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl LoopControl {
    /// `None` when the reply carried no signal at all.
    pub fn signal(&self) -> Option<LoopSignal> {
        self.signal
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| LoopSignal::from_str(s).unwrap_or_else(|_| LoopSignal::Unknown(s.to_string())))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub user_data: JsonValue,
    /// Script text, or an already structured script (passed to the parser
    /// as JSON).
    #[serde(default)]
    pub actions: JsonValue,
    #[serde(default, rename = "loop")]
    pub loop_control: LoopControl,
}

impl Envelope {
    pub fn request(
        subject: &str,
        prompt: JsonValue,
        turn: usize,
        previous_output: Option<&str>,
    ) -> Self {
        let mut fields = json!({
            "prompt": prompt,
            "turn": turn,
        });
        if let Some(previous) = previous_output {
            fields["previous_output"] = JsonValue::String(previous.to_string());
        }
        Self {
            user_data: json!({
                "subject": subject,
                "fields": fields,
            }),
            actions: JsonValue::Null,
            loop_control: LoopControl::default(),
        }
    }

    pub fn to_prompt(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a provider reply. Markdown code fences around the JSON are
    /// tolerated.
    pub fn parse(reply: &str) -> Result<Self, EnvelopeError> {
        let body = strip_code_fence(reply.trim());
        if body.is_empty() {
            return Err(EnvelopeError::Empty);
        }
        Ok(serde_json::from_str(body)?)
    }

    pub fn actions_source(&self) -> String {
        match &self.actions {
            JsonValue::Null => String::new(),
            JsonValue::String(source) => source.clone(),
            other => other.to_string(),
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // 言語タグ (```json) を読み飛ばす
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
