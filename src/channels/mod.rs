//! Channel-facing message types.
//!
//! Channels (REPL, HTTP gateway) normalize their input into
//! [`IncomingMessage`] and render [`TurnReply`] back out. The agent never
//! knows which channel a turn came from.

use serde::{Deserialize, Serialize};

pub mod repl;
pub mod web;

/// One user turn, normalized across channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Channel name, e.g. `repl` or `web`.
    pub channel: String,
    /// Stable session key; turns sharing it are serialized.
    pub session_id: String,
    pub content: String,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            session_id: session_id.into(),
            content: content.into(),
        }
    }
}

/// The agent's answer to one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub text: String,
    /// Structured companion data for channels that can render it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl TurnReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: None,
        }
    }

    pub fn with_payload(text: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            payload: Some(payload),
        }
    }
}
