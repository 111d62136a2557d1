//! Request and response DTOs for the web gateway API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Chat ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Conversation this message belongs to. Omitted means the shared
    /// default session, which is what a single-user frontend wants: the
    /// pending-confirmation flow only works when consecutive messages
    /// land in the same session.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    /// Echoes the session the message was routed to, so clients can pin it.
    pub session_id: String,
    /// Structured side data (addresses, transaction hashes) when a turn
    /// produced any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channel: &'static str,
}
