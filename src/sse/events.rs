//! Upstream event types for the Dify chat-messages stream.

use serde::Deserialize;

/// Fallback text used when an upstream error event carries no message.
pub const GENERIC_ERROR_MESSAGE: &str = "Unknown error";

/// Raw payload of one upstream `data:` line.
///
/// Only the fields the relay cares about; anything else in the payload is
/// ignored. Every field is optional because the upstream interleaves several
/// event shapes on a single stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StreamPayload {
    /// Discriminator for the event kind.
    #[serde(default)]
    pub event: Option<String>,
    /// Conversation id, assigned by the upstream on the first event.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// New answer text carried by message events.
    #[serde(default)]
    pub answer: Option<String>,
    /// Human-readable message carried by error events.
    #[serde(default)]
    pub message: Option<String>,
}

/// Classified upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum DifyEvent {
    /// Model output. `answer` is the full answer text produced so far.
    Message { answer: String },
    /// The upstream finished the current message.
    MessageEnd,
    /// The upstream reported an error.
    Error { message: String },
    /// Any other event kind; never forwarded downstream.
    Other,
}
