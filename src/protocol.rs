//! The relay's outward-facing wire protocol.
//!
//! Downstream events are serialized one per SSE frame (a `data: <json>`
//! line followed by a blank line) so the client can run the same line
//! framer against the relay that the relay runs against the upstream. The
//! inbound request and the non-streaming response bodies also live here,
//! shared between the server handlers and the client.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::sse::DifyEvent;

/// Inbound request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,
    /// Conversation to continue; omitted for a fresh conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Select the non-streaming variant of the endpoint.
    #[serde(default)]
    pub blocking: bool,
}

/// Response body of the non-streaming variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub answer: String,
    pub conversation_id: String,
}

/// Error body used for non-success relay responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One event on the downstream stream.
///
/// Untagged: each variant is distinguished by the field it alone carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownstreamEvent {
    /// The upstream reported an error.
    Error { error: String },
    /// The answer is complete.
    Done {
        done: bool,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    /// New answer text. `delta` carries the full answer accumulated so far,
    /// not an incremental fragment.
    Delta {
        delta: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

impl DownstreamEvent {
    /// Encode an upstream event, if it has a downstream counterpart.
    ///
    /// [`DifyEvent::Other`] has none and encodes to `None`.
    pub fn from_upstream(event: DifyEvent, conversation_id: &str) -> Option<Self> {
        match event {
            DifyEvent::Message { answer } => Some(Self::Delta {
                delta: answer,
                conversation_id: conversation_id.to_string(),
            }),
            DifyEvent::MessageEnd => Some(Self::Done {
                done: true,
                conversation_id: conversation_id.to_string(),
            }),
            DifyEvent::Error { message } => Some(Self::Error { error: message }),
            DifyEvent::Other => None,
        }
    }

    /// Serialize onto the wire as a single, immediately flushable SSE frame.
    pub fn to_frame(&self) -> Bytes {
        // Only strings and booleans below; serialization cannot fail.
        let json = serde_json::to_string(self).expect("downstream event serializes");
        Bytes::from(format!("data: {json}\n\n"))
    }
}
