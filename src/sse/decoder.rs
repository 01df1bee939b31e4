//! Stateful decoding of upstream `data:` payloads.

use super::events::{DifyEvent, StreamPayload, GENERIC_ERROR_MESSAGE};

/// Decodes extracted upstream payloads into [`DifyEvent`]s.
///
/// The decoder owns the per-request stream state: the latest conversation id
/// the upstream has announced, and the answer accumulated from message
/// fragments. The upstream sends incremental fragments; downstream consumers
/// receive the cumulative text, so the accumulation lives here.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    conversation_id: String,
    answer: String,
}

impl StreamDecoder {
    /// Create a decoder with no known conversation id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder seeded with the conversation id from the inbound
    /// request, so it is echoed downstream before the upstream announces one.
    pub fn with_conversation_id(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            answer: String::new(),
        }
    }

    /// Latest known conversation id. Empty until one has been observed.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Decode one extracted `data:` payload.
    ///
    /// Returns `None` for payloads that are not JSON (the upstream is known
    /// to emit keep-alive and partial noise lines, so unparseable payloads
    /// are dropped rather than surfaced as errors) and for message events
    /// carrying no new text. Unrecognized event kinds come back as
    /// [`DifyEvent::Other`].
    pub fn decode(&mut self, payload: &str) -> Option<DifyEvent> {
        let payload: StreamPayload = serde_json::from_str(payload).ok()?;

        // Last write wins, even on events that are otherwise dropped.
        if let Some(id) = payload.conversation_id {
            self.conversation_id = id;
        }

        match payload.event.as_deref() {
            // Both kinds carry model output for the message in progress.
            Some("message") | Some("agent_message") => {
                let fragment = payload.answer.unwrap_or_default();
                if fragment.is_empty() {
                    return None;
                }
                self.answer.push_str(&fragment);
                Some(DifyEvent::Message {
                    answer: self.answer.clone(),
                })
            }
            Some("message_end") => Some(DifyEvent::MessageEnd),
            Some("error") => Some(DifyEvent::Error {
                message: payload
                    .message
                    .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
            }),
            _ => Some(DifyEvent::Other),
        }
    }
}
