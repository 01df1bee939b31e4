//! Failure taxonomy for chat send operations.

use std::time::Duration;

/// Error type for a chat send operation.
///
/// Variants that can occur after the upstream assigned a conversation id
/// carry it, so callers keep the conversation even across failures.
#[derive(Debug)]
pub enum ChatError {
    /// Network/connection failure talking to the relay.
    Transport(reqwest::Error),
    /// The relay answered with a non-success status (an upstream rejection
    /// passed through, or the relay failing to reach the upstream at all).
    Upstream { status: u16, message: String },
    /// The stream carried an explicit error event, or ended unusably.
    Stream {
        message: String,
        conversation_id: Option<String>,
    },
    /// The overall response deadline elapsed.
    Timeout {
        limit: Duration,
        conversation_id: Option<String>,
    },
    /// The operation was cancelled; callers absorb this silently.
    Cancelled { conversation_id: Option<String> },
}

impl ChatError {
    /// Whether this failure came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled { .. })
    }

    /// Conversation id observed before the failure, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ChatError::Stream {
                conversation_id, ..
            }
            | ChatError::Timeout {
                conversation_id, ..
            }
            | ChatError::Cancelled { conversation_id } => conversation_id.as_deref(),
            ChatError::Transport(_) | ChatError::Upstream { .. } => None,
        }
    }

    /// User-facing message for this failure.
    ///
    /// `None` for cancellation, which must stay invisible to the user.
    pub fn user_message(&self) -> Option<String> {
        match self {
            ChatError::Transport(_) => {
                Some("The connection failed. Please try again.".to_string())
            }
            ChatError::Upstream { message, .. } | ChatError::Stream { message, .. } => {
                Some(message.clone())
            }
            ChatError::Timeout { limit, .. } => Some(format!(
                "No complete response after {} seconds. Please try again.",
                limit.as_secs()
            )),
            ChatError::Cancelled { .. } => None,
        }
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Transport(e) => write!(f, "Transport error: {}", e),
            ChatError::Upstream { status, message } => {
                write!(f, "Upstream error ({}): {}", status, message)
            }
            ChatError::Stream { message, .. } => write!(f, "Stream error: {}", message),
            ChatError::Timeout { limit, .. } => {
                write!(f, "Timed out after {} seconds", limit.as_secs())
            }
            ChatError::Cancelled { .. } => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Transport(e)
    }
}
