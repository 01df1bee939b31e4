//! Dify API client for upstream chat completion.
//!
//! One endpoint matters: `POST /chat-messages` with a bearer credential,
//! either in streaming mode (the response body is an SSE event stream) or in
//! blocking mode (a single JSON answer).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default upstream base URL.
pub const DEFAULT_API_URL: &str = "https://api.dify.ai/v1";

/// Upstream requests are abandoned after this long, independent of any
/// client-side deadline.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// The upstream requires a stable end-user identifier; the relay is
/// single-tenant, so a fixed placeholder is sent.
const PLACEHOLDER_USER: &str = "default-user";

/// Error type for Dify client operations.
#[derive(Debug)]
pub enum DifyError {
    /// The HTTP request failed before a usable response arrived.
    Http(reqwest::Error),
    /// The upstream answered with a non-success status; the raw body text is
    /// passed through, not reinterpreted.
    Api { status: u16, body: String },
}

impl std::fmt::Display for DifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifyError::Http(e) => write!(f, "HTTP error: {}", e),
            DifyError::Api { status, body } => write!(f, "Upstream error ({}): {}", status, body),
        }
    }
}

impl std::error::Error for DifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DifyError::Http(e) => Some(e),
            DifyError::Api { .. } => None,
        }
    }
}

impl From<reqwest::Error> for DifyError {
    fn from(e: reqwest::Error) -> Self {
        DifyError::Http(e)
    }
}

/// How the upstream should deliver its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// Request body for `POST /chat-messages`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageRequest {
    /// Always empty; the upstream app defines no input variables.
    pub inputs: serde_json::Value,
    /// The user's message.
    pub query: String,
    pub response_mode: ResponseMode,
    pub user: String,
    /// Conversation to continue; omitted for a fresh conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatMessageRequest {
    /// Build a request for the given message and conversation.
    pub fn new(query: impl Into<String>, mode: ResponseMode, conversation_id: Option<&str>) -> Self {
        Self {
            inputs: serde_json::json!({}),
            query: query.into(),
            response_mode: mode,
            user: PLACEHOLDER_USER.to_string(),
            conversation_id: conversation_id
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        }
    }
}

/// Response body of a blocking `chat-messages` call.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockingChatResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub conversation_id: String,
}

/// Client for the upstream chat-completion API.
pub struct DifyClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl DifyClient {
    /// Create a new client for the given base URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: Client::new(),
        }
    }

    /// Open a streaming chat completion.
    ///
    /// The returned response's byte stream carries the upstream SSE events.
    /// A non-success status comes back as [`DifyError::Api`] with the raw
    /// body text.
    pub async fn chat_stream(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<reqwest::Response, DifyError> {
        let request = ChatMessageRequest::new(query, ResponseMode::Streaming, conversation_id);
        self.post_chat(&request).await
    }

    /// Run a blocking chat completion and return the finished answer.
    pub async fn chat_blocking(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<BlockingChatResponse, DifyError> {
        let request = ChatMessageRequest::new(query, ResponseMode::Blocking, conversation_id);
        let response = self.post_chat(&request).await?;
        Ok(response.json().await?)
    }

    async fn post_chat(
        &self,
        request: &ChatMessageRequest,
    ) -> Result<reqwest::Response, DifyError> {
        let url = format!("{}/chat-messages", self.base_url);

        let mut builder = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(UPSTREAM_TIMEOUT)
            .json(request);
        if request.response_mode == ResponseMode::Streaming {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DifyError::Api { status, body });
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_streaming() {
        let request = ChatMessageRequest::new("hello", ResponseMode::Streaming, Some("c-1"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["inputs"], serde_json::json!({}));
        assert_eq!(json["query"], "hello");
        assert_eq!(json["response_mode"], "streaming");
        assert_eq!(json["user"], "default-user");
        assert_eq!(json["conversation_id"], "c-1");
    }

    #[test]
    fn test_request_body_omits_missing_conversation() {
        let request = ChatMessageRequest::new("hello", ResponseMode::Blocking, None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_mode"], "blocking");
        assert!(json.get("conversation_id").is_none());
    }

    #[test]
    fn test_request_body_omits_empty_conversation() {
        let request = ChatMessageRequest::new("hello", ResponseMode::Streaming, Some(""));
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("conversation_id").is_none());
    }

    #[test]
    fn test_blocking_response_defaults() {
        let parsed: BlockingChatResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.answer, "");
        assert_eq!(parsed.conversation_id, "");

        let parsed: BlockingChatResponse = serde_json::from_str(
            r#"{"answer": "42", "conversation_id": "c-2", "message_id": "m-1"}"#,
        )
        .unwrap();
        assert_eq!(parsed.answer, "42");
        assert_eq!(parsed.conversation_id, "c-2");
    }

    #[test]
    fn test_dify_error_display() {
        let err = DifyError::Api {
            status: 401,
            body: "invalid api key".to_string(),
        };
        assert_eq!(format!("{}", err), "Upstream error (401): invalid api key");
    }
}
