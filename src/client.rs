//! Client for the relay's conversational endpoint.
//!
//! A thin reqwest wrapper plus a stateful reassembly loop that turns the
//! downstream event stream back into a growing answer string. All
//! per-request state (framer, accumulated answer, throttle) is owned by the
//! reassembly call and dropped wholesale when the request ends, however it
//! ends.

use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::protocol::{ChatRequest, ChatResponse, DownstreamEvent, ErrorResponse};
use crate::sse::{data_payload, LineFramer};
use crate::throttle::{UpdateThrottle, UPDATE_INTERVAL};

/// Overall wall-clock budget for one send operation.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

/// A finished answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub answer: String,
    pub conversation_id: String,
}

/// Lifecycle of one send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPhase {
    #[default]
    Idle,
    /// The request has been issued; no answer text yet.
    Sending,
    /// Answer deltas are arriving.
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// HTTP client for the relay's `POST /api/chat` endpoint.
pub struct ChatClient {
    base_url: String,
    http: reqwest::Client,
}

impl ChatClient {
    /// Create a new client for the given relay base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Send a message using the non-streaming variant.
    pub async fn send_message(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ChatError> {
        let body = ChatRequest {
            message: message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            blocking: true,
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(relay_failure(response).await);
        }

        let reply: ChatResponse = response.json().await?;
        Ok(ChatReply {
            answer: reply.answer,
            conversation_id: reply.conversation_id,
        })
    }

    /// Send a message and stream the answer.
    ///
    /// `on_update` receives the accumulated answer, throttled to at most one
    /// delivery per [`UPDATE_INTERVAL`]; the final value is always delivered.
    /// The operation observes `cancel` at every suspension point and fails
    /// with [`ChatError::Cancelled`] when it fires, and with
    /// [`ChatError::Timeout`] once [`REQUEST_TIMEOUT`] elapses.
    pub async fn send_message_stream<F>(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        cancel: &CancellationToken,
        on_update: F,
    ) -> Result<ChatReply, ChatError>
    where
        F: FnMut(&str),
    {
        let known_id = || conversation_id.filter(|id| !id.is_empty()).map(str::to_string);
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled {
                conversation_id: known_id(),
            });
        }

        let deadline = Instant::now() + REQUEST_TIMEOUT;
        let body = ChatRequest {
            message: message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            blocking: false,
        };
        let request = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ChatError::Cancelled { conversation_id: known_id() });
            }
            _ = sleep_until(deadline) => {
                return Err(ChatError::Timeout {
                    limit: REQUEST_TIMEOUT,
                    conversation_id: known_id(),
                });
            }
            response = request => response?,
        };

        if !response.status().is_success() {
            return Err(relay_failure(response).await);
        }

        let stream = response.bytes_stream().map(|chunk| chunk.map_err(ChatError::from));
        reassemble(stream, conversation_id, cancel, deadline, on_update).await
    }
}

/// One client session: at most one in-flight request, a remembered
/// conversation id, and the cancellation plumbing between requests.
///
/// Sessions are shareable (`Arc<ChatSession>`): issuing a new send while one
/// is in flight cancels the prior request before the new one starts, so the
/// accumulated state only ever has a single writer.
pub struct ChatSession {
    client: ChatClient,
    state: Mutex<SessionState>,
    phase: watch::Sender<RequestPhase>,
}

struct SessionState {
    conversation_id: Option<String>,
    cancel: CancellationToken,
    /// Incremented per send; a superseded request fails the generation check
    /// and can no longer touch session state.
    generation: u64,
}

impl ChatSession {
    /// Create a session over the given client.
    pub fn new(client: ChatClient) -> Self {
        let (phase, _) = watch::channel(RequestPhase::Idle);
        Self {
            client,
            state: Mutex::new(SessionState {
                conversation_id: None,
                cancel: CancellationToken::new(),
                generation: 0,
            }),
            phase,
        }
    }

    /// Conversation id carried over from earlier sends, if any.
    pub fn conversation_id(&self) -> Option<String> {
        self.state.lock().expect("session lock").conversation_id.clone()
    }

    /// Current lifecycle phase of the latest send.
    pub fn phase(&self) -> RequestPhase {
        *self.phase.borrow()
    }

    /// Subscribe to phase transitions, e.g. from a rendering task.
    pub fn watch_phase(&self) -> watch::Receiver<RequestPhase> {
        self.phase.subscribe()
    }

    /// Abort the in-flight request, if any. The aborted send resolves to a
    /// cancelled outcome that callers absorb silently.
    pub fn cancel(&self) {
        self.state.lock().expect("session lock").cancel.cancel();
    }

    /// Send a message on this session's conversation, streaming the answer.
    ///
    /// Any request still in flight is cancelled before this one starts, and
    /// a superseded request can never touch this session's state again.
    pub async fn send<F>(&self, message: &str, mut on_update: F) -> Result<ChatReply, ChatError>
    where
        F: FnMut(&str),
    {
        let (cancel, conversation_id, generation) = self.supersede();
        self.phase.send_replace(RequestPhase::Sending);

        let result = self
            .client
            .send_message_stream(message, conversation_id.as_deref(), &cancel, |text| {
                self.phase.send_replace(RequestPhase::Streaming);
                on_update(text);
            })
            .await;

        self.settle(generation, result)
    }

    /// Send a message using the non-streaming variant.
    pub async fn send_blocking(&self, message: &str) -> Result<ChatReply, ChatError> {
        let (_cancel, conversation_id, generation) = self.supersede();
        self.phase.send_replace(RequestPhase::Sending);

        let result = self
            .client
            .send_message(message, conversation_id.as_deref())
            .await;

        self.settle(generation, result)
    }

    /// Cancel the prior request and claim the session for a new one.
    fn supersede(&self) -> (CancellationToken, Option<String>, u64) {
        let mut state = self.state.lock().expect("session lock");
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.generation += 1;
        (
            state.cancel.clone(),
            state.conversation_id.clone(),
            state.generation,
        )
    }

    fn settle(
        &self,
        generation: u64,
        result: Result<ChatReply, ChatError>,
    ) -> Result<ChatReply, ChatError> {
        let mut state = self.state.lock().expect("session lock");
        if state.generation != generation {
            // Superseded while in flight; a newer request owns the session.
            return result;
        }

        match &result {
            Ok(reply) => {
                state.conversation_id = Some(reply.conversation_id.clone());
                self.phase.send_replace(RequestPhase::Completed);
            }
            Err(err) => {
                // The conversation survives a failed send.
                if let Some(id) = err.conversation_id() {
                    state.conversation_id = Some(id.to_string());
                }
                self.phase.send_replace(if err.is_cancelled() {
                    RequestPhase::Cancelled
                } else {
                    RequestPhase::Failed
                });
            }
        }
        result
    }
}

/// What a downstream line meant for the request.
enum LineOutcome {
    Answer,
    Done,
    Error(String),
    Ignored,
}

/// Drive the downstream event stream to completion.
async fn reassemble<S, F>(
    stream: S,
    seed_conversation_id: Option<&str>,
    cancel: &CancellationToken,
    deadline: Instant,
    mut on_update: F,
) -> Result<ChatReply, ChatError>
where
    S: Stream<Item = Result<Bytes, ChatError>>,
    F: FnMut(&str),
{
    tokio::pin!(stream);

    let mut framer = LineFramer::new();
    let mut throttle = UpdateThrottle::new(UPDATE_INTERVAL);
    let mut answer = String::new();
    let mut conversation_id = seed_conversation_id.unwrap_or_default().to_string();

    let overall = sleep_until(deadline);
    tokio::pin!(overall);

    loop {
        let throttle_deadline = throttle.deadline();
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ChatError::Cancelled {
                    conversation_id: known(&conversation_id),
                });
            }
            _ = &mut overall => {
                return Err(ChatError::Timeout {
                    limit: REQUEST_TIMEOUT,
                    conversation_id: known(&conversation_id),
                });
            }
            _ = wait_until(throttle_deadline), if throttle_deadline.is_some() => {
                if let Some(text) = throttle.fire() {
                    on_update(&text);
                }
                continue;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for line in framer.push(&bytes) {
                    match apply_line(&line, &mut answer, &mut conversation_id) {
                        LineOutcome::Answer => {
                            if let Some(text) = throttle.offer(answer.clone()) {
                                on_update(&text);
                            }
                        }
                        LineOutcome::Done => {
                            return Ok(complete(
                                answer,
                                conversation_id,
                                &mut throttle,
                                &mut on_update,
                            ));
                        }
                        LineOutcome::Error(message) => {
                            return Err(ChatError::Stream {
                                message,
                                conversation_id: known(&conversation_id),
                            });
                        }
                        LineOutcome::Ignored => {}
                    }
                }
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    // The transport closed. A relay is not guaranteed to deliver an explicit
    // terminator, so flush the trailing fragment and synthesize completion
    // from whatever arrived.
    if let Some(line) = framer.finish() {
        match apply_line(&line, &mut answer, &mut conversation_id) {
            LineOutcome::Done => {
                return Ok(complete(answer, conversation_id, &mut throttle, &mut on_update));
            }
            LineOutcome::Error(message) => {
                return Err(ChatError::Stream {
                    message,
                    conversation_id: known(&conversation_id),
                });
            }
            LineOutcome::Answer | LineOutcome::Ignored => {}
        }
    }

    if !answer.is_empty() {
        return Ok(complete(answer, conversation_id, &mut throttle, &mut on_update));
    }

    Err(ChatError::Stream {
        message: "The stream ended before any answer arrived.".to_string(),
        conversation_id: known(&conversation_id),
    })
}

/// Apply one framed line to the request state.
fn apply_line(line: &str, answer: &mut String, conversation_id: &mut String) -> LineOutcome {
    let Some(payload) = data_payload(line) else {
        return LineOutcome::Ignored;
    };
    // Malformed frames are noise, never an error.
    let Ok(event) = serde_json::from_str::<DownstreamEvent>(payload) else {
        return LineOutcome::Ignored;
    };

    match event {
        DownstreamEvent::Delta {
            delta,
            conversation_id: id,
        } => {
            if !id.is_empty() {
                *conversation_id = id;
            }
            // The wire carries the full answer so far; replace, don't append.
            *answer = delta;
            LineOutcome::Answer
        }
        DownstreamEvent::Done {
            conversation_id: id,
            ..
        } => {
            if !id.is_empty() {
                *conversation_id = id;
            }
            LineOutcome::Done
        }
        DownstreamEvent::Error { error } => LineOutcome::Error(error),
    }
}

/// Final delivery: bypasses the throttle entirely.
fn complete<F: FnMut(&str)>(
    answer: String,
    conversation_id: String,
    throttle: &mut UpdateThrottle,
    on_update: &mut F,
) -> ChatReply {
    throttle.cancel_pending();
    on_update(&answer);
    ChatReply {
        answer,
        conversation_id,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn known(conversation_id: &str) -> Option<String> {
    if conversation_id.is_empty() {
        None
    } else {
        Some(conversation_id.to_string())
    }
}

/// Map a non-success relay response to a [`ChatError`], unwrapping the
/// relay's `{"error": ...}` body when present.
async fn relay_failure(response: reqwest::Response) -> ChatError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    ChatError::Upstream { status, message }
}
