//! The relay HTTP server.
//!
//! One conversational endpoint: `POST /api/chat`. The streaming variant
//! pipes the upstream SSE stream through the transcoding pipeline; the
//! blocking variant returns a single JSON answer. Non-success upstream
//! responses are passed through with their status and body untouched.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::dify::{DifyClient, DifyError};
use crate::protocol::{ChatRequest, ChatResponse, DownstreamEvent, ErrorResponse};
use crate::sse::{data_payload, LineFramer, StreamDecoder};

/// Shared state for the relay handlers.
#[derive(Clone)]
pub struct AppState {
    dify: Arc<DifyClient>,
}

impl AppState {
    pub fn new(dify: DifyClient) -> Self {
        Self {
            dify: Arc::new(dify),
        }
    }
}

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    // Permissive CORS: the browser client is served from another origin
    // during development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve the relay on the given address.
///
/// Returns the bound address (useful with port 0) and the server task
/// handle.
pub async fn serve_on(
    addr: SocketAddr,
    state: AppState,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    let app = router(state);

    tracing::info!("relay listening on http://{}", actual_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("relay server error: {}", e);
        }
    });

    Ok((actual_addr, handle))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.blocking {
        blocking_chat(state, request).await
    } else {
        streaming_chat(state, request).await
    }
}

async fn streaming_chat(state: AppState, request: ChatRequest) -> Response {
    let conversation_id = request.conversation_id.unwrap_or_default();

    match state
        .dify
        .chat_stream(&request.message, Some(conversation_id.as_str()))
        .await
    {
        Ok(upstream) => {
            tracing::debug!("upstream stream opened");
            sse_response(transcode(upstream.bytes_stream().boxed(), conversation_id))
        }
        Err(e) => upstream_failure(e),
    }
}

async fn blocking_chat(state: AppState, request: ChatRequest) -> Response {
    match state
        .dify
        .chat_blocking(&request.message, request.conversation_id.as_deref())
        .await
    {
        Ok(reply) => Json(ChatResponse {
            answer: reply.answer,
            conversation_id: reply.conversation_id,
        })
        .into_response(),
        Err(e) => upstream_failure(e),
    }
}

/// Short-circuit a failed upstream call to a single non-streaming response.
fn upstream_failure(error: DifyError) -> Response {
    match error {
        DifyError::Api { status, body } => {
            tracing::warn!(status, "upstream rejected chat request");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(ErrorResponse { error: body })).into_response()
        }
        DifyError::Http(e) => {
            tracing::error!("upstream request failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "Failed to reach upstream".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Transcode the upstream SSE byte stream into downstream frames.
///
/// Each downstream event becomes its own body chunk, flushed as soon as it
/// exists. The upstream response is owned by the stream state and dropped on
/// any exit: completion, upstream failure, or the client going away.
fn transcode<S, E>(
    upstream: S,
    conversation_id: String,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let framer = LineFramer::new();
    let decoder = StreamDecoder::with_conversation_id(conversation_id);

    stream::unfold(
        (upstream, framer, decoder, VecDeque::<String>::new(), false),
        |(mut upstream, mut framer, mut decoder, mut lines, mut eof)| async move {
            loop {
                while let Some(line) = lines.pop_front() {
                    let Some(payload) = data_payload(&line) else {
                        continue;
                    };
                    let Some(event) = decoder.decode(payload) else {
                        continue;
                    };
                    if let Some(down) =
                        DownstreamEvent::from_upstream(event, decoder.conversation_id())
                    {
                        let frame = down.to_frame();
                        return Some((Ok(frame), (upstream, framer, decoder, lines, eof)));
                    }
                }

                if eof {
                    return None;
                }

                match upstream.next().await {
                    Some(Ok(chunk)) => lines.extend(framer.push(&chunk)),
                    Some(Err(e)) => {
                        // The client reassembler synthesizes completion from
                        // what has been forwarded; nothing useful to add.
                        tracing::warn!("upstream stream failed: {}", e);
                        return None;
                    }
                    None => {
                        eof = true;
                        if let Some(line) = framer.finish() {
                            lines.push_back(line);
                        }
                    }
                }
            }
        },
    )
}

fn sse_response(
    body: impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
) -> Response {
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/event-stream"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a sequence of upstream chunks through the transcoder.
    async fn transcode_chunks(chunks: Vec<&str>, conversation_id: &str) -> Vec<String> {
        let upstream = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::copy_from_slice(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed();

        transcode(upstream, conversation_id.to_string())
            .map(|frame| {
                let frame = frame.unwrap();
                String::from_utf8(frame.to_vec()).unwrap()
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_message_fragments_become_cumulative_deltas() {
        let frames = transcode_chunks(
            vec![
                "data: {\"event\": \"message\", \"answer\": \"Hel\", \"conversation_id\": \"c-1\"}\n\n",
                "data: {\"event\": \"message\", \"answer\": \"lo\"}\n\n",
                "data: {\"event\": \"message_end\"}\n\n",
            ],
            "",
        )
        .await;

        assert_eq!(
            frames,
            vec![
                "data: {\"delta\":\"Hel\",\"conversationId\":\"c-1\"}\n\n",
                "data: {\"delta\":\"Hello\",\"conversationId\":\"c-1\"}\n\n",
                "data: {\"done\":true,\"conversationId\":\"c-1\"}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn test_frames_split_across_chunk_boundaries() {
        let whole = transcode_chunks(
            vec!["data: {\"event\": \"message\", \"answer\": \"hi\"}\n\ndata: {\"event\": \"message_end\"}\n\n"],
            "seed",
        )
        .await;
        let split = transcode_chunks(
            vec![
                "data: {\"event\": \"mess",
                "age\", \"answer\": \"hi\"}\n",
                "\ndata: {\"event\": \"message_end\"}\n\n",
            ],
            "seed",
        )
        .await;

        assert_eq!(whole, split);
        assert_eq!(
            whole[0],
            "data: {\"delta\":\"hi\",\"conversationId\":\"seed\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_noise_and_unknown_events_are_dropped() {
        let frames = transcode_chunks(
            vec![
                ": ping\n\n",
                "data: \n\n",
                "data: [DONE]\n\n",
                "data: not json at all\n\n",
                "data: {\"event\": \"workflow_started\", \"conversation_id\": \"c-2\"}\n\n",
                "data: {\"event\": \"message\", \"answer\": \"\"}\n\n",
                "data: {\"event\": \"message\", \"answer\": \"ok\"}\n\n",
            ],
            "",
        )
        .await;

        // Only the non-empty message survives; the unknown event still
        // contributed its conversation id.
        assert_eq!(
            frames,
            vec!["data: {\"delta\":\"ok\",\"conversationId\":\"c-2\"}\n\n"]
        );
    }

    #[tokio::test]
    async fn test_error_event_without_message_uses_fallback() {
        let frames = transcode_chunks(vec!["data: {\"event\": \"error\"}\n\n"], "").await;
        assert_eq!(frames, vec!["data: {\"error\":\"Unknown error\"}\n\n"]);
    }

    #[tokio::test]
    async fn test_error_event_message_passed_through() {
        let frames = transcode_chunks(
            vec!["data: {\"event\": \"error\", \"message\": \"quota exceeded\"}\n\n"],
            "",
        )
        .await;
        assert_eq!(frames, vec!["data: {\"error\":\"quota exceeded\"}\n\n"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline_is_flushed() {
        let frames = transcode_chunks(
            vec!["data: {\"event\": \"message\", \"answer\": \"tail\"}"],
            "c-3",
        )
        .await;
        assert_eq!(
            frames,
            vec!["data: {\"delta\":\"tail\",\"conversationId\":\"c-3\"}\n\n"]
        );
    }

    #[tokio::test]
    async fn test_upstream_transport_error_closes_stream() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"event\": \"message\", \"answer\": \"partial\"}\n\n",
            )),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "reset")),
        ])
        .boxed();

        let frames: Vec<_> = transcode(upstream, String::new())
            .map(|frame| String::from_utf8(frame.unwrap().to_vec()).unwrap())
            .collect()
            .await;

        // The forwarded delta stands; the failure just ends the stream.
        assert_eq!(
            frames,
            vec!["data: {\"delta\":\"partial\",\"conversationId\":\"\"}\n\n"]
        );
    }
}
