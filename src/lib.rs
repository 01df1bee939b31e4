//! Streaming relay and client for a Dify-backed chat endpoint.
//!
//! The relay exposes one conversational endpoint to browser clients and
//! forwards it to the upstream chat-completion API, transcoding the
//! upstream's SSE event stream into a stable downstream protocol. The
//! client side reassembles that stream into a continuously growing answer
//! under a bounded-rate update policy with cancellation and an overall
//! deadline.

pub mod client;
pub mod config;
pub mod dify;
pub mod error;
pub mod protocol;
pub mod server;
pub mod sse;
pub mod throttle;
