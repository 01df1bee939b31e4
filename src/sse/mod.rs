//! SSE stream plumbing shared by the relay and the client.
//!
//! The pipeline runs in three stages:
//! - `framer` turns arbitrary byte chunks into complete lines and extracts
//!   `data:` payloads from them
//! - `events` holds the upstream event types
//! - `decoder` classifies payloads and accumulates the answer

mod decoder;
mod events;
mod framer;

pub use decoder::StreamDecoder;
pub use events::{DifyEvent, GENERIC_ERROR_MESSAGE};
pub use framer::{data_payload, LineFramer, DONE_MARKER};
