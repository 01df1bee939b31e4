//! Byte-stream line framing for SSE transport.
//!
//! Network chunks arrive with arbitrary boundaries: a chunk may end in the
//! middle of a line, or in the middle of a multi-byte UTF-8 sequence. The
//! framer buffers raw bytes and only decodes a line once its terminating
//! newline has arrived, so a split sequence is never mangled.

/// Sentinel payload some upstreams send to mark the end of the stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Splits an incoming byte stream into complete lines.
///
/// Bytes after the last newline of a chunk are retained until a later chunk
/// (or [`LineFramer::finish`]) completes them. The buffer is unbounded: an
/// upstream that never sends a newline grows it without limit. Known
/// limitation, accepted: the upstream is a trusted, well-formed SSE source.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Create a new framer with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning every line it completed.
    ///
    /// Lines are returned in arrival order, without their terminating
    /// newline (a preceding carriage return is also stripped).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
        }
        if start > 0 {
            self.buf.drain(..start);
        }
        lines
    }

    /// Flush the retained tail once the stream has ended.
    ///
    /// Some upstreams omit the final newline; whatever is left in the buffer
    /// is treated as one last line.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buf);
        Some(decode_line(&tail))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Extract the payload of a `data:` line.
///
/// Non-`data:` lines (blank separators, comments, any other framing noise)
/// yield `None`, as do the two sentinel payloads: the empty string and
/// [`DONE_MARKER`].
pub fn data_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == DONE_MARKER {
        return None;
    }
    Some(payload)
}
