// crates/client/src/sse.rs
//! Minimal incremental `text/event-stream` decoder.
//!
//! Feeds on raw response body chunks, which may split lines and events
//! at arbitrary byte boundaries, and yields the `data` payload of each
//! complete event. Only the subset of the SSE format the server emits
//! is supported: `data:` lines, blank-line event delimiters, `:`
//! comments, and CRLF or LF line endings. `event:`/`id:`/`retry:`
//! fields are ignored.

/// Incremental decoder; one instance per response body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns the data payloads of every event
    /// completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line: dispatch the accumulated event, if any.
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // Comments and other fields are ignored.
        }
        events
    }
}
