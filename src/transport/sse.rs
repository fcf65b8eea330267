//! Incremental Server-Sent Events parser
//!
//! Feeds on raw byte chunks as they arrive from the transport and yields
//! complete SSE messages. Chunk boundaries are arbitrary: a message may
//! span many chunks or a chunk may hold many messages, down to
//! byte-by-byte delivery. No bytes are ever dropped; invalid UTF-8 is
//! decoded with the replacement character.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ErrorDetails;

/// One `name: value` line of an SSE message. Comment lines (leading `:`)
/// are kept under the field name `comment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseField {
    pub name: String,
    pub value: String,
}

/// A complete SSE message: the ordered fields of one block, stamped with
/// the monotonic time at which the terminating delimiter was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseMessage {
    pub perf_ns: u64,
    pub fields: Vec<SseField>,
}

impl SseMessage {
    /// Concatenated `data` field values, in order.
    pub fn data(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.name == "data")
            .map(|f| f.value.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// The `event` field value, if present.
    pub fn event(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == "event")
            .map(|f| f.value.as_str())
    }

    /// If this message is an `event: error`, builds the error details
    /// from its data or comment payload.
    pub fn error_details(&self) -> Option<ErrorDetails> {
        if self.event() != Some("error") {
            return None;
        }
        let message = self
            .data()
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|f| f.name == "comment")
                    .map(|f| f.value.clone())
            })
            .unwrap_or_else(|| "SSE error event".to_string());
        Some(ErrorDetails::new(None, "SSEResponseError", message))
    }
}

/// Incremental parser state. Push chunks in; take complete messages out.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: BytesMut,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Appends a chunk and returns every message completed by it.
    /// `perf_ns` stamps each completed message.
    pub fn push(&mut self, chunk: &[u8], perf_ns: u64) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some((end, delim_len)) = find_delimiter(&self.buffer) {
            let block = self.buffer.split_to(end);
            self.buffer.advance(delim_len);
            if let Some(message) = parse_block(&block, perf_ns) {
                messages.push(message);
            }
        }
        messages
    }

    /// Flushes a trailing block that was never terminated by a blank
    /// line. Called once at end-of-stream.
    pub fn finish(&mut self, perf_ns: u64) -> Option<SseMessage> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = self.buffer.split();
        parse_block(&block, perf_ns)
    }
}

/// Locates the earliest LF-LF or CRLF-CRLF delimiter. Returns the block
/// end offset and the delimiter length.
fn find_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let lf_lf = find_subslice(buf, b"\n\n");
    let crlf_crlf = find_subslice(buf, b"\r\n\r\n");
    match (lf_lf, crlf_crlf) {
        // A CRLF-CRLF at position p also contains an LF-LF? No: its bytes
        // are \r\n\r\n, so the LF-LF search finds nothing inside it. Pick
        // whichever delimiter appears first in the stream.
        (Some(a), Some(b)) => {
            if a < b {
                Some((a, 2))
            } else {
                Some((b, 4))
            }
        }
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses one delimiter-free block into a message. Blocks with no
/// parseable fields (blank keep-alives) yield `None`.
fn parse_block(block: &[u8], perf_ns: u64) -> Option<SseMessage> {
    let text = String::from_utf8_lossy(block);
    let mut fields = Vec::new();

    for line in text.split(['\n']) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix(':') {
            fields.push(SseField {
                name: "comment".to_string(),
                value: comment.strip_prefix(' ').unwrap_or(comment).to_string(),
            });
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => fields.push(SseField {
                name: name.to_string(),
                value: value.strip_prefix(' ').unwrap_or(value).to_string(),
            }),
            // A field name with no colon is a valid SSE line with an
            // empty value.
            None => fields.push(SseField {
                name: line.to_string(),
                value: String::new(),
            }),
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some(SseMessage { perf_ns, fields })
    }
}
