//! Header-delimited framing.
//!
//! Wire format (one frame):
//!
//! ```text
//! Content-Length: <decimal byte count>\n
//! Content-Type: application/json\n
//! Request-uuid: <uuid>\n
//! \n
//! <payload bytes, exactly Content-Length long>
//! ```
//!
//! Frames are concatenated back to back and may be split across transport
//! chunks at any offset, so everything here works on a [`ChunkBuffer`] and
//! reports what it left unconsumed.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::buffer::ChunkBuffer;
use crate::error::ProtocolError;

pub const CONTENT_LENGTH_HEADER: &str = "Content-Length";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const REQUEST_UUID_HEADER: &str = "Request-uuid";

pub const JSON_CONTENT_TYPE: &str = "application/json";

// ── Headers ─────────────────────────────────────────────────────────

/// Insertion-ordered header map. Names are matched case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (in place) the value for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Declared payload length. `None` when the header is missing, empty or
    /// not a decimal number.
    pub fn content_length(&self) -> Option<usize> {
        self.get(CONTENT_LENGTH_HEADER)
            .and_then(|v| v.parse::<usize>().ok())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(REQUEST_UUID_HEADER).filter(|v| !v.is_empty())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE_HEADER)
    }
}

// ── Header block parsing ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParsedHeaders {
    pub headers: Headers,
    /// Bytes after the blank line, or the whole input when unterminated.
    pub remaining: ChunkBuffer,
    /// Whether the blank-line delimiter was found.
    pub terminated: bool,
}

/// Parse the header block at the start of `data`.
///
/// Without a blank line nothing is consumed and no headers are reported,
/// even if complete-looking header lines are present: the block is still
/// arriving.
pub fn parse_headers_and_body(data: &ChunkBuffer) -> ParsedHeaders {
    let mut line_start = 0;
    while let Some(newline) = data.index_of(b'\n', line_start) {
        let mut line_end = newline;
        if line_end > line_start && data.byte_at(line_end - 1) == Ok(b'\r') {
            line_end -= 1;
        }

        if line_end == line_start {
            let (block, rest) = data.split_at(line_start);
            let (_, remaining) = rest.split_at(newline + 1 - line_start);
            return ParsedHeaders {
                headers: parse_header_block(&block.to_bytes()),
                remaining,
                terminated: true,
            };
        }

        line_start = newline + 1;
    }

    ParsedHeaders {
        headers: Headers::new(),
        remaining: data.clone(),
        terminated: false,
    }
}

fn parse_header_block(block: &[u8]) -> Headers {
    let mut headers = Headers::new();
    let text = String::from_utf8_lossy(block);
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.insert(name.trim(), value.trim()),
            None => {
                let err = ProtocolError::MalformedHeaderLine(line.to_string());
                debug!(error = %err, "skipping header line");
            }
        }
    }
    headers
}

// ── Payload extraction ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadState {
    /// `payload` holds exactly the declared bytes.
    Complete,
    /// Fewer bytes than declared are buffered; nothing was consumed.
    Incomplete { missing: usize },
    /// No usable `Content-Length`; nothing was consumed.
    Undeclared,
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub payload: ChunkBuffer,
    pub remaining: ChunkBuffer,
    pub state: PayloadState,
}

/// Take `declared` bytes off the front of `remaining`.
pub fn extract_payload(declared: Option<usize>, remaining: &ChunkBuffer) -> Extracted {
    let Some(length) = declared else {
        return Extracted {
            payload: ChunkBuffer::new(),
            remaining: remaining.clone(),
            state: PayloadState::Undeclared,
        };
    };

    if remaining.len() < length {
        return Extracted {
            payload: ChunkBuffer::new(),
            remaining: remaining.clone(),
            state: PayloadState::Incomplete {
                missing: length - remaining.len(),
            },
        };
    }

    let (payload, rest) = remaining.split_at(length);
    Extracted {
        payload,
        remaining: rest,
        state: PayloadState::Complete,
    }
}

// ── Outbound framing ────────────────────────────────────────────────

pub fn encode_frame(correlation_id: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "{CONTENT_LENGTH_HEADER}: {}\n{CONTENT_TYPE_HEADER}: {JSON_CONTENT_TYPE}\n{REQUEST_UUID_HEADER}: {correlation_id}\n\n",
        payload.len()
    );
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

// ── Drain loop ──────────────────────────────────────────────────────

/// One length-delimited frame pulled off the stream.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub headers: Headers,
    pub payload: ChunkBuffer,
    pub state: PayloadState,
}

/// Header block already parsed for a frame whose payload is still arriving.
#[derive(Debug)]
struct AwaitingPayload {
    headers: Headers,
    body_start: usize,
    length: usize,
}

/// Accumulates inbound chunks and drains every complete frame.
///
/// A frame's header block is parsed once. While its payload is short, each
/// push only compares the buffered length against the declared one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: ChunkBuffer,
    awaiting: Option<AwaitingPayload>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completed, in stream order.
    pub fn push(&mut self, chunk: impl Into<Bytes>) -> Vec<RawFrame> {
        self.pending.append(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Bytes still waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Payload bytes still owed by a frame whose header block is complete.
    pub fn missing(&self) -> Option<usize> {
        self.awaiting
            .as_ref()
            .map(|a| (a.body_start + a.length).saturating_sub(self.pending.len()))
    }

    fn next_frame(&mut self) -> Option<RawFrame> {
        if self.awaiting.is_none() {
            if self.pending.is_empty() {
                return None;
            }

            let parsed = parse_headers_and_body(&self.pending);
            if !parsed.terminated {
                trace!(buffered = self.pending.len(), "header block incomplete");
                return None;
            }

            match parsed.headers.content_length() {
                Some(length) => {
                    self.awaiting = Some(AwaitingPayload {
                        body_start: self.pending.len() - parsed.remaining.len(),
                        headers: parsed.headers,
                        length,
                    });
                }
                None => {
                    self.pending = parsed.remaining;
                    return Some(RawFrame {
                        headers: parsed.headers,
                        payload: ChunkBuffer::new(),
                        state: PayloadState::Undeclared,
                    });
                }
            }
        }

        if let Some(missing) = self.missing().filter(|&m| m > 0) {
            trace!(missing, "payload incomplete");
            return None;
        }

        let awaiting = self.awaiting.take()?;
        let (_, body) = self.pending.split_at(awaiting.body_start);
        let extracted = extract_payload(Some(awaiting.length), &body);
        self.pending = extracted.remaining;
        Some(RawFrame {
            headers: awaiting.headers,
            payload: extracted.payload,
            state: extracted.state,
        })
    }
}

// ── Unit tests ──────────────────────────────────────────────────────
