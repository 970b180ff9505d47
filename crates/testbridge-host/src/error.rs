//! Error taxonomy for the bridge.
//!
//! Partial data is not an error: the buffer simply keeps accumulating.
//! Everything parsing-level is a [`ProtocolError`], contained by the drain
//! loop and reported through `tracing`. Only request-level failures
//! ([`SessionError`]) reach a caller.

use thiserror::Error;

use crate::router::ResolverKind;

/// Range failures on a [`ChunkBuffer`](crate::buffer::ChunkBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("offset {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid range {start}..{end} (len {len})")]
    InvalidRange { start: usize, end: usize, len: usize },
}

/// Anomalies inside one frame. Never fatal to the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed header line: {0:?}")]
    MalformedHeaderLine(String),

    #[error("malformed payload for request {correlation_id:?}: {reason}")]
    MalformedPayload {
        correlation_id: Option<String>,
        reason: String,
    },

    #[error("frame has no Request-uuid header")]
    MissingCorrelationId,

    #[error("no pending request for correlation id {0}")]
    UnroutableCorrelationId(String),
}

/// Failures delivered to the caller of a specific request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelationId(String),

    #[error("session terminated")]
    SessionTerminated,

    #[error("request {0} was cancelled")]
    Cancelled(String),

    #[error("request {id} timed out after {millis}ms")]
    Timeout { id: String, millis: u64 },

    #[error("{kind} result could not be decoded: {reason}")]
    MalformedResult { kind: ResolverKind, reason: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("runner launch failed: {0}")]
    Launch(String),

    #[error("request encoding failed: {0}")]
    Encode(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Encode(e.to_string())
    }
}
