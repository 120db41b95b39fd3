//! Types for the realtime change stream

use serde_json::Value;
use thiserror::Error;

/// Kind of change pushed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A node was written or replaced
    Put,
    /// Children were merged into a node
    Patch,
    /// Liveness signal; carries no data
    KeepAlive,
    /// The server revoked the stream
    Cancel,
    /// Credentials expired or were rejected mid-stream
    AuthRevoked,
    /// Frame delivered but not understood
    Unknown,
}

impl EventKind {
    /// Map a wire event name to its kind
    pub fn from_wire(name: &str) -> Self {
        match name {
            "put" => Self::Put,
            "patch" => Self::Patch,
            "keep-alive" => Self::KeepAlive,
            "cancel" => Self::Cancel,
            "auth_revoked" => Self::AuthRevoked,
            _ => Self::Unknown,
        }
    }
}

/// A structured change event drained from a stream session
///
/// Immutable once produced; the caller owns it after
/// [`StreamSession::read_event`](super::StreamSession::read_event) returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// What happened
    pub kind: EventKind,
    /// Root-relative path the change applies to; empty for non-data events
    pub path: String,
    /// Payload at `path`; JSON null when the event carries no data
    pub data: Value,
}

impl ChangeEvent {
    /// Get a field of the payload as a specific type
    pub fn get<T: serde::de::DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.data
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a field of the payload as f64 (common case for numeric values)
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.data.get(field).and_then(|v| v.as_f64())
    }

    /// Get a field of the payload as a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }
}

/// Lifecycle state of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream has been opened
    Closed,
    /// Streaming request sent, no bytes read yet
    Opening,
    /// First chunk received; events flow
    Listening,
    /// Transport failed; open the stream again to recover
    Faulted,
}

/// Errors that can occur during streaming
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP/connection error
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Server rejected the streaming request
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Malformed frame line
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame exceeded the configured size bound
    #[error("Frame exceeded {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Frame payload was not valid JSON or lacked the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Stream was closed by the server
    #[error("Stream closed")]
    Closed,
}

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;
