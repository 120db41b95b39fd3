//! Error types for emberdb client operations

use thiserror::Error;

use crate::streaming::StreamError;

/// Result type alias for emberdb client operations
pub type Result<T> = std::result::Result<T, EmberClientError>;

/// Errors that can occur during emberdb client operations
#[derive(Error, Debug)]
pub enum EmberClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned a non-2xx response
    #[error("Server error {status}: {message}")]
    Remote { status: u16, message: String },

    /// Failed to decode a response body
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Change stream failed
    #[error("Stream error: {0}")]
    Stream(String),

    /// Stream operation called while no stream is open
    #[error("No stream is open")]
    NoStream,
}

impl EmberClientError {
    /// Create a remote error from status code and message
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }
}

impl From<StreamError> for EmberClientError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Connection(source) => Self::Http(source),
            StreamError::Server { status, message } => Self::Remote { status, message },
            other => Self::Stream(other.to_string()),
        }
    }
}

/// Classify a non-2xx response body into a human-readable message.
///
/// The backend returns either a plain-text body or `{"error": "..."}`;
/// accept both. Falls back to the bare status code for empty bodies.
pub(crate) fn remote_error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}
