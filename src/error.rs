// Error types for ctlstream
//
// Structured error types using thiserror for exhaustive matching across
// the streaming pipeline.

use std::io;
use thiserror::Error;

/// Main error type for ctlstream operations
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP request completed with a non-success status
    #[error("HTTP error (status {status}): {details}")]
    HttpError { status: u16, details: String },

    /// Reqwest HTTP client errors (connect, timeout, body)
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    /// Parsing error for upstream data formats
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: io::Error,
    },

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// A channel endpoint was dropped while the other side was still in use
    #[error("Channel closed: {context}")]
    ChannelClosed { context: String },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl From<base64::DecodeError> for StreamError {
    fn from(err: base64::DecodeError) -> Self {
        StreamError::ParseError {
            message: format!("base64 decode error: {}", err),
        }
    }
}
