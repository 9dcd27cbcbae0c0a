//! Error types for the labtrace core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for labtrace operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for labtrace.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-related error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Record decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Sink-related error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Background task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

/// Publish/subscribe transport errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Broker refused or failed the subscription
    #[error("Subscription to {topic} failed: {message}")]
    SubscribeFailed { topic: String, message: String },

    /// Established connection dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Transport used before connect or after disconnect
    #[error("Transport closed")]
    Closed,
}

/// Errors raised while extracting a capture timestamp from a payload.
///
/// These never escape the ingest boundary: the offending message is logged
/// and dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not a structured document
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// Document has no usable timestamp
    #[error("Missing or non-numeric timestamp field '{field}'")]
    MissingTimestamp { field: String },

    /// Raw capture shorter than its record header
    #[error("Truncated capture header: {len} bytes, need {needed}")]
    Truncated { len: usize, needed: usize },
}

/// Output sink errors.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Output destination could not be opened
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// Write to the output destination failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Payload variant does not match the sink format
    #[error("Format mismatch: sink expects {expected}, got {actual}")]
    FormatMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
