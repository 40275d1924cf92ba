//! Bus error taxonomy

use thiserror::Error;
use types::errors::PayloadError;

/// Errors raised by the bus client and broker backends
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Stream {stream} could not be provisioned after {attempts} attempts: {message}")]
    StreamSetup {
        stream: String,
        attempts: u32,
        message: String,
    },

    #[error("Publish to {subject} failed: {message}")]
    Publish { subject: String, message: String },

    #[error("Publish to {subject} landed in stream {actual}, expected {expected}")]
    StreamMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("No stream accepts subject {0}")]
    NoStream(String),

    #[error("Subscribe to {subject} failed: {message}")]
    Subscribe { subject: String, message: String },

    #[error("Ack failed: {0}")]
    Ack(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Bus client closed")]
    Closed,
}

impl BusError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::Connect { .. }
                | BusError::Publish { .. }
                | BusError::Subscribe { .. }
                | BusError::Ack(_)
        )
    }
}
