//! Error types for the market data service

use event_bus::BusError;
use thiserror::Error;
use types::errors::{ChunkError, PayloadError};

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("No {what} available for {ticker}")]
    NoData { ticker: String, what: &'static str },

    #[error("Invalid request: {0}")]
    Payload(#[from] PayloadError),

    #[error("Chunking failed: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Cancelled")]
    Cancelled,
}

impl MarketDataError {
    /// Whether a retry (e.g. broker redelivery) could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            MarketDataError::Http(_) | MarketDataError::Cancelled => true,
            MarketDataError::Status { status, .. } => *status == 429 || *status >= 500,
            MarketDataError::Bus(e) => e.is_transient(),
            _ => false,
        }
    }
}
