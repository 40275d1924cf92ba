//! Identifier types for bus requests, relay connections and tickers
//!
//! Request and connection IDs use UUID v7 so they sort by creation time,
//! which keeps log correlation and request de-duplication cheap.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::PayloadError;

/// Unique identifier for a historical data request
///
/// Uses UUID v7 for time-based sorting. A request and its chunked
/// response share subject coordinates, so this id is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new RequestId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a streaming client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ticker symbol (e.g., "SPY", "BRK-B")
///
/// A ticker is embedded as a single token in bus subjects, so it may not
/// contain subject separators or wildcards. Stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Maximum accepted symbol length
    pub const MAX_LEN: usize = 16;

    /// Validate and normalise a ticker symbol
    pub fn parse(symbol: &str) -> Result<Self, PayloadError> {
        let s = symbol.trim();
        if s.is_empty() {
            return Err(PayloadError::InvalidTicker("empty ticker".to_string()));
        }
        if s.len() > Self::MAX_LEN {
            return Err(PayloadError::InvalidTicker(format!("ticker too long: {}", s)));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(PayloadError::InvalidTicker(format!("invalid characters in ticker: {}", s)));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
