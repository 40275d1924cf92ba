//! Signal, recommendation and request payloads
//!
//! These are produced by the strategy engine or by request endpoints and
//! travel over the bus as JSON. Readers ignore fields they do not know.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::chunk::HistoricalChunk;
use crate::errors::PayloadError;
use crate::ids::RequestId;
use crate::sample::MarketSample;
use crate::timeframe::Timeframe;

/// Maximum day count accepted for a historical request
pub const MAX_HISTORICAL_DAYS: u32 = 365;

/// Trading signal emitted by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub date: String,
    pub signal_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub stoploss: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

/// Options recommendation derived from a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub ticker: String,
    pub date: String,
    pub signal_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub stock_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub stoploss: Decimal,
    pub option_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub strike: Decimal,
    pub expiration: String,
    #[serde(default)]
    pub delta: f64,
    #[serde(default)]
    pub iv: f64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Inbound request for bulk historical data
///
/// The subject carries the authoritative coordinates; the body fields are
/// informational and may be absent when produced by older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoricalRequest {
    /// Build a validated request. Ticker and timeframe are normalised.
    pub fn new(
        ticker: &str,
        timeframe: &str,
        days: i64,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, PayloadError> {
        let ticker = crate::ids::Ticker::parse(ticker)?;
        let timeframe = Timeframe::parse(timeframe)?;
        let days = validate_days(days)?;

        Ok(Self {
            request_id: RequestId::new().to_string(),
            ticker: ticker.as_str().to_string(),
            timeframe: timeframe.label().to_string(),
            days,
            source: source.to_string(),
            timestamp: Some(now),
        })
    }

    /// Stamp identifying this request across redeliveries
    pub fn dedup_stamp(&self) -> Option<String> {
        if !self.request_id.is_empty() {
            return Some(self.request_id.clone());
        }
        self.timestamp.map(|t| t.to_rfc3339())
    }
}

/// Check a day count against `1..=MAX_HISTORICAL_DAYS`.
pub fn validate_days(days: i64) -> Result<u32, PayloadError> {
    if days < 1 || days > MAX_HISTORICAL_DAYS as i64 {
        return Err(PayloadError::InvalidDays {
            days,
            max: MAX_HISTORICAL_DAYS,
        });
    }
    Ok(days as u32)
}

/// Payload family carried by a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Live,
    Daily,
    HistoricalData,
    HistoricalRequest,
    Signal,
    Recommendation,
}

/// Decoded bus payload, one variant per subject family
#[derive(Debug, Clone, PartialEq)]
pub enum BusPayload {
    Sample(MarketSample),
    Chunk(HistoricalChunk),
    Signal(Signal),
    Recommendation(Recommendation),
    Request(HistoricalRequest),
}

impl BusPayload {
    /// Decode raw JSON according to the subject family it arrived on.
    pub fn decode(kind: PayloadKind, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            PayloadKind::Live | PayloadKind::Daily => {
                BusPayload::Sample(serde_json::from_slice(bytes)?)
            }
            PayloadKind::HistoricalData => BusPayload::Chunk(serde_json::from_slice(bytes)?),
            PayloadKind::HistoricalRequest => BusPayload::Request(serde_json::from_slice(bytes)?),
            PayloadKind::Signal => BusPayload::Signal(serde_json::from_slice(bytes)?),
            PayloadKind::Recommendation => {
                BusPayload::Recommendation(serde_json::from_slice(bytes)?)
            }
        })
    }

    /// Ticker the payload refers to
    pub fn ticker(&self) -> &str {
        match self {
            BusPayload::Sample(s) => &s.ticker,
            BusPayload::Chunk(c) => &c.metadata.ticker,
            BusPayload::Signal(s) => &s.ticker,
            BusPayload::Recommendation(r) => &r.ticker,
            BusPayload::Request(r) => &r.ticker,
        }
    }
}
