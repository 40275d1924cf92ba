//! Market sample types
//!
//! A `MarketSample` is one OHLCV observation for a ticker. Samples are
//! immutable once published; reuse of a sample (the cached tier) always
//! produces a copy with a refreshed timestamp and a demoted data type.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source label carried by fabricated samples
pub const SOURCE_SYNTHETIC: &str = "synthetic";

/// Source label used when a response is served from a cache
pub const SOURCE_CACHE: &str = "cache";

/// Data-type tag describing how a sample was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Freshest sample while the market is open
    Live,
    /// Last known sample while the market is closed
    Recent,
    /// End-of-day summary
    Daily,
    /// Part of a bulk historical response
    Historical,
    /// Re-timestamped copy of the last real sample
    Cached,
    /// Synthetic placeholder, produced only when every real path failed
    Generated,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Live => "live",
            DataType::Recent => "recent",
            DataType::Daily => "daily",
            DataType::Historical => "historical",
            DataType::Cached => "cached",
            DataType::Generated => "generated",
        }
    }
}

/// One OHLCV observation
///
/// Prices travel as JSON numbers. Unknown fields in inbound payloads are
/// ignored so newer producers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSample {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,

    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    pub volume: i64,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub vwap: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u64>,

    /// Bar interval label, e.g. "1min" or "1day"
    pub interval: String,
    /// Provider name, or "synthetic"
    pub source: String,
    pub data_type: DataType,
}

impl MarketSample {
    /// Whether this sample was fabricated rather than observed
    pub fn is_synthetic(&self) -> bool {
        self.source == SOURCE_SYNTHETIC || self.data_type == DataType::Generated
    }

    /// Copy of this sample re-tagged with another data type
    pub fn tagged(&self, data_type: DataType) -> Self {
        Self {
            data_type,
            ..self.clone()
        }
    }

    /// Copy of this sample for the cached tier
    ///
    /// The provider source is kept so consumers can still tell which real
    /// feed the value originally came from.
    pub fn as_cached(&self, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            data_type: DataType::Cached,
            ..self.clone()
        }
    }

    /// Key used by consumers to de-duplicate redelivered samples
    pub fn dedup_key(&self) -> String {
        format!("{}@{}", self.ticker, self.timestamp.timestamp_nanos_opt().unwrap_or_default())
    }
}
