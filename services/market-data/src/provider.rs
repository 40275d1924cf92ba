//! Market data provider boundary
//!
//! The scheduler only ever talks to a `MarketDataProvider`; the Alpaca REST
//! client is one implementation, tests use scripted stubs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use types::sample::{DataType, MarketSample};
use types::timeframe::Timeframe;

use crate::error::MarketDataError;

/// Top-of-book quote
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// One OHLCV bar as returned by the provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o", with = "rust_decimal::serde::float")]
    pub open: Decimal,
    #[serde(rename = "h", with = "rust_decimal::serde::float")]
    pub high: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::float")]
    pub low: Decimal,
    #[serde(rename = "c", with = "rust_decimal::serde::float")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: i64,
    #[serde(rename = "n", default)]
    pub trade_count: Option<u64>,
    #[serde(rename = "vw", default, with = "rust_decimal::serde::float_option")]
    pub vwap: Option<Decimal>,
}

impl Bar {
    pub fn to_sample(
        &self,
        ticker: &str,
        interval: &str,
        source: &str,
        data_type: DataType,
    ) -> MarketSample {
        MarketSample {
            ticker: ticker.to_string(),
            timestamp: self.timestamp,
            price: self.close,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap,
            trade_count: self.trade_count,
            interval: interval.to_string(),
            source: source.to_string(),
            data_type,
        }
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync + 'static {
    /// Source label stamped on samples from this provider
    fn name(&self) -> &str;

    async fn is_market_open(&self) -> Result<bool, MarketDataError>;

    async fn latest_quote(&self, ticker: &str) -> Result<Quote, MarketDataError>;

    /// Most recent 1-minute bar within the last 15 minutes
    async fn latest_minute_bar(&self, ticker: &str) -> Result<Bar, MarketDataError>;

    /// Most recent daily bar within the last 3 days
    async fn latest_daily_bar(&self, ticker: &str) -> Result<Bar, MarketDataError>;

    /// Ordered bars covering the last `days` days
    async fn historical_bars(
        &self,
        ticker: &str,
        days: u32,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, MarketDataError>;
}
