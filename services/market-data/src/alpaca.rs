//! Alpaca REST provider

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use types::timeframe::Timeframe;

use crate::error::MarketDataError;
use crate::provider::{Bar, MarketDataProvider, Quote};

pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
pub const DATA_URL: &str = "https://data.alpaca.markets";

const SOURCE: &str = "Alpaca";

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Trading API base (market clock)
    pub trading_url: String,
    /// Market data API base (quotes, bars)
    pub data_url: String,
    pub timeout: Duration,
}

impl AlpacaConfig {
    pub fn new(api_key: String, api_secret: String, live_trading: bool) -> Self {
        Self {
            api_key,
            api_secret,
            trading_url: if live_trading {
                LIVE_TRADING_URL.to_string()
            } else {
                PAPER_TRADING_URL.to_string()
            },
            data_url: DATA_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct ClockResponse {
    is_open: bool,
}

#[derive(Deserialize)]
struct QuoteResponse {
    quote: RawQuote,
}

#[derive(Deserialize)]
struct RawQuote {
    #[serde(rename = "bp", with = "rust_decimal::serde::float")]
    bid: Decimal,
    #[serde(rename = "ap", with = "rust_decimal::serde::float")]
    ask: Decimal,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<Vec<Bar>>,
}

pub struct AlpacaProvider {
    http: Client,
    config: AlpacaConfig,
}

impl AlpacaProvider {
    pub fn new(config: AlpacaConfig) -> Result<Self, MarketDataError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(MarketDataError::Config(
                "Alpaca API key and secret are required".to_string(),
            ));
        }
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, MarketDataError> {
        let started = Instant::now();
        let endpoint = url.path().to_string();
        let resp = self
            .http
            .get(url)
            .header("APCA-API-KEY-ID", &self.config.api_key)
            .header("APCA-API-SECRET-KEY", &self.config.api_secret)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        debug!(endpoint = %endpoint, status = status.as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "Provider call");
        if !status.is_success() {
            return Err(MarketDataError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(resp.json::<T>().await?)
    }

    fn bars_url(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
        limit: u32,
    ) -> Result<Url, MarketDataError> {
        let base = format!("{}/v2/stocks/{}/bars", self.config.data_url, ticker);
        Url::parse_with_params(
            &base,
            &[
                ("start", start.to_rfc3339()),
                ("end", end.to_rfc3339()),
                ("timeframe", timeframe.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .map_err(|e| MarketDataError::Config(format!("bad provider url: {e}")))
    }

    async fn last_bar_within(
        &self,
        ticker: &str,
        window: chrono::Duration,
        timeframe: Timeframe,
        what: &'static str,
    ) -> Result<Bar, MarketDataError> {
        let end = Utc::now();
        let url = self.bars_url(ticker, end - window, end, timeframe.provider_code(), 1000)?;
        let resp: BarsResponse = self.get_json(url).await?;
        resp.bars
            .and_then(|mut bars| bars.pop())
            .ok_or_else(|| MarketDataError::NoData {
                ticker: ticker.to_string(),
                what,
            })
    }
}

#[async_trait]
impl MarketDataProvider for AlpacaProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn is_market_open(&self) -> Result<bool, MarketDataError> {
        let url = Url::parse(&format!("{}/v2/clock", self.config.trading_url))
            .map_err(|e| MarketDataError::Config(format!("bad trading url: {e}")))?;
        let clock: ClockResponse = self.get_json(url).await?;
        Ok(clock.is_open)
    }

    async fn latest_quote(&self, ticker: &str) -> Result<Quote, MarketDataError> {
        let url = Url::parse(&format!(
            "{}/v2/stocks/{}/quotes/latest",
            self.config.data_url, ticker
        ))
        .map_err(|e| MarketDataError::Config(format!("bad data url: {e}")))?;
        let resp: QuoteResponse = self.get_json(url).await?;
        if resp.quote.bid <= Decimal::ZERO || resp.quote.ask <= Decimal::ZERO {
            return Err(MarketDataError::NoData {
                ticker: ticker.to_string(),
                what: "quote",
            });
        }
        Ok(Quote {
            bid: resp.quote.bid,
            ask: resp.quote.ask,
            timestamp: resp.quote.timestamp,
        })
    }

    async fn latest_minute_bar(&self, ticker: &str) -> Result<Bar, MarketDataError> {
        self.last_bar_within(ticker, chrono::Duration::minutes(15), Timeframe::M1, "minute bar")
            .await
    }

    async fn latest_daily_bar(&self, ticker: &str) -> Result<Bar, MarketDataError> {
        self.last_bar_within(ticker, chrono::Duration::days(3), Timeframe::D1, "daily bar")
            .await
    }

    async fn historical_bars(
        &self,
        ticker: &str,
        days: u32,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let end = Utc::now();
        let start = end - chrono::Duration::days(days as i64);
        let url = self.bars_url(ticker, start, end, timeframe.provider_code(), 10_000)?;
        let resp: BarsResponse = self.get_json(url).await?;
        match resp.bars {
            Some(bars) if !bars.is_empty() => Ok(bars),
            _ => Err(MarketDataError::NoData {
                ticker: ticker.to_string(),
                what: "historical bars",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AlpacaProvider {
        AlpacaProvider::new(AlpacaConfig::new("key".into(), "secret".into(), false)).unwrap()
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = AlpacaProvider::new(AlpacaConfig::new(String::new(), "s".into(), false))
            .err()
            .unwrap();
        assert!(matches!(err, MarketDataError::Config(_)));
    }

    #[test]
    fn test_paper_vs_live_base() {
        assert_eq!(AlpacaConfig::new("k".into(), "s".into(), false).trading_url, PAPER_TRADING_URL);
        assert_eq!(AlpacaConfig::new("k".into(), "s".into(), true).trading_url, LIVE_TRADING_URL);
    }

    #[test]
    fn test_bars_url_encodes_timestamps() {
        let p = provider();
        let start = DateTime::parse_from_rfc3339("2024-06-03T13:30:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let url = p.bars_url("SPY", start, start, "1Min", 1).unwrap();
        assert_eq!(url.path(), "/v2/stocks/SPY/bars");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("timeframe".to_string(), "1Min".to_string())));
        assert!(pairs.contains(&("start".to_string(), start.to_rfc3339())));
    }

    #[test]
    fn test_bars_response_tolerates_null() {
        let resp: BarsResponse = serde_json::from_str(r#"{"bars":null,"symbol":"SPY"}"#).unwrap();
        assert!(resp.bars.is_none());
    }
}
