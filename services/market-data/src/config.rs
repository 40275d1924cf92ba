//! Environment configuration for the market data service

use std::env;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use dotenv::dotenv;

use event_bus::config::{env_duration, env_duration_opt, env_list, env_parse};
use event_bus::BusConfig;

use crate::alpaca::AlpacaConfig;
use crate::error::MarketDataError;
use crate::historical::HistoricalConfig;
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_TICKERS: &[&str] = &["SPY", "AAPL", "MSFT", "GOOGL"];

#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    pub bus: BusConfig,
    pub alpaca: AlpacaConfig,
    pub tickers: Vec<String>,
    pub scheduler: SchedulerConfig,
    pub historical: HistoricalConfig,
    /// Upper bound on cached-tier staleness; `None` serves any age
    pub cache_max_age: Option<Duration>,
    pub stats_interval: Duration,
    pub http_port: u16,
}

impl MarketDataConfig {
    pub fn from_env() -> Result<Self, MarketDataError> {
        // Load .env file if it exists
        dotenv().ok();

        let api_key = env::var("ALPACA_API_KEY").unwrap_or_default();
        let api_secret = env::var("ALPACA_API_SECRET").unwrap_or_default();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(MarketDataError::Config(
                "ALPACA_API_KEY and ALPACA_API_SECRET environment variables are required"
                    .to_string(),
            ));
        }
        let live = env::var("ALPACA_LIVE_TRADING").map(|v| v == "true").unwrap_or(false);
        let mut alpaca = AlpacaConfig::new(api_key, api_secret, live);
        if let Ok(url) = env::var("ALPACA_TRADING_URL") {
            alpaca.trading_url = url;
        }
        if let Ok(url) = env::var("ALPACA_DATA_URL") {
            alpaca.data_url = url;
        }
        alpaca.timeout = env_duration("PROVIDER_TIMEOUT", alpaca.timeout);

        let defaults = SchedulerConfig::default();
        let timezone = match env::var("MARKET_TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| MarketDataError::Config(format!("MARKET_TIMEZONE: {e}")))?,
            Err(_) => defaults.timezone,
        };
        let close_time = match env::var("MARKET_CLOSE_TIME") {
            Ok(raw) => parse_close_time(&raw)?,
            Err(_) => defaults.close_time,
        };
        let polling_interval = env_duration("POLLING_INTERVAL", defaults.polling_interval);
        if polling_interval.is_zero() {
            return Err(MarketDataError::Config("POLLING_INTERVAL must be positive".to_string()));
        }

        let historical_defaults = HistoricalConfig::default();
        let chunk_size = env_parse("HISTORICAL_CHUNK_SIZE", historical_defaults.chunk_size);
        if chunk_size == 0 {
            return Err(MarketDataError::Config("HISTORICAL_CHUNK_SIZE must be positive".to_string()));
        }

        Ok(Self {
            bus: BusConfig::from_env("market-data"),
            alpaca,
            tickers: env_list("WATCH_TICKERS", DEFAULT_TICKERS),
            scheduler: SchedulerConfig {
                polling_interval,
                close_time,
                timezone,
            },
            historical: HistoricalConfig {
                chunk_size,
                chunk_pause: env_duration("HISTORICAL_CHUNK_PAUSE", historical_defaults.chunk_pause),
                dedup_window: historical_defaults.dedup_window,
                retry_backoff: env_duration("HISTORICAL_RETRY_BACKOFF", historical_defaults.retry_backoff),
                retry_max: env_duration("HISTORICAL_RETRY_MAX", historical_defaults.retry_max),
            },
            cache_max_age: env_duration_opt("CACHE_MAX_AGE"),
            stats_interval: env_duration("STATS_INTERVAL", Duration::from_secs(60)),
            http_port: env_parse("HTTP_PORT", 8080),
        })
    }
}

/// Parse `HH:MM` (or `HH:MM:SS`).
pub fn parse_close_time(raw: &str) -> Result<NaiveTime, MarketDataError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| MarketDataError::Config(format!("MARKET_CLOSE_TIME: invalid time {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_time() {
        assert_eq!(parse_close_time("16:30").unwrap(), NaiveTime::from_hms_opt(16, 30, 0).unwrap());
        assert_eq!(parse_close_time("09:15:30").unwrap(), NaiveTime::from_hms_opt(9, 15, 30).unwrap());
        assert!(parse_close_time("4:30pm").is_err());
    }
}
