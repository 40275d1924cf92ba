//! Environment configuration for the event hub

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use dotenv::dotenv;

use event_bus::config::{env_duration, env_list};
use event_bus::BusConfig;

use crate::error::HubError;

pub const DEFAULT_TICKERS: &[&str] = &["SPY", "AAPL", "MSFT", "GOOGL", "AMZN"];
pub const DEFAULT_HEALTH_ADDR: &str = ":8080";

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bus: BusConfig,
    /// Tickers pre-registered in the per-ticker stats
    pub tickers: Vec<String>,
    pub health_addr: SocketAddr,
    pub stats_interval: Duration,
    /// Delay between attempts to re-open failed stream subscriptions
    pub retry_interval: Duration,
}

impl HubConfig {
    pub fn from_env() -> Result<Self, HubError> {
        // Load .env file if it exists
        dotenv().ok();

        let raw_addr = env::var("HEALTH_ADDR").unwrap_or_else(|_| DEFAULT_HEALTH_ADDR.to_string());
        let stats_interval = env_duration("STATS_INTERVAL", Duration::from_secs(60));
        let retry_interval = env_duration("RETRY_INTERVAL", Duration::from_secs(30));
        if stats_interval.is_zero() || retry_interval.is_zero() {
            return Err(HubError::Config(
                "STATS_INTERVAL and RETRY_INTERVAL must be positive".to_string(),
            ));
        }

        Ok(Self {
            bus: BusConfig::from_env("event-hub"),
            tickers: env_list("WATCH_TICKERS", DEFAULT_TICKERS),
            health_addr: parse_listen_addr(&raw_addr)?,
            stats_interval,
            retry_interval,
        })
    }
}

/// Parse `host:port`, or `:port` for all interfaces.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr, HubError> {
    let raw = raw.trim();
    let full = match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => raw.to_string(),
    };
    full.parse()
        .map_err(|_| HubError::Config(format!("HEALTH_ADDR: invalid address {raw}")))
}
