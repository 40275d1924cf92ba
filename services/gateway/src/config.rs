//! Gateway configuration from the environment

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};

use event_bus::BusConfig;
use event_bus::config::{env_duration, env_list, env_parse};

pub const DEFAULT_TICKERS: &[&str] = &["SPY", "AAPL", "MSFT", "GOOGL", "AMZN"];

/// Retry and failure-threshold settings for strategy-engine calls
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub rpc_timeout: Duration,
    /// Backtests run much longer than the other calls
    pub backtest_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Multiplied by the attempt number before each retry
    pub retry_backoff: Duration,
    /// More consecutive failures than this: degraded
    pub degraded_after: u32,
    /// More consecutive failures than this: readonly
    pub readonly_after: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(10),
            backtest_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            degraded_after: 3,
            readonly_after: 10,
        }
    }
}

/// Per-connection websocket settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub queue_capacity: usize,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    /// A connection silent for longer than this is closed
    pub pong_timeout: Duration,
    /// Upper bound on waiting for connections to close at shutdown
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            write_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub engine_url: String,
    pub tickers: Vec<String>,
    pub proxy: ProxyConfig,
    pub relay: RelayConfig,
    pub bus: BusConfig,
}

impl GatewayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let listen_addr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("LISTEN_ADDR must be host:port")?;
        let engine_url = std::env::var("TRADINGLAB_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:50052".to_string())
            .trim_end_matches('/')
            .to_string();

        let defaults = ProxyConfig::default();
        let proxy = ProxyConfig {
            rpc_timeout: env_duration("RPC_TIMEOUT", defaults.rpc_timeout),
            backtest_timeout: env_duration("BACKTEST_TIMEOUT", defaults.backtest_timeout),
            max_retries: env_parse("RPC_MAX_RETRIES", defaults.max_retries),
            retry_backoff: env_duration("RPC_RETRY_BACKOFF", defaults.retry_backoff),
            degraded_after: env_parse("DEGRADED_AFTER", defaults.degraded_after),
            readonly_after: env_parse("READONLY_AFTER", defaults.readonly_after),
        };
        if proxy.degraded_after >= proxy.readonly_after {
            bail!(
                "DEGRADED_AFTER ({}) must be below READONLY_AFTER ({})",
                proxy.degraded_after,
                proxy.readonly_after
            );
        }

        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            queue_capacity: env_parse("WS_QUEUE_CAPACITY", defaults.queue_capacity),
            write_timeout: env_duration("WS_WRITE_TIMEOUT", defaults.write_timeout),
            ping_interval: env_duration("WS_PING_INTERVAL", defaults.ping_interval),
            pong_timeout: env_duration("WS_PONG_TIMEOUT", defaults.pong_timeout),
            shutdown_grace: defaults.shutdown_grace,
        };
        if relay.queue_capacity == 0 {
            bail!("WS_QUEUE_CAPACITY must be positive");
        }

        Ok(Self {
            listen_addr,
            engine_url,
            tickers: env_list("WATCH_TICKERS", DEFAULT_TICKERS),
            proxy,
            relay,
            bus: BusConfig::from_env("gateway"),
        })
    }
}
