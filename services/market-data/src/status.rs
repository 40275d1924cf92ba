//! Service status and periodic report

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::{AlertLevel, AlertThresholds, ServiceMetrics};

/// Per-ticker scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickerState {
    /// Only placeholder data obtainable; nothing is published
    AwaitingAvailability,
    /// Publishing on every tick
    Streaming,
}

/// Lifecycle of the historical request consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
    /// First subscribe attempt not finished yet
    Connecting,
    Active,
    /// Subscribe failed or the broker ended the subscription; backing off
    Retrying,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerStatus {
    pub state: ConsumerState,
    /// Failed subscribes and broker-ended subscriptions since start
    pub failures: u64,
    pub last_error: Option<String>,
    pub since: DateTime<Utc>,
}

/// Shared service status, mutated by the scheduler and read by the
/// health endpoint
pub struct ServiceStatus {
    started: Instant,
    started_at: DateTime<Utc>,
    tickers: Mutex<BTreeMap<String, TickerState>>,
    consumer: Mutex<ConsumerStatus>,
    market_open: AtomicBool,
    last_published: Mutex<Option<DateTime<Utc>>>,
    pub metrics: ServiceMetrics,
}

/// Copy of the status handed to callers
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub tickers: Vec<String>,
    pub ticker_states: BTreeMap<String, TickerState>,
    pub market_open: bool,
    pub last_published: Option<DateTime<Utc>>,
    pub bus_connected: bool,
    pub historical_consumer: ConsumerStatus,
    pub stream_stats: BTreeMap<String, u64>,
    pub tier_usage: BTreeMap<String, u64>,
}

impl ServiceStatus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            tickers: Mutex::new(BTreeMap::new()),
            consumer: Mutex::new(ConsumerStatus {
                state: ConsumerState::Connecting,
                failures: 0,
                last_error: None,
                since: Utc::now(),
            }),
            market_open: AtomicBool::new(false),
            last_published: Mutex::new(None),
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn set_ticker_state(&self, ticker: &str, state: TickerState) {
        if let Ok(mut tickers) = self.tickers.lock() {
            tickers.insert(ticker.to_string(), state);
        }
    }

    pub fn remove_ticker(&self, ticker: &str) {
        if let Ok(mut tickers) = self.tickers.lock() {
            tickers.remove(ticker);
        }
    }

    pub fn ticker_state(&self, ticker: &str) -> Option<TickerState> {
        self.tickers.lock().ok()?.get(ticker).copied()
    }

    pub fn set_market_open(&self, open: bool) {
        self.market_open.store(open, Ordering::Relaxed);
    }

    pub fn market_open(&self) -> bool {
        self.market_open.load(Ordering::Relaxed)
    }

    pub fn mark_published(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_published.lock() {
            *last = Some(at);
        }
    }

    fn update_consumer(&self, state: ConsumerState, error: Option<String>) {
        let Ok(mut consumer) = self.consumer.lock() else {
            return;
        };
        if error.is_some() {
            consumer.failures += 1;
            consumer.last_error = error;
        } else if state == ConsumerState::Active {
            consumer.last_error = None;
        }
        if consumer.state != state {
            consumer.state = state;
            consumer.since = Utc::now();
        }
    }

    pub fn consumer_active(&self) {
        self.update_consumer(ConsumerState::Active, None);
    }

    pub fn consumer_failed(&self, error: impl Into<String>) {
        self.update_consumer(ConsumerState::Retrying, Some(error.into()));
    }

    pub fn consumer_stopped(&self) {
        self.update_consumer(ConsumerState::Stopped, None);
    }

    pub fn consumer(&self) -> ConsumerStatus {
        match self.consumer.lock() {
            Ok(consumer) => consumer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn report(&self, bus_connected: bool) -> StatusReport {
        let ticker_states = self.tickers.lock().map(|t| t.clone()).unwrap_or_default();
        StatusReport {
            status: "ok",
            started_at: self.started_at,
            uptime_secs: self.uptime().as_secs(),
            tickers: ticker_states.keys().cloned().collect(),
            ticker_states,
            market_open: self.market_open(),
            last_published: self.last_published.lock().ok().and_then(|l| *l),
            bus_connected,
            historical_consumer: self.consumer(),
            stream_stats: self.metrics.export(),
            tier_usage: self.metrics.export_tiers(),
        }
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Log a status summary every `interval` until cancelled.
pub async fn run_reporter(
    status: std::sync::Arc<ServiceStatus>,
    interval: Duration,
    thresholds: AlertThresholds,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = status.report(true);
        let streaming = report
            .ticker_states
            .values()
            .filter(|s| **s == TickerState::Streaming)
            .count();
        info!(
            uptime_secs = report.uptime_secs,
            tickers = report.tickers.len(),
            streaming,
            market_open = report.market_open,
            stats = ?report.stream_stats,
            tiers = ?report.tier_usage,
            "Market data status"
        );

        for alert in status.metrics.check_thresholds(&thresholds) {
            match alert.level {
                AlertLevel::Critical => warn!(metric = %alert.metric, "CRITICAL: {}", alert.message),
                AlertLevel::Warning => warn!(metric = %alert.metric, "{}", alert.message),
            }
        }
    }
}
