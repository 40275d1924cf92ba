//! Market data scheduler
//!
//! One supervising task per watched ticker plus one daily close timer.
//!
//! Per-ticker state machine:
//!
//! ```text
//! AWAITING_AVAILABILITY ──(availability check returns real data)──► STREAMING
//! ```
//!
//! While awaiting, every tick re-checks availability and publishes nothing. Once
//! streaming, every tick checks the market clock and publishes either a
//! `live` sample (open) or a `recent` sample (closed) on `live.<T>`. There
//! is no reverse transition.
//!
//! Tasks live in a registry keyed by ticker so tickers can be added or
//! removed at runtime.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use event_bus::EventBus;
use types::errors::PayloadError;
use types::ids::Ticker;
use types::sample::DataType;

use crate::fallback::{ResolveMode, SampleResolver};
use crate::provider::MarketDataProvider;
use crate::status::{ServiceStatus, TickerState};

const DAY: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub polling_interval: Duration,
    /// Local wall-clock time of the daily summary
    pub close_time: NaiveTime,
    pub timezone: Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(60),
            close_time: NaiveTime::from_hms_opt(16, 30, 0).unwrap_or_default(),
            timezone: chrono_tz::America::New_York,
        }
    }
}

struct Shared {
    provider: Arc<dyn MarketDataProvider>,
    resolver: Arc<SampleResolver>,
    bus: EventBus,
    status: Arc<ServiceStatus>,
    config: SchedulerConfig,
}

struct TickerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<BTreeMap<String, TickerTask>>>;

pub struct Scheduler {
    shared: Arc<Shared>,
    tasks: Registry,
    daily: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        resolver: Arc<SampleResolver>,
        bus: EventBus,
        status: Arc<ServiceStatus>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                resolver,
                bus,
                status,
                config,
            }),
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
            daily: Mutex::new(None),
            cancel,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TickerTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start streaming a ticker. Returns `false` if it is already watched.
    pub fn watch(&self, symbol: &str) -> Result<bool, PayloadError> {
        let ticker = Ticker::parse(symbol)?.as_str().to_string();
        let mut tasks = self.registry();
        if tasks.contains_key(&ticker) {
            return Ok(false);
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_ticker(
            self.shared.clone(),
            ticker.clone(),
            cancel.clone(),
        ));
        tasks.insert(ticker, TickerTask { cancel, handle });
        Ok(true)
    }

    /// Stop streaming a ticker and wait for its task to exit.
    pub async fn unwatch(&self, symbol: &str) -> bool {
        let removed = self.registry().remove(&symbol.to_ascii_uppercase());
        match removed {
            Some(task) => {
                task.cancel.cancel();
                let _ = task.handle.await;
                self.shared.status.remove_ticker(&symbol.to_ascii_uppercase());
                info!(ticker = symbol, "Stopped watching");
                true
            }
            None => false,
        }
    }

    pub fn watched(&self) -> Vec<String> {
        self.registry().keys().cloned().collect()
    }

    /// Arm the daily close timer at the configured local time.
    pub fn start_daily_timer(&self) {
        let cfg = &self.shared.config;
        let delay = first_close_delay(Utc::now(), cfg.close_time, cfg.timezone);
        self.start_daily_timer_after(delay);
    }

    /// Arm the daily timer with an explicit first delay, then every 24h.
    pub fn start_daily_timer_after(&self, first_delay: Duration) {
        let mut slot = self.daily.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        info!(first_in_secs = first_delay.as_secs(), "Daily close timer armed");
        *slot = Some(tokio::spawn(run_daily_timer(
            self.shared.clone(),
            self.tasks.clone(),
            first_delay,
            self.cancel.child_token(),
        )));
    }

    /// Cancel every task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<TickerTask> = std::mem::take(&mut *self.registry()).into_values().collect();
        for task in tasks {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
        let daily = self.daily.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = daily {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}

async fn run_ticker(shared: Arc<Shared>, ticker: String, cancel: CancellationToken) {
    let period = shared.config.polling_interval;
    info!(ticker = %ticker, interval_secs = period.as_secs(), "Starting market data stream");
    shared.status.set_ticker_state(&ticker, TickerState::AwaitingAvailability);

    let mut state = tokio::select! {
        _ = cancel.cancelled() => return,
        available = check_availability(&shared, &ticker) => {
            if available { TickerState::Streaming } else { TickerState::AwaitingAvailability }
        }
    };
    shared.status.set_ticker_state(&ticker, state);
    if state == TickerState::AwaitingAvailability {
        info!(ticker = %ticker, "Only placeholder data available, stream held until real data appears");
    }

    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            next = step(&shared, &ticker, state) => {
                if next != state {
                    info!(ticker = %ticker, "Data now available, starting regular stream");
                    shared.status.set_ticker_state(&ticker, next);
                }
                state = next;
            }
        }
    }
    debug!(ticker = %ticker, "Ticker task exiting");
}

async fn step(shared: &Shared, ticker: &str, state: TickerState) -> TickerState {
    if state == TickerState::AwaitingAvailability {
        if !check_availability(shared, ticker).await {
            debug!(ticker, "Still waiting for data availability");
            return state;
        }
    }
    publish_tick(shared, ticker).await;
    TickerState::Streaming
}

/// True when the chain yields anything other than a placeholder.
async fn check_availability(shared: &Shared, ticker: &str) -> bool {
    let res = shared.resolver.resolve(ticker, ResolveMode::Recent).await;
    if res.tier.is_real() {
        info!(ticker, source = %res.sample.source, tier = res.tier.as_str(), "Verified data availability");
        true
    } else {
        false
    }
}

async fn publish_tick(shared: &Shared, ticker: &str) {
    let open = match shared.provider.is_market_open().await {
        Ok(open) => open,
        Err(e) => {
            warn!(error = %e, "Failed to check market status, assuming closed");
            false
        }
    };
    shared.status.set_market_open(open);

    let mode = if open { ResolveMode::Live } else { ResolveMode::Recent };
    let started = Instant::now();
    let res = shared.resolver.resolve(ticker, mode).await;
    let metrics = &shared.status.metrics;
    metrics.record_resolution(res.tier, started.elapsed().as_millis() as u64);

    match shared.bus.publish_live(&res.sample).await {
        Ok(_) => {
            if open {
                metrics.record_live();
            } else {
                metrics.record_recent();
            }
            shared.status.mark_published(Utc::now());
            info!(
                ticker,
                price = %res.sample.price,
                volume = res.sample.volume,
                data_type = res.sample.data_type.as_str(),
                tier = res.tier.as_str(),
                "Published market data"
            );
        }
        Err(e) => {
            metrics.record_publish_failure();
            warn!(ticker, error = %e, "Failed to publish market data");
        }
    }
}

async fn run_daily_timer(
    shared: Arc<Shared>,
    tasks: Registry,
    first_delay: Duration,
    cancel: CancellationToken,
) {
    let mut wait = first_delay;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let tickers: Vec<String> = tasks
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        info!(tickers = tickers.len(), "Publishing daily summaries");
        for ticker in tickers {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = publish_daily(&shared, &ticker) => {}
            }
        }
        wait = DAY;
    }
}

async fn publish_daily(shared: &Shared, ticker: &str) {
    let metrics = &shared.status.metrics;
    let bar = match shared.provider.latest_daily_bar(ticker).await {
        Ok(bar) => bar,
        Err(e) => {
            metrics.record_daily_failure();
            warn!(ticker, error = %e, "Failed to get daily data");
            return;
        }
    };

    let sample = bar.to_sample(ticker, "1day", shared.provider.name(), DataType::Daily);
    match shared.bus.publish_daily(&sample).await {
        Ok(_) => {
            metrics.record_daily();
            info!(ticker, close = %sample.close, volume = sample.volume, "Published daily summary");
        }
        Err(e) => {
            metrics.record_daily_failure();
            warn!(ticker, error = %e, "Failed to publish daily summary");
        }
    }
}

/// Delay from `now` until the next `close_time` in `tz`.
///
/// If today's close time has already passed, the next firing is tomorrow.
pub fn first_close_delay(now: DateTime<Utc>, close_time: NaiveTime, tz: Tz) -> Duration {
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();

    let at = |date: chrono::NaiveDate| tz.from_local_datetime(&date.and_time(close_time)).earliest();

    let target = match at(today) {
        Some(t) if t >= local_now => Some(t),
        _ => today.checked_add_days(Days::new(1)).and_then(at),
    };

    target
        .and_then(|t| (t.with_timezone(&Utc) - now).to_std().ok())
        .unwrap_or(DAY)
}
