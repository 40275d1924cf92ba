//! Historical request servicing
//!
//! Requests arrive on `historical.request.<T>.<F>.<D>` (work-queue stream).
//! Each is answered by a single provider call whose samples are published
//! as ordered chunks on `historical.data.<T>.<F>.<D>`, using the exact
//! coordinates of the request subject.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use event_bus::dispatch::run_dispatch;
use event_bus::subjects::{self, HistoricalCoordinates, HISTORICAL_REQUEST_ALL};
use event_bus::{BusMessage, Deduplicator, EventBus, MessageHandler, SubscribeOptions};
use types::chunk::{split_into_chunks, DEFAULT_CHUNK_SIZE};
use types::sample::DataType;
use types::signal::{validate_days, HistoricalRequest};
use types::timeframe::Timeframe;

use crate::error::MarketDataError;
use crate::provider::MarketDataProvider;
use crate::status::ServiceStatus;

/// Durable consumer name for the request stream
pub const CONSUMER_NAME: &str = "market-data-historical";

#[derive(Debug, Clone)]
pub struct HistoricalConfig {
    pub chunk_size: usize,
    /// Pause between successive chunk publishes
    pub chunk_pause: Duration,
    /// Number of recent requests remembered for de-duplication
    pub dedup_window: usize,
    /// Base delay before re-subscribing; grows linearly per failure
    pub retry_backoff: Duration,
    pub retry_max: Duration,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_pause: Duration::from_millis(500),
            dedup_window: 1_000,
            retry_backoff: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
        }
    }
}

pub struct HistoricalService {
    provider: Arc<dyn MarketDataProvider>,
    bus: EventBus,
    status: Arc<ServiceStatus>,
    config: HistoricalConfig,
    dedup: Mutex<Deduplicator>,
    cancel: CancellationToken,
}

impl HistoricalService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        bus: EventBus,
        status: Arc<ServiceStatus>,
        config: HistoricalConfig,
        cancel: CancellationToken,
    ) -> Self {
        let dedup = Mutex::new(Deduplicator::new(config.dedup_window));
        Self {
            provider,
            bus,
            status,
            config,
            dedup,
            cancel,
        }
    }

    /// Fetch and publish one historical response. Returns the chunk count.
    pub async fn serve(&self, coords: &HistoricalCoordinates) -> Result<u32, MarketDataError> {
        let timeframe = Timeframe::parse(&coords.timeframe)?;
        let days = validate_days(coords.days as i64)?;

        let bars = self
            .provider
            .historical_bars(&coords.ticker, days, timeframe)
            .await?;
        let source = self.provider.name();
        let samples: Vec<_> = bars
            .iter()
            .map(|b| b.to_sample(&coords.ticker, &coords.timeframe, source, DataType::Historical))
            .collect();

        let chunks = split_into_chunks(
            &samples,
            self.config.chunk_size,
            &coords.ticker,
            &coords.timeframe,
            days,
        )?;
        let total = chunks.len() as u32;

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !self.config.chunk_pause.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(MarketDataError::Cancelled),
                    _ = tokio::time::sleep(self.config.chunk_pause) => {}
                }
            }
            self.bus.publish_historical_chunk(chunk).await?;
            self.status.metrics.record_chunk();
            info!(
                ticker = %coords.ticker,
                timeframe = %coords.timeframe,
                days,
                chunk = chunk.metadata.chunk,
                total,
                "Published historical chunk"
            );
        }
        Ok(total)
    }

    /// Keep the durable request consumer attached until cancelled.
    ///
    /// A failed subscribe, or a subscription the broker ends, is retried
    /// after `retry_backoff * failures` capped at `retry_max`.
    pub async fn run_consumer(self: Arc<Self>) {
        let mut failures: u32 = 0;
        loop {
            match self
                .bus
                .subscribe(HISTORICAL_REQUEST_ALL, SubscribeOptions::durable(CONSUMER_NAME))
                .await
            {
                Ok(sub) => {
                    failures = 0;
                    self.status.consumer_active();
                    info!(consumer = CONSUMER_NAME, "Historical request consumer attached");
                    let summary = run_dispatch(sub, self.clone(), self.cancel.child_token()).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    failures += 1;
                    warn!(handled = summary.handled, "Historical request subscription ended, re-subscribing");
                    self.status.consumer_failed("subscription ended by broker");
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "Failed to subscribe to historical requests");
                    self.status.consumer_failed(e.to_string());
                }
            }

            let delay = (self.config.retry_backoff * failures).min(self.config.retry_max);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.status.consumer_stopped();
        info!(consumer = CONSUMER_NAME, "Historical request consumer stopped");
    }

    fn first_seen(&self, subject: &str, stamp: &str) -> bool {
        self.dedup
            .lock()
            .map(|mut d| d.first_seen(subject, stamp))
            .unwrap_or(true)
    }

    fn forget(&self, subject: &str, stamp: &str) {
        if let Ok(mut d) = self.dedup.lock() {
            d.forget(subject, stamp);
        }
    }
}

#[async_trait]
impl MessageHandler for HistoricalService {
    async fn handle(&self, message: &BusMessage) -> anyhow::Result<()> {
        let metrics = &self.status.metrics;
        let Some(coords) = subjects::parse_historical_request(&message.subject) else {
            warn!(subject = %message.subject, "Malformed historical request subject, dropping");
            return Ok(());
        };

        let request: Option<HistoricalRequest> = match message.decode() {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "Unreadable request body, using subject only");
                None
            }
        };
        let stamp = request.as_ref().and_then(|r| r.dedup_stamp());

        if let Some(stamp) = &stamp {
            if !self.first_seen(&message.subject, stamp) {
                metrics.record_historical_duplicate();
                info!(subject = %message.subject, stamp = %stamp, "Duplicate historical request, skipping");
                return Ok(());
            }
        }

        metrics.record_historical_request();
        info!(
            ticker = %coords.ticker,
            timeframe = %coords.timeframe,
            days = coords.days,
            "Received historical data request"
        );

        match self.serve(&coords).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                metrics.record_historical_failure();
                if let Some(stamp) = &stamp {
                    self.forget(&message.subject, stamp);
                }
                Err(anyhow::Error::new(e).context("historical request will be redelivered"))
            }
            Err(e) => {
                // not retryable; acknowledge so it is not redelivered forever
                metrics.record_historical_failure();
                warn!(subject = %message.subject, error = %e, "Historical request failed");
                Ok(())
            }
        }
    }
}
