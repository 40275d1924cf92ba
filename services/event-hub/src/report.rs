//! Periodic stats report

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stats::{EventStats, HubStats, ACTIVE_WINDOW};

/// One line per ticker active within the window, in ticker order
pub fn active_ticker_lines(stats: &EventStats, now: DateTime<Utc>) -> Vec<String> {
    stats
        .active_tickers(now, ACTIVE_WINDOW)
        .into_iter()
        .map(|(ticker, s)| {
            let last = s
                .last_event_time
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            format!(
                "{ticker}: live={} daily={} historical={} signals={} recommendations={} last={last}",
                s.live_events, s.daily_events, s.historical_events, s.signal_events, s.recommendation_events
            )
        })
        .collect()
}

/// Log the aggregate counters every `interval` until cancelled.
pub async fn run_reporter(stats: Arc<HubStats>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = stats.snapshot();
        info!(
            total = snapshot.total_events,
            live = snapshot.live_events,
            daily = snapshot.daily_events,
            historical = snapshot.historical_events,
            signals = snapshot.signal_events,
            recommendations = snapshot.recommendation_events,
            requests = snapshot.requests,
            errors = snapshot.error_count,
            "Event hub stats"
        );

        let lines = active_ticker_lines(&snapshot, Utc::now());
        if lines.is_empty() {
            info!("No active tickers in the last 10 minutes");
        }
        for line in lines {
            info!("  {line}");
        }
    }
}
