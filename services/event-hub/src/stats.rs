//! Aggregate event counters
//!
//! Totals per stream family plus per-ticker counters with the time of the
//! last event. Mutated from every dispatch loop; callers only ever see
//! copies.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use types::signal::PayloadKind;

/// Window used by the periodic report to decide which tickers are active
pub const ACTIVE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Stream family an observed event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Live,
    Daily,
    Historical,
    Signal,
    Recommendation,
}

impl EventKind {
    /// Observed families; historical requests are counted separately.
    pub fn from_payload(kind: PayloadKind) -> Option<Self> {
        match kind {
            PayloadKind::Live => Some(EventKind::Live),
            PayloadKind::Daily => Some(EventKind::Daily),
            PayloadKind::HistoricalData => Some(EventKind::Historical),
            PayloadKind::Signal => Some(EventKind::Signal),
            PayloadKind::Recommendation => Some(EventKind::Recommendation),
            PayloadKind::HistoricalRequest => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickerStats {
    pub live_events: u64,
    pub daily_events: u64,
    pub historical_events: u64,
    pub signal_events: u64,
    pub recommendation_events: u64,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl TickerStats {
    fn bump(&mut self, kind: EventKind, at: DateTime<Utc>) {
        match kind {
            EventKind::Live => self.live_events += 1,
            EventKind::Daily => self.daily_events += 1,
            EventKind::Historical => self.historical_events += 1,
            EventKind::Signal => self.signal_events += 1,
            EventKind::Recommendation => self.recommendation_events += 1,
        }
        self.last_event_time = Some(at);
    }

    /// Whether the ticker saw an event within `window` of `now`
    pub fn active_since(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.last_event_time, chrono::Duration::from_std(window)) {
            (Some(last), Ok(window)) => now - last < window,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total_events: u64,
    pub live_events: u64,
    pub daily_events: u64,
    pub historical_events: u64,
    pub signal_events: u64,
    pub recommendation_events: u64,
    pub requests: u64,
    pub error_count: u64,
    pub ticker_stats: BTreeMap<String, TickerStats>,
    pub last_updated: DateTime<Utc>,
}

impl EventStats {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_events: 0,
            live_events: 0,
            daily_events: 0,
            historical_events: 0,
            signal_events: 0,
            recommendation_events: 0,
            requests: 0,
            error_count: 0,
            ticker_stats: BTreeMap::new(),
            last_updated: now,
        }
    }

    /// Tickers active within `window` of `now`, in ticker order
    pub fn active_tickers(&self, now: DateTime<Utc>, window: Duration) -> Vec<(&str, &TickerStats)> {
        self.ticker_stats
            .iter()
            .filter(|(_, s)| s.active_since(now, window))
            .map(|(t, s)| (t.as_str(), s))
            .collect()
    }
}

pub struct HubStats {
    inner: Mutex<EventStats>,
}

impl HubStats {
    /// Start with an empty entry for every watched ticker.
    pub fn new(tickers: &[String]) -> Self {
        let mut stats = EventStats::new(Utc::now());
        for ticker in tickers {
            stats.ticker_stats.insert(ticker.clone(), TickerStats::default());
        }
        Self {
            inner: Mutex::new(stats),
        }
    }

    pub fn record_event(&self, kind: EventKind, ticker: &str, at: DateTime<Utc>) {
        let Ok(mut stats) = self.inner.lock() else {
            return;
        };
        stats.total_events += 1;
        match kind {
            EventKind::Live => stats.live_events += 1,
            EventKind::Daily => stats.daily_events += 1,
            EventKind::Historical => stats.historical_events += 1,
            EventKind::Signal => stats.signal_events += 1,
            EventKind::Recommendation => stats.recommendation_events += 1,
        }
        stats
            .ticker_stats
            .entry(ticker.to_string())
            .or_default()
            .bump(kind, at);
        stats.last_updated = at;
    }

    pub fn record_request(&self, at: DateTime<Utc>) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.total_events += 1;
            stats.requests += 1;
            stats.last_updated = at;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.error_count += 1;
        }
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> EventStats {
        match self.inner.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
