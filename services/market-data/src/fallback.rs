//! Sample resolution through the fallback tier chain
//!
//! Tiers are tried in order and the first success wins:
//!
//! 1. live quote merged with the latest minute bar (live mode only)
//! 2. latest minute bar
//! 3. latest daily bar
//! 4. last real sample for the ticker, re-timestamped and tagged `cached`
//! 5. synthetic placeholder tagged `generated`
//!
//! Only tier 5 fabricates data. Every real sample refreshes the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use types::sample::{DataType, MarketSample};

use crate::provider::MarketDataProvider;
use crate::synthetic::SyntheticGenerator;

/// Fallback tier that produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    LiveQuote,
    MinuteBar,
    DailyBar,
    Cached,
    Synthetic,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::LiveQuote,
        Tier::MinuteBar,
        Tier::DailyBar,
        Tier::Cached,
        Tier::Synthetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::LiveQuote => "live_quote",
            Tier::MinuteBar => "minute_bar",
            Tier::DailyBar => "daily_bar",
            Tier::Cached => "cached",
            Tier::Synthetic => "synthetic",
        }
    }

    /// Whether the sample reflects a provider response
    pub fn is_real(&self) -> bool {
        !matches!(self, Tier::Synthetic)
    }
}

/// What the caller intends to publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Market open: start from the live quote, tag `live`
    Live,
    /// Market closed: start from the latest bar, tag `recent`
    Recent,
}

impl ResolveMode {
    fn data_type(&self) -> DataType {
        match self {
            ResolveMode::Live => DataType::Live,
            ResolveMode::Recent => DataType::Recent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub sample: MarketSample,
    pub tier: Tier,
}

#[derive(Debug, Clone)]
struct CachedSample {
    sample: MarketSample,
    stored_at: DateTime<Utc>,
}

/// Last real sample per ticker
///
/// Entries are never evicted; `max_age` only controls whether an entry
/// may still be served.
#[derive(Debug)]
pub struct SampleCache {
    entries: Mutex<HashMap<String, CachedSample>>,
    max_age: Option<Duration>,
}

impl SampleCache {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    pub fn remember(&self, sample: &MarketSample, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            sample.ticker.clone(),
            CachedSample {
                sample: sample.clone(),
                stored_at: now,
            },
        );
    }

    /// Cached copy re-stamped at `now`, if one exists and is fresh enough
    pub fn recall(&self, ticker: &str, now: DateTime<Utc>) -> Option<MarketSample> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(ticker)?;
        if let Some(max_age) = self.max_age {
            let age = (now - entry.stored_at).to_std().unwrap_or_default();
            if age > max_age {
                debug!(ticker, age_secs = age.as_secs(), "Cached sample too old");
                return None;
            }
        }
        Some(entry.sample.as_cached(now))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SampleResolver {
    provider: Arc<dyn MarketDataProvider>,
    cache: SampleCache,
    synthetic: SyntheticGenerator,
}

impl SampleResolver {
    pub fn new(provider: Arc<dyn MarketDataProvider>, cache_max_age: Option<Duration>) -> Self {
        Self {
            provider,
            cache: SampleCache::new(cache_max_age),
            synthetic: SyntheticGenerator::new(),
        }
    }

    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    /// Walk the tier chain. Never fails: the synthetic tier always answers.
    pub async fn resolve(&self, ticker: &str, mode: ResolveMode) -> Resolution {
        let source = self.provider.name().to_string();
        let tag = mode.data_type();

        let real = match mode {
            ResolveMode::Live => match self.from_quote(ticker, &source, tag).await {
                Some(sample) => Some((sample, Tier::LiveQuote)),
                None => self.from_bars(ticker, &source, tag).await,
            },
            ResolveMode::Recent => self.from_bars(ticker, &source, tag).await,
        };

        let now = Utc::now();
        if let Some((sample, tier)) = real {
            self.cache.remember(&sample, now);
            return Resolution { sample, tier };
        }

        if let Some(sample) = self.cache.recall(ticker, now) {
            debug!(ticker, "Serving cached sample");
            return Resolution {
                sample,
                tier: Tier::Cached,
            };
        }

        warn!(ticker, "No real data available, generating placeholder");
        Resolution {
            sample: self.synthetic.generate(ticker, now),
            tier: Tier::Synthetic,
        }
    }

    async fn from_quote(&self, ticker: &str, source: &str, tag: DataType) -> Option<MarketSample> {
        let quote = match self.provider.latest_quote(ticker).await {
            Ok(q) => q,
            Err(e) => {
                debug!(ticker, error = %e, "Quote unavailable");
                return None;
            }
        };
        let mid = quote.mid();

        let sample = match self.provider.latest_minute_bar(ticker).await {
            Ok(bar) => MarketSample {
                timestamp: quote.timestamp,
                price: mid,
                ..bar.to_sample(ticker, "1min", source, tag)
            },
            Err(e) => {
                debug!(ticker, error = %e, "Minute bar unavailable, quote-only sample");
                MarketSample {
                    ticker: ticker.to_string(),
                    timestamp: quote.timestamp,
                    price: mid,
                    open: mid,
                    high: mid,
                    low: mid,
                    close: mid,
                    volume: 0,
                    vwap: None,
                    trade_count: None,
                    interval: "1min".to_string(),
                    source: source.to_string(),
                    data_type: tag,
                }
            }
        };
        Some(sample)
    }

    async fn from_bars(
        &self,
        ticker: &str,
        source: &str,
        tag: DataType,
    ) -> Option<(MarketSample, Tier)> {
        match self.provider.latest_minute_bar(ticker).await {
            Ok(bar) => return Some((bar.to_sample(ticker, "1min", source, tag), Tier::MinuteBar)),
            Err(e) => debug!(ticker, error = %e, "Minute bar unavailable, trying daily"),
        }
        match self.provider.latest_daily_bar(ticker).await {
            Ok(bar) => Some((bar.to_sample(ticker, "1day", source, tag), Tier::DailyBar)),
            Err(e) => {
                debug!(ticker, error = %e, "Daily bar unavailable");
                None
            }
        }
    }
}
