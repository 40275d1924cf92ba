#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use event_bus::{BusConfig, EventBus, MemoryBroker};
use market_data::error::MarketDataError;
use market_data::provider::{Bar, MarketDataProvider, Quote};
use types::timeframe::Timeframe;

/// Provider whose every operation can be switched on or off
#[derive(Default)]
pub struct StubProvider {
    pub market_open: AtomicBool,
    pub clock_fails: AtomicBool,
    pub quote_ok: AtomicBool,
    pub minute_ok: AtomicBool,
    pub daily_ok: AtomicBool,
    pub history_len: AtomicUsize,
    /// non-zero makes historical calls fail with this HTTP status
    pub history_status: AtomicU16,

    pub clock_calls: AtomicU32,
    pub quote_calls: AtomicU32,
    pub minute_calls: AtomicU32,
    pub daily_calls: AtomicU32,
    pub history_calls: AtomicU32,
}

impl StubProvider {
    pub fn all_ok() -> Arc<Self> {
        let p = Self::default();
        p.quote_ok.store(true, Ordering::SeqCst);
        p.minute_ok.store(true, Ordering::SeqCst);
        p.daily_ok.store(true, Ordering::SeqCst);
        Arc::new(p)
    }

    pub fn all_failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    fn fail(endpoint: &str) -> MarketDataError {
        MarketDataError::Status {
            endpoint: endpoint.to_string(),
            status: 503,
        }
    }
}

pub fn bar(minutes: i64, close: i64) -> Bar {
    Bar {
        timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 13, 30, 0).unwrap() + Duration::minutes(minutes),
        open: Decimal::from(close - 1),
        high: Decimal::from(close + 1),
        low: Decimal::from(close - 2),
        close: Decimal::from(close),
        volume: 1_000 + minutes,
        trade_count: Some(10),
        vwap: None,
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    fn name(&self) -> &str {
        "Stub"
    }

    async fn is_market_open(&self) -> Result<bool, MarketDataError> {
        self.clock_calls.fetch_add(1, Ordering::SeqCst);
        if self.clock_fails.load(Ordering::SeqCst) {
            return Err(Self::fail("/v2/clock"));
        }
        Ok(self.market_open.load(Ordering::SeqCst))
    }

    async fn latest_quote(&self, _ticker: &str) -> Result<Quote, MarketDataError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if !self.quote_ok.load(Ordering::SeqCst) {
            return Err(Self::fail("quotes"));
        }
        Ok(Quote {
            bid: Decimal::new(9990, 2),
            ask: Decimal::new(10010, 2),
            timestamp: Utc::now(),
        })
    }

    async fn latest_minute_bar(&self, _ticker: &str) -> Result<Bar, MarketDataError> {
        self.minute_calls.fetch_add(1, Ordering::SeqCst);
        if !self.minute_ok.load(Ordering::SeqCst) {
            return Err(Self::fail("bars 1Min"));
        }
        Ok(bar(0, 101))
    }

    async fn latest_daily_bar(&self, _ticker: &str) -> Result<Bar, MarketDataError> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        if !self.daily_ok.load(Ordering::SeqCst) {
            return Err(Self::fail("bars 1Day"));
        }
        Ok(bar(0, 99))
    }

    async fn historical_bars(
        &self,
        ticker: &str,
        _days: u32,
        _timeframe: Timeframe,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.history_status.load(Ordering::SeqCst);
        if status != 0 {
            return Err(MarketDataError::Status {
                endpoint: "bars".to_string(),
                status,
            });
        }
        let len = self.history_len.load(Ordering::SeqCst);
        if len == 0 {
            return Err(MarketDataError::NoData {
                ticker: ticker.to_string(),
                what: "historical bars",
            });
        }
        Ok((0..len as i64).map(|i| bar(i, 100 + i)).collect())
    }
}

pub async fn memory_bus() -> (MemoryBroker, EventBus) {
    let broker = MemoryBroker::new();
    let bus = EventBus::with_broker(Arc::new(broker.clone()), &BusConfig::in_memory("test"))
        .await
        .unwrap();
    (broker, bus)
}
