#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use event_bus::{BusConfig, EventBus, MemoryBroker};
use event_hub::hub::EventHub;
use event_hub::stats::{EventStats, HubStats};

pub async fn memory_bus() -> (MemoryBroker, EventBus) {
    let broker = MemoryBroker::new();
    let bus = EventBus::with_broker(Arc::new(broker.clone()), &BusConfig::in_memory("test"))
        .await
        .unwrap();
    (broker, bus)
}

pub async fn hub_with(tickers: &[&str]) -> (MemoryBroker, EventBus, Arc<EventHub>) {
    let (broker, bus) = memory_bus().await;
    let tickers: Vec<String> = tickers.iter().map(|t| t.to_string()).collect();
    let stats = Arc::new(HubStats::new(&tickers));
    let hub = Arc::new(EventHub::new(bus.clone(), stats, CancellationToken::new()));
    (broker, bus, hub)
}

pub fn sample(ticker: &str, data_type: &str) -> Value {
    json!({
        "ticker": ticker,
        "timestamp": "2024-06-03T14:00:00Z",
        "price": 100.5,
        "open": 100.0,
        "high": 101.0,
        "low": 99.5,
        "close": 100.5,
        "volume": 1200,
        "interval": "1min",
        "source": "Alpaca",
        "data_type": data_type
    })
}

pub fn signal(ticker: &str) -> Value {
    json!({
        "ticker": ticker,
        "date": "2024-06-03",
        "signal_type": "BUY",
        "entry_price": 100.5,
        "stoploss": 98.0
    })
}

pub fn recommendation(ticker: &str) -> Value {
    json!({
        "ticker": ticker,
        "date": "2024-06-03",
        "signal_type": "BUY",
        "stock_price": 100.5,
        "stoploss": 98.0,
        "option_type": "CALL",
        "strike": 105.0,
        "expiration": "2024-06-21",
        "delta": 0.4,
        "iv": 0.25,
        "price": 1.35
    })
}

pub fn chunk(ticker: &str, index: u32, total: u32) -> Value {
    json!({
        "data": [sample(ticker, "historical")],
        "metadata": {
            "ticker": ticker,
            "timeframe": "1day",
            "days": 30,
            "chunk": index,
            "total_chunks": total,
            "data_type": "historical"
        }
    })
}

/// Poll the stats until `done` holds or a second passes.
pub async fn wait_for_stats(hub: &EventHub, done: impl Fn(&EventStats) -> bool) -> EventStats {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        let snapshot = hub.stats().snapshot();
        if done(&snapshot) || tokio::time::Instant::now() >= deadline {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
