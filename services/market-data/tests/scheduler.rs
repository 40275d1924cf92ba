mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{memory_bus, StubProvider};
use event_bus::MemoryBroker;
use market_data::fallback::{SampleResolver, Tier};
use market_data::provider::MarketDataProvider;
use market_data::scheduler::{Scheduler, SchedulerConfig};
use market_data::status::{ServiceStatus, TickerState};
use types::sample::{DataType, MarketSample};

const POLL: Duration = Duration::from_secs(60);

async fn scheduler(p: &Arc<StubProvider>) -> (Scheduler, MemoryBroker, Arc<ServiceStatus>) {
    let (broker, bus) = memory_bus().await;
    let provider: Arc<dyn MarketDataProvider> = p.clone();
    let resolver = Arc::new(SampleResolver::new(provider.clone(), None));
    let status = Arc::new(ServiceStatus::new());
    let config = SchedulerConfig {
        polling_interval: POLL,
        ..SchedulerConfig::default()
    };
    let s = Scheduler::new(provider, resolver, bus, status.clone(), config, CancellationToken::new());
    (s, broker, status)
}

fn samples(broker: &MemoryBroker, pattern: &str) -> Vec<MarketSample> {
    broker
        .published_on(pattern)
        .iter()
        .map(|(_, body)| serde_json::from_slice(body).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_awaits_real_data_before_streaming() {
    let p = StubProvider::all_failing();
    let (s, broker, status) = scheduler(&p).await;

    assert!(s.watch("acme").unwrap());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(status.ticker_state("ACME"), Some(TickerState::AwaitingAvailability));

    // still only placeholders after a full tick
    tokio::time::sleep(POLL).await;
    assert!(broker.published_on("live.*").is_empty());
    assert_eq!(status.ticker_state("ACME"), Some(TickerState::AwaitingAvailability));

    p.set(&p.minute_ok, true);
    tokio::time::sleep(POLL).await;
    assert_eq!(status.ticker_state("ACME"), Some(TickerState::Streaming));

    let published = samples(&broker, "live.ACME");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].data_type, DataType::Recent);
    assert!(!published[0].is_synthetic());

    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_streaming_never_goes_back_to_awaiting() {
    let p = StubProvider::all_ok();
    let (s, broker, status) = scheduler(&p).await;
    s.watch("SPY").unwrap();
    tokio::time::sleep(POLL + Duration::from_millis(10)).await;
    assert_eq!(samples(&broker, "live.SPY").len(), 1);

    // provider goes dark: cached copies keep flowing
    p.set(&p.minute_ok, false);
    p.set(&p.daily_ok, false);
    tokio::time::sleep(POLL).await;

    let published = samples(&broker, "live.SPY");
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].data_type, DataType::Cached);
    assert_eq!(status.ticker_state("SPY"), Some(TickerState::Streaming));
    assert_eq!(status.metrics.tier_count(Tier::Cached), 1);

    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_market_publishes_live_samples() {
    let p = StubProvider::all_ok();
    p.set(&p.market_open, true);
    let (s, broker, status) = scheduler(&p).await;
    s.watch("SPY").unwrap();
    tokio::time::sleep(POLL + Duration::from_millis(10)).await;

    let published = samples(&broker, "live.SPY");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].data_type, DataType::Live);
    assert!(status.market_open());
    assert_eq!(status.metrics.export()["live_events"], 1);

    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_clock_failure_is_treated_as_closed() {
    let p = StubProvider::all_ok();
    p.set(&p.market_open, true);
    p.set(&p.clock_fails, true);
    let (s, broker, _status) = scheduler(&p).await;
    s.watch("SPY").unwrap();
    tokio::time::sleep(POLL + Duration::from_millis(10)).await;

    let published = samples(&broker, "live.SPY");
    assert_eq!(published[0].data_type, DataType::Recent);
    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_watch_is_idempotent_and_unwatch_stops_publishing() {
    let p = StubProvider::all_ok();
    let (s, broker, status) = scheduler(&p).await;
    assert!(s.watch("SPY").unwrap());
    assert!(!s.watch("spy").unwrap());
    assert!(s.watch("bad ticker").is_err());
    assert_eq!(s.watched(), vec!["SPY".to_string()]);

    tokio::time::sleep(POLL + Duration::from_millis(10)).await;
    assert!(s.unwatch("SPY").await);
    assert!(!s.unwatch("SPY").await);
    assert!(s.watched().is_empty());
    assert_eq!(status.ticker_state("SPY"), None);

    let before = broker.published_on("live.SPY").len();
    tokio::time::sleep(POLL * 3).await;
    assert_eq!(broker.published_on("live.SPY").len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_daily_timer_publishes_for_every_ticker() {
    let p = StubProvider::all_ok();
    let (s, broker, status) = scheduler(&p).await;
    s.watch("SPY").unwrap();
    s.watch("AAPL").unwrap();
    s.start_daily_timer_after(Duration::from_secs(600));

    tokio::time::sleep(Duration::from_secs(601)).await;
    let daily = samples(&broker, "daily.*");
    assert_eq!(daily.len(), 2);
    assert!(daily.iter().all(|d| d.data_type == DataType::Daily && d.interval == "1day"));

    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert_eq!(samples(&broker, "daily.*").len(), 4);
    assert_eq!(status.metrics.export()["daily_events"], 4);

    s.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_daily_failure_publishes_nothing() {
    let p = StubProvider::all_ok();
    p.set(&p.daily_ok, false);
    let (s, broker, status) = scheduler(&p).await;
    s.watch("SPY").unwrap();
    s.start_daily_timer_after(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(broker.published_on("daily.*").is_empty());
    assert_eq!(status.metrics.export()["daily_failures"], 1);
    s.shutdown().await;
}
