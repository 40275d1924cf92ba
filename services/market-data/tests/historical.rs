mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use common::{memory_bus, StubProvider};
use event_bus::subjects::{self, HistoricalCoordinates};
use event_bus::{Broker, BusMessage, MemoryBroker, MessageHandler};
use market_data::historical::{HistoricalConfig, HistoricalService};
use market_data::provider::MarketDataProvider;
use market_data::status::{ConsumerState, ServiceStatus};
use types::chunk::{ChunkAssembler, HistoricalChunk};
use types::sample::DataType;
use types::signal::HistoricalRequest;

async fn service(p: &Arc<StubProvider>) -> (HistoricalService, MemoryBroker, Arc<ServiceStatus>) {
    let (broker, bus) = memory_bus().await;
    let provider: Arc<dyn MarketDataProvider> = p.clone();
    let status = Arc::new(ServiceStatus::new());
    let config = HistoricalConfig {
        chunk_pause: Duration::ZERO,
        ..HistoricalConfig::default()
    };
    let svc = HistoricalService::new(provider, bus, status.clone(), config, CancellationToken::new());
    (svc, broker, status)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}

fn coords(ticker: &str, timeframe: &str, days: u32) -> HistoricalCoordinates {
    HistoricalCoordinates {
        ticker: ticker.to_string(),
        timeframe: timeframe.to_string(),
        days,
    }
}

fn request_message(req: &HistoricalRequest) -> BusMessage {
    let subject = subjects::historical_request(&req.ticker, &req.timeframe, req.days);
    BusMessage::new(subject, Bytes::from(serde_json::to_vec(req).unwrap()), None)
}

fn chunks(broker: &MemoryBroker) -> Vec<(String, HistoricalChunk)> {
    broker
        .published_on(subjects::HISTORICAL_DATA_ALL)
        .into_iter()
        .map(|(s, body)| (s, serde_json::from_slice(&body).unwrap()))
        .collect()
}

#[tokio::test]
async fn test_nine_hundred_bars_become_nine_chunks() {
    let p = StubProvider::all_ok();
    p.history_len.store(900, Ordering::SeqCst);
    let (svc, broker, status) = service(&p).await;

    let total = svc.serve(&coords("SPY", "1min", 30)).await.unwrap();
    assert_eq!(total, 9);

    let published = chunks(&broker);
    assert_eq!(published.len(), 9);
    let mut assembler = ChunkAssembler::new();
    for (i, (subject, chunk)) in published.into_iter().enumerate() {
        assert_eq!(subject, "historical.data.SPY.1min.30");
        assert_eq!(chunk.metadata.chunk, i as u32 + 1);
        assert_eq!(chunk.metadata.total_chunks, 9);
        assert_eq!(chunk.data.len(), 100);
        assert!(chunk.data.iter().all(|s| s.data_type == DataType::Historical && s.interval == "1min"));
        assembler.accept(chunk).unwrap();
    }
    assert!(assembler.is_complete());
    let all = assembler.finish().unwrap();
    assert_eq!(all.len(), 900);
    assert!(all.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    assert_eq!(StubProvider::count(&p.history_calls), 1);
    assert_eq!(status.metrics.export()["chunks_published"], 9);
}

#[tokio::test]
async fn test_response_uses_raw_request_coordinates() {
    let p = StubProvider::all_ok();
    p.history_len.store(5, Ordering::SeqCst);
    let (svc, broker, _) = service(&p).await;

    svc.serve(&coords("SPY", "1h", 7)).await.unwrap();
    let published = chunks(&broker);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "historical.data.SPY.1h.7");
    assert_eq!(published[0].1.data[0].interval, "1h");
}

#[tokio::test]
async fn test_duplicate_request_is_served_once() {
    let p = StubProvider::all_ok();
    p.history_len.store(10, Ordering::SeqCst);
    let (svc, broker, status) = service(&p).await;

    let req = HistoricalRequest::new("SPY", "1day", 30, "test", Utc::now()).unwrap();
    svc.handle(&request_message(&req)).await.unwrap();
    svc.handle(&request_message(&req)).await.unwrap();

    assert_eq!(StubProvider::count(&p.history_calls), 1);
    assert_eq!(chunks(&broker).len(), 1);
    assert_eq!(status.metrics.export()["historical_duplicates"], 1);

    // a fresh request for the same coordinates is served again
    let again = HistoricalRequest::new("SPY", "1day", 30, "test", Utc::now()).unwrap();
    svc.handle(&request_message(&again)).await.unwrap();
    assert_eq!(StubProvider::count(&p.history_calls), 2);
}

#[tokio::test]
async fn test_transient_failure_is_left_for_redelivery() {
    let p = StubProvider::all_ok();
    p.history_len.store(10, Ordering::SeqCst);
    p.history_status.store(503, Ordering::SeqCst);
    let (svc, broker, status) = service(&p).await;

    let req = HistoricalRequest::new("SPY", "1day", 30, "test", Utc::now()).unwrap();
    assert!(svc.handle(&request_message(&req)).await.is_err());
    assert_eq!(status.metrics.export()["historical_failures"], 1);

    // the redelivered copy is not mistaken for a duplicate
    p.history_status.store(0, Ordering::SeqCst);
    svc.handle(&request_message(&req)).await.unwrap();
    assert_eq!(chunks(&broker).len(), 1);
}

#[tokio::test]
async fn test_permanent_failures_are_acknowledged() {
    let p = StubProvider::all_ok();
    let (svc, broker, status) = service(&p).await;

    // no data for the window
    let req = HistoricalRequest::new("SPY", "1day", 30, "test", Utc::now()).unwrap();
    svc.handle(&request_message(&req)).await.unwrap();

    // unsupported timeframe on the subject
    let bad = BusMessage::new("historical.request.SPY.2weeks.30", Bytes::from_static(b"{}"), None);
    svc.handle(&bad).await.unwrap();

    // not a request subject at all
    let junk = BusMessage::new("historical.request.SPY", Bytes::from_static(b"{}"), None);
    svc.handle(&junk).await.unwrap();

    assert!(chunks(&broker).is_empty());
    assert_eq!(status.metrics.export()["historical_failures"], 2);
}

#[tokio::test]
async fn test_unreadable_body_is_served_from_the_subject() {
    let p = StubProvider::all_ok();
    p.history_len.store(3, Ordering::SeqCst);
    let (svc, broker, _) = service(&p).await;

    let msg = BusMessage::new("historical.request.AAPL.5min.2", Bytes::from_static(b"not json"), None);
    svc.handle(&msg).await.unwrap();
    assert_eq!(chunks(&broker)[0].0, "historical.data.AAPL.5min.2");
}

#[tokio::test(start_paused = true)]
async fn test_consumer_retries_failed_subscribe_and_serves_requests() {
    let p = StubProvider::all_ok();
    p.history_len.store(150, Ordering::SeqCst);
    let (broker, bus) = memory_bus().await;
    broker.fail_next_subscribes(subjects::HISTORICAL_REQUEST_ALL, 2);

    let status = Arc::new(ServiceStatus::new());
    let cancel = CancellationToken::new();
    let config = HistoricalConfig {
        chunk_pause: Duration::ZERO,
        retry_backoff: Duration::from_secs(1),
        retry_max: Duration::from_secs(5),
        ..HistoricalConfig::default()
    };
    let provider: Arc<dyn MarketDataProvider> = p.clone();
    let svc = Arc::new(HistoricalService::new(
        provider,
        bus.clone(),
        status.clone(),
        config,
        cancel.clone(),
    ));
    let consumer = tokio::spawn(svc.run_consumer());

    wait_until(|| status.consumer().state == ConsumerState::Active).await;
    let c = status.consumer();
    assert_eq!(c.failures, 2);
    assert!(c.last_error.is_none());
    assert_eq!(broker.active_subscriptions(subjects::HISTORICAL_REQUEST_ALL), 1);

    let req = HistoricalRequest::new("SPY", "1day", 30, "test", Utc::now()).unwrap();
    bus.request_historical(&req).await.unwrap();
    wait_until(|| chunks(&broker).len() == 2).await;
    assert_eq!(p.history_calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    consumer.await.unwrap();
    assert_eq!(status.consumer().state, ConsumerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_resubscribes_after_broker_ends_subscription() {
    let p = StubProvider::all_ok();
    let (broker, bus) = memory_bus().await;
    let status = Arc::new(ServiceStatus::new());
    let cancel = CancellationToken::new();
    let config = HistoricalConfig {
        chunk_pause: Duration::ZERO,
        ..HistoricalConfig::default()
    };
    let provider: Arc<dyn MarketDataProvider> = p.clone();
    let svc = Arc::new(HistoricalService::new(provider, bus, status.clone(), config, cancel.clone()));
    let consumer = tokio::spawn(svc.run_consumer());

    wait_until(|| broker.active_subscriptions(subjects::HISTORICAL_REQUEST_ALL) == 1).await;
    broker.close().await.unwrap();
    broker.set_connected(true);

    wait_until(|| status.consumer().failures == 1 && status.consumer().state == ConsumerState::Active).await;
    assert_eq!(broker.active_subscriptions(subjects::HISTORICAL_REQUEST_ALL), 1);

    cancel.cancel();
    consumer.await.unwrap();
    assert_eq!(status.consumer().state, ConsumerState::Stopped);
}
