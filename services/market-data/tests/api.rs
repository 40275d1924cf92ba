mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use common::memory_bus;
use event_bus::subjects;
use market_data::api::{router, ApiState};
use market_data::status::{ServiceStatus, TickerState};
use types::signal::HistoricalRequest;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let res = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let body = to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_historical_request_is_accepted_and_queued() {
    let (broker, bus) = memory_bus().await;
    let app = router(ApiState {
        status: Arc::new(ServiceStatus::new()),
        bus,
    });

    let (status, body) = get(app, "/api/historical?ticker=spy&timeframe=1d&days=30").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert!(!body["request_id"].as_str().unwrap().is_empty());

    let queued = broker.published_on(subjects::HISTORICAL_REQUEST_ALL);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].0, "historical.request.SPY.1day.30");
    let req: HistoricalRequest = serde_json::from_slice(&queued[0].1).unwrap();
    assert_eq!(req.request_id, body["request_id"].as_str().unwrap());
    assert_eq!(req.source, "http_api");
}

#[tokio::test]
async fn test_bad_historical_parameters_are_rejected() {
    let (broker, bus) = memory_bus().await;
    let state = ApiState {
        status: Arc::new(ServiceStatus::new()),
        bus,
    };

    for uri in [
        "/api/historical?ticker=SPY&timeframe=1d",
        "/api/historical?ticker=SPY&timeframe=1d&days=abc",
        "/api/historical?ticker=SPY&timeframe=1d&days=0",
        "/api/historical?ticker=SPY&timeframe=1d&days=366",
        "/api/historical?ticker=SPY&timeframe=2w&days=30",
    ] {
        let (status, body) = get(router(state.clone()), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "BAD_REQUEST");
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_bus_outage_is_service_unavailable() {
    let (broker, bus) = memory_bus().await;
    broker.set_fail_publishes(true);
    let app = router(ApiState {
        status: Arc::new(ServiceStatus::new()),
        bus,
    });

    let (status, body) = get(app, "/api/historical?ticker=SPY&timeframe=1d&days=30").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_health_reports_ticker_states() {
    let (_broker, bus) = memory_bus().await;
    let status = Arc::new(ServiceStatus::new());
    status.set_ticker_state("SPY", TickerState::Streaming);
    status.set_ticker_state("ACME", TickerState::AwaitingAvailability);
    let app = router(ApiState { status, bus });

    let (code, body) = get(app, "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["bus_connected"], true);
    assert_eq!(body["ticker_states"]["SPY"], "STREAMING");
    assert_eq!(body["ticker_states"]["ACME"], "AWAITING_AVAILABILITY");
    assert_eq!(body["tickers"], serde_json::json!(["ACME", "SPY"]));
}
