mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tower::ServiceExt;

use common::{ScriptedEngine, app_state};
use gateway::router::create_router;

async fn get(app: axum::Router, uri: &str) -> (Response, Value) {
    let res = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let (parts, body) = res.into_parts();
    let bytes = to_bytes(body, 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (Response::from_parts(parts, Body::empty()), value)
}

fn header<'a>(res: &'a Response, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_fresh_answer_carries_live_headers() {
    let engine = ScriptedEngine::new(&[true]);
    let (state, _) = app_state(engine.clone()).await;

    let (res, body) = get(create_router(state), "/api/signals?ticker=spy&days=10&interval=1h").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-data-source"), Some("live"));
    assert_eq!(header(&res, "x-system-mode"), Some("normal"));
    assert!(header(&res, "x-data-age").is_none());
    assert_eq!(body["method"], "GenerateSignals");

    let sent = engine.last_params.lock().unwrap().clone().unwrap();
    assert_eq!(sent["ticker"], "SPY");
    assert_eq!(sent["days"], 10);
    assert_eq!(sent["interval"], "1hour");
    assert_eq!(sent["strategy"], "RedCandle");
}

#[tokio::test(start_paused = true)]
async fn test_cached_answer_carries_provenance_headers() {
    let engine = ScriptedEngine::new(&[true]);
    let (state, _) = app_state(engine).await;

    let (first, _) = get(create_router(state.clone()), "/api/recommendations?ticker=SPY").await;
    assert_eq!(first.status(), StatusCode::OK);

    let (res, body) = get(create_router(state), "/api/recommendations?ticker=SPY").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-data-source"), Some("cache"));
    assert!(header(&res, "x-data-age").is_some());
    assert_eq!(body["method"], "GetOptionsRecommendations");
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_engine_without_cache_is_503() {
    let engine = ScriptedEngine::new(&[]);
    let (state, _) = app_state(engine).await;

    let (res, body) = get(create_router(state), "/api/historical-data?ticker=SPY").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_malformed_parameters_are_rejected_without_calling_the_engine() {
    let engine = ScriptedEngine::new(&[true, true, true, true]);
    let (state, _) = app_state(engine.clone()).await;

    for uri in [
        "/api/signals",
        "/api/signals?ticker=SPY&days=0",
        "/api/signals?ticker=SPY&days=400",
        "/api/historical-data?ticker=SPY&days=abc",
        "/api/backtest?ticker=SPY&risk_reward_ratios=1,two",
        "/api/recommendations?ticker=SPY&interval=3min",
    ] {
        let (res, body) = get(create_router(state.clone()), uri).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "BAD_REQUEST");
    }
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_backtest_forwards_target_lists() {
    let engine = ScriptedEngine::new(&[true]);
    let (state, _) = app_state(engine.clone()).await;

    let (res, _) = get(
        create_router(state),
        "/api/backtest?ticker=AAPL&profit_targets_dollar=100,250&risk_reward_ratios=1.5",
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let sent = engine.last_params.lock().unwrap().clone().unwrap();
    assert_eq!(sent["profit_targets"], serde_json::json!([5.0, 10.0, 15.0]));
    assert_eq!(sent["profit_targets_dollar"], serde_json::json!([100.0, 250.0]));
    assert_eq!(sent["risk_reward_ratios"], serde_json::json!([1.5]));
}

#[tokio::test]
async fn test_tickers_status_and_health() {
    let engine = ScriptedEngine::new(&[]);
    let (state, _) = app_state(engine).await;

    let (_, tickers) = get(create_router(state.clone()), "/api/tickers").await;
    assert_eq!(tickers, serde_json::json!(["SPY", "AAPL"]));

    let (_, status) = get(create_router(state.clone()), "/api/status").await;
    assert_eq!(status["mode"], "normal");
    assert_eq!(status["readonly_after"], 10);

    let (res, health) = get(create_router(state), "/api/health").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(health["bus_connected"], true);
    assert_eq!(health["rpc_ready"], false);
    assert_eq!(health["service_mode"], "normal");
    assert_eq!(health["connections"], 0);
}
