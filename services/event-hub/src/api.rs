//! HTTP surface: health report and historical request submission

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use event_bus::EventBus;
use types::signal::HistoricalRequest;

use crate::hub::{EventHub, StreamStatus};
use crate::stats::EventStats;
use crate::SERVICE_VERSION;

/// Source tag on requests submitted through this service
pub const REQUEST_SOURCE: &str = "hub_api";

#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<EventHub>,
    pub bus: EventBus,
    pub started: Instant,
}

impl ApiState {
    pub fn new(hub: Arc<EventHub>, bus: EventBus) -> Self {
        Self {
            hub,
            bus,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg, "SERVICE_UNAVAILABLE")
            }
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub bus_connected: bool,
    pub stats: EventStats,
    pub streams: BTreeMap<String, StreamStatus>,
}

#[derive(Debug, Deserialize)]
pub struct HistoricalQuery {
    pub ticker: Option<String>,
    pub timeframe: Option<String>,
    pub days: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/historical", get(request_historical))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        timestamp: Utc::now(),
        version: SERVICE_VERSION,
        uptime_secs: state.started.elapsed().as_secs(),
        bus_connected: state.hub.is_connected(),
        stats: state.hub.stats().snapshot(),
        streams: state.hub.stream_status(),
    })
}

async fn request_historical(
    State(state): State<ApiState>,
    Query(q): Query<HistoricalQuery>,
) -> Result<Response, ApiError> {
    let (Some(ticker), Some(timeframe), Some(days)) = (q.ticker, q.timeframe, q.days) else {
        return Err(ApiError::BadRequest(
            "Missing required parameters: ticker, timeframe, days".to_string(),
        ));
    };
    let days: i64 = days.trim().parse().map_err(|_| {
        ApiError::BadRequest("Invalid days parameter: must be a positive integer up to 365".to_string())
    })?;

    let now = Utc::now();
    let request = HistoricalRequest::new(&ticker, &timeframe, days, REQUEST_SOURCE, now)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state
        .bus
        .request_historical(&request)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("Failed to request data: {e}")))?;
    state.hub.stats().record_request(now);

    info!(ticker = %request.ticker, timeframe = %request.timeframe, days = request.days, "Historical request submitted");
    let body = json!({
        "status": "accepted",
        "request_id": request.request_id,
        "message": format!(
            "Historical data request for {} ({}, {} days) has been submitted",
            request.ticker, request.timeframe, request.days
        ),
    });
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}
