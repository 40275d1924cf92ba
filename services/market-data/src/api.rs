//! HTTP surface: health report and historical request submission

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use event_bus::EventBus;
use types::signal::HistoricalRequest;

use crate::status::{ServiceStatus, StatusReport};

#[derive(Clone)]
pub struct ApiState {
    pub status: Arc<ServiceStatus>,
    pub bus: EventBus,
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

async fn health(State(state): State<ApiState>) -> Json<StatusReport> {
    Json(state.status.report(state.bus.is_connected()))
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

    let request = HistoricalRequest::new(&ticker, &timeframe, days, "http_api", Utc::now())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state
        .bus
        .request_historical(&request)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("Failed to request data: {e}")))?;

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
