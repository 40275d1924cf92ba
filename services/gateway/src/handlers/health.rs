use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::{Value, json};

use crate::mode::ModeSnapshot;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "tradinglab-api-gateway";

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let bus_connected = state.bus.is_connected();
    let mode = state.proxy.mode();
    let status = if bus_connected && state.stats.rpc_ready() {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "service_name": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "bus_connected": bus_connected,
        "rpc_ready": state.stats.rpc_ready(),
        "service_mode": mode,
        "connections": state.relay.connection_count(),
        "broker_subscriptions": state.relay.feed_count().await,
        "counters": state.stats.export(),
        "cached_responses": state.proxy.cache().len(),
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<ModeSnapshot> {
    Json(state.proxy.tracker().snapshot())
}
