use crate::handlers::{health, market, ws};
use crate::state::AppState;
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/tickers", get(market::tickers))
        .route("/historical-data", get(market::historical_data))
        .route("/signals", get(market::signals))
        .route("/backtest", get(market::backtest))
        .route("/recommendations", get(market::recommendations))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
