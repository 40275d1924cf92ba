use axum::{
    Json,
    extract::{Query, State},
};

use crate::error::AppError;
use crate::models::{BacktestParams, MarketParams, MarketQuery, RequestSignature};
use crate::proxy::ProxyResponse;
use crate::rpc::RpcMethod;
use crate::state::AppState;

async fn proxied(state: &AppState, method: RpcMethod, q: &MarketQuery) -> Result<ProxyResponse, AppError> {
    let params = MarketParams::from_query(q)?;
    let signature = RequestSignature::new(method, &params);
    state.proxy.call(method, signature, params.to_json()).await
}

pub async fn historical_data(
    State(state): State<AppState>,
    Query(q): Query<MarketQuery>,
) -> Result<ProxyResponse, AppError> {
    proxied(&state, RpcMethod::HistoricalData, &q).await
}

pub async fn signals(
    State(state): State<AppState>,
    Query(q): Query<MarketQuery>,
) -> Result<ProxyResponse, AppError> {
    proxied(&state, RpcMethod::Signals, &q).await
}

pub async fn recommendations(
    State(state): State<AppState>,
    Query(q): Query<MarketQuery>,
) -> Result<ProxyResponse, AppError> {
    proxied(&state, RpcMethod::Recommendations, &q).await
}

pub async fn backtest(
    State(state): State<AppState>,
    Query(q): Query<MarketQuery>,
) -> Result<ProxyResponse, AppError> {
    let params = BacktestParams::from_query(&q)?;
    let signature = RequestSignature::backtest(&params);
    state
        .proxy
        .call(RpcMethod::Backtest, signature, params.to_json())
        .await
}

pub async fn tickers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.tickers.as_ref().clone())
}
