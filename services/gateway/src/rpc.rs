//! Strategy engine RPC boundary
//!
//! The engine computes candles, signals, backtests and options
//! recommendations. The gateway only forwards parameters and relays the
//! JSON result; every call carries its own timeout.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RpcMethod {
    HistoricalData,
    Signals,
    Backtest,
    Recommendations,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 4] = [
        RpcMethod::HistoricalData,
        RpcMethod::Signals,
        RpcMethod::Backtest,
        RpcMethod::Recommendations,
    ];

    /// Remote procedure name
    pub fn procedure(&self) -> &'static str {
        match self {
            RpcMethod::HistoricalData => "GetHistoricalData",
            RpcMethod::Signals => "GenerateSignals",
            RpcMethod::Backtest => "RunBacktest",
            RpcMethod::Recommendations => "GetOptionsRecommendations",
        }
    }

    /// Endpoint label used for failure counting and logs
    pub fn endpoint(&self) -> &'static str {
        match self {
            RpcMethod::HistoricalData => "historical",
            RpcMethod::Signals => "signals",
            RpcMethod::Backtest => "backtest",
            RpcMethod::Recommendations => "recommendations",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.procedure())
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} timed out after {after:?}")]
    Timeout { method: RpcMethod, after: Duration },

    #[error("{method} transport error: {message}")]
    Transport { method: RpcMethod, message: String },

    #[error("{method} returned {status}: {message}")]
    Status {
        method: RpcMethod,
        status: u16,
        message: String,
    },

    #[error("{method} returned an unreadable body: {message}")]
    Decode { method: RpcMethod, message: String },
}

#[async_trait]
pub trait StrategyEngine: Send + Sync + 'static {
    /// Issue one call. Retries are the caller's business.
    async fn call(&self, method: RpcMethod, params: &Value, timeout: Duration)
    -> Result<Value, RpcError>;
}

/// Engine reached over HTTP: `POST {base}/rpc/{procedure}` with a JSON body
pub struct HttpStrategyEngine {
    client: Client,
    base_url: String,
}

impl HttpStrategyEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl StrategyEngine for HttpStrategyEngine {
    async fn call(
        &self,
        method: RpcMethod,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let url = format!("{}/rpc/{}", self.base_url, method.procedure());
        let res = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout { method, after: timeout }
                } else {
                    RpcError::Transport {
                        method,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(RpcError::Status {
                method,
                status: status.as_u16(),
                message,
            });
        }

        res.json::<Value>().await.map_err(|e| RpcError::Decode {
            method,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure_names() {
        assert_eq!(RpcMethod::HistoricalData.procedure(), "GetHistoricalData");
        assert_eq!(RpcMethod::Recommendations.endpoint(), "recommendations");
        assert_eq!(RpcMethod::Backtest.to_string(), "RunBacktest");
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_transport_error() {
        // port 9 (discard) is closed on test hosts
        let engine = HttpStrategyEngine::new("http://127.0.0.1:9");
        let err = engine
            .call(RpcMethod::Signals, &Value::Null, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::Transport { .. } | RpcError::Timeout { .. }
        ));
    }
}
