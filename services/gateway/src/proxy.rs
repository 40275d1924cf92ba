//! Engine proxy with retry, last-good cache and service-mode tracking
//!
//! Each inbound request becomes one logical engine call:
//!
//! 1. up to `1 + max_retries` attempts (a single attempt in readonly mode),
//!    sleeping `retry_backoff * attempt` between them
//! 2. every attempt feeds the failure tracker
//! 3. a success refreshes the cache; exhaustion falls back to the cache
//! 4. no cache entry: service unavailable

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::error::AppError;
use crate::mode::{FailureTracker, ServiceMode};
use crate::models::RequestSignature;
use crate::rpc::{RpcError, RpcMethod, StrategyEngine};
use crate::stats::GatewayStats;

pub const HEADER_DATA_SOURCE: HeaderName = HeaderName::from_static("x-data-source");
pub const HEADER_DATA_AGE: HeaderName = HeaderName::from_static("x-data-age");
pub const HEADER_SYSTEM_MODE: HeaderName = HeaderName::from_static("x-system-mode");

const PROVENANCE_ENGINE: &str = "engine";

#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Live,
    Cache { age: Duration, provenance: String },
}

/// Answer to a proxied request, fresh or cached
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub payload: Value,
    pub source: DataSource,
    pub mode: ServiceMode,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut res = Json(self.payload).into_response();
        let headers = res.headers_mut();
        headers.insert(HEADER_SYSTEM_MODE, HeaderValue::from_static(self.mode.as_str()));
        match self.source {
            DataSource::Live => {
                headers.insert(HEADER_DATA_SOURCE, HeaderValue::from_static("live"));
            }
            DataSource::Cache { age, .. } => {
                headers.insert(HEADER_DATA_SOURCE, HeaderValue::from_static(types::sample::SOURCE_CACHE));
                headers.insert(HEADER_DATA_AGE, HeaderValue::from(age.as_secs()));
            }
        }
        res
    }
}

pub struct RpcProxy {
    engine: Arc<dyn StrategyEngine>,
    cache: ResponseCache,
    tracker: FailureTracker,
    stats: Arc<GatewayStats>,
    config: ProxyConfig,
    cancel: CancellationToken,
}

impl RpcProxy {
    pub fn new(
        engine: Arc<dyn StrategyEngine>,
        config: ProxyConfig,
        stats: Arc<GatewayStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            cache: ResponseCache::new(),
            tracker: FailureTracker::new(config.degraded_after, config.readonly_after),
            stats,
            config,
            cancel,
        }
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn mode(&self) -> ServiceMode {
        self.tracker.mode()
    }

    fn timeout_for(&self, method: RpcMethod) -> Duration {
        match method {
            RpcMethod::Backtest => self.config.backtest_timeout,
            _ => self.config.rpc_timeout,
        }
    }

    pub async fn call(
        &self,
        method: RpcMethod,
        signature: RequestSignature,
        params: Value,
    ) -> Result<ProxyResponse, AppError> {
        let endpoint = method.endpoint();
        let timeout = self.timeout_for(method);
        let attempts = if self.tracker.mode() == ServiceMode::Readonly {
            1
        } else {
            1 + self.config.max_retries
        };

        let mut last_error: Option<RpcError> = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.config.retry_backoff * (attempt - 1);
                debug!(endpoint, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying engine call");
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let outcome = match tokio::time::timeout(timeout, self.engine.call(method, &params, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout { method, after: timeout }),
            };

            match outcome {
                Ok(payload) => {
                    self.stats.record_rpc(true);
                    let mode = self.tracker.record_success(endpoint);
                    self.cache.store(signature, payload.clone(), PROVENANCE_ENGINE, Utc::now());
                    return Ok(ProxyResponse {
                        payload,
                        source: DataSource::Live,
                        mode,
                    });
                }
                Err(e) => {
                    self.stats.record_rpc(false);
                    let mode = self.tracker.record_failure(endpoint);
                    warn!(endpoint, attempt, attempts, %mode, error = %e, "Engine call failed");
                    last_error = Some(e);
                }
            }
        }

        let mode = self.tracker.mode();
        if let Some(cached) = self.cache.get(&signature) {
            let age = cached.age(Utc::now());
            self.stats.record_cache_hit();
            info!(endpoint, ticker = %signature.ticker, age_secs = age.as_secs(), %mode, "Serving cached response");
            return Ok(ProxyResponse {
                payload: cached.payload,
                source: DataSource::Cache {
                    age,
                    provenance: cached.provenance,
                },
                mode,
            });
        }

        self.stats.record_unavailable();
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "request cancelled".to_string());
        Err(AppError::ServiceUnavailable(format!(
            "{endpoint} unavailable and no cached data: {reason}"
        )))
    }
}
