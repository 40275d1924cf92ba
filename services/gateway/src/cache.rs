//! Last-good engine responses keyed by request signature
//!
//! Entries are never expired. Callers learn how stale a cached answer is
//! from its age.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::RequestSignature;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
    /// Where the payload originally came from
    pub provenance: String,
}

impl CachedResponse {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<RequestSignature, CachedResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, signature: RequestSignature, payload: Value, provenance: &str, now: DateTime<Utc>) {
        let entry = CachedResponse {
            payload,
            stored_at: now,
            provenance: provenance.to_string(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(signature, entry);
    }

    /// Copy of the entry for `signature`
    pub fn get(&self, signature: &RequestSignature) -> Option<CachedResponse> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(signature)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketParams;
    use crate::rpc::RpcMethod;
    use serde_json::json;

    fn sig(ticker: &str) -> RequestSignature {
        let params = MarketParams {
            ticker: ticker.to_string(),
            days: 30,
            interval: "15min".to_string(),
            strategy: "RedCandle".to_string(),
        };
        RequestSignature::new(RpcMethod::Signals, &params)
    }

    #[test]
    fn test_latest_store_wins() {
        let cache = ResponseCache::new();
        let t0 = Utc::now();
        cache.store(sig("SPY"), json!([1]), "engine", t0);
        cache.store(sig("SPY"), json!([2]), "engine", t0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&sig("SPY")).unwrap().payload, json!([2]));
        assert!(cache.get(&sig("AAPL")).is_none());
    }

    #[test]
    fn test_age() {
        let cache = ResponseCache::new();
        let t0 = Utc::now();
        cache.store(sig("SPY"), json!({}), "engine", t0);
        let entry = cache.get(&sig("SPY")).unwrap();
        assert_eq!(entry.age(t0 + chrono::Duration::seconds(90)), Duration::from_secs(90));
        assert_eq!(entry.age(t0 - chrono::Duration::seconds(5)), Duration::ZERO);
    }
}
