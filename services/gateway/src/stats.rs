//! Gateway counters

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct GatewayStats {
    ws_connections_total: AtomicU64,
    ws_connections_active: AtomicU64,
    messages_forwarded: AtomicU64,
    messages_dropped: AtomicU64,
    rpc_calls: AtomicU64,
    rpc_failures: AtomicU64,
    cache_hits: AtomicU64,
    unavailable: AtomicU64,
    rpc_ready: AtomicBool,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.ws_connections_total.fetch_add(1, Ordering::Relaxed);
        self.ws_connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .ws_connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn active_connections(&self) -> u64 {
        self.ws_connections_active.load(Ordering::Relaxed)
    }

    pub fn record_forwarded(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    pub fn record_rpc(&self, ok: bool) {
        self.rpc_calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.rpc_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.rpc_ready.store(ok, Ordering::Relaxed);
    }

    /// Outcome of the most recent engine call
    pub fn rpc_ready(&self) -> bool {
        self.rpc_ready.load(Ordering::Relaxed)
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("ws_connections_total".to_string(), self.ws_connections_total.load(Ordering::Relaxed));
        m.insert("ws_connections_active".to_string(), self.ws_connections_active.load(Ordering::Relaxed));
        m.insert("messages_forwarded".to_string(), self.messages_forwarded.load(Ordering::Relaxed));
        m.insert("messages_dropped".to_string(), self.messages_dropped.load(Ordering::Relaxed));
        m.insert("rpc_calls".to_string(), self.rpc_calls.load(Ordering::Relaxed));
        m.insert("rpc_failures".to_string(), self.rpc_failures.load(Ordering::Relaxed));
        m.insert("cache_hits".to_string(), self.cache_hits.load(Ordering::Relaxed));
        m.insert("unavailable".to_string(), self.unavailable.load(Ordering::Relaxed));
        m
    }
}
