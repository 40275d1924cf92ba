use std::sync::Arc;
use std::time::Instant;

use event_bus::EventBus;

use crate::proxy::RpcProxy;
use crate::relay::Relay;
use crate::stats::GatewayStats;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<RpcProxy>,
    pub relay: Relay,
    pub bus: EventBus,
    pub stats: Arc<GatewayStats>,
    pub tickers: Arc<Vec<String>>,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        proxy: Arc<RpcProxy>,
        relay: Relay,
        bus: EventBus,
        stats: Arc<GatewayStats>,
        tickers: Vec<String>,
    ) -> Self {
        Self {
            proxy,
            relay,
            bus,
            stats,
            tickers: Arc::new(tickers),
            started: Instant::now(),
        }
    }
}
