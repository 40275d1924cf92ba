#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use event_bus::{BusConfig, EventBus, MemoryBroker};
use gateway::config::{ProxyConfig, RelayConfig};
use gateway::proxy::RpcProxy;
use gateway::relay::Relay;
use gateway::rpc::{RpcError, RpcMethod, StrategyEngine};
use gateway::state::AppState;
use gateway::stats::GatewayStats;

/// Engine answering from a script; an exhausted script keeps failing
#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<bool>>,
    pub calls: AtomicU32,
    pub last_params: Mutex<Option<Value>>,
}

impl ScriptedEngine {
    pub fn new(outcomes: &[bool]) -> Arc<Self> {
        let engine = Self::default();
        engine.push(outcomes);
        Arc::new(engine)
    }

    pub fn push(&self, outcomes: &[bool]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StrategyEngine for ScriptedEngine {
    async fn call(&self, method: RpcMethod, params: &Value, _timeout: Duration) -> Result<Value, RpcError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if ok {
            Ok(json!({ "method": method.procedure(), "call": n }))
        } else {
            Err(RpcError::Transport {
                method,
                message: "connection refused".to_string(),
            })
        }
    }
}

pub fn proxy_config() -> ProxyConfig {
    ProxyConfig {
        max_retries: 2,
        retry_backoff: Duration::from_millis(100),
        ..ProxyConfig::default()
    }
}

pub async fn app_state(engine: Arc<ScriptedEngine>) -> (AppState, MemoryBroker) {
    let broker = MemoryBroker::new();
    let bus = EventBus::with_broker(Arc::new(broker.clone()), &BusConfig::in_memory("gateway-test"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let stats = Arc::new(GatewayStats::new());
    let engine: Arc<dyn StrategyEngine> = engine;
    let proxy = Arc::new(RpcProxy::new(engine, proxy_config(), stats.clone(), cancel.clone()));
    let relay = Relay::new(bus.clone(), RelayConfig::default(), stats.clone(), &cancel);
    let tickers = vec!["SPY".to_string(), "AAPL".to_string()];
    (AppState::new(proxy, relay, bus, stats, tickers), broker)
}
