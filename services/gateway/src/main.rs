use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use event_bus::EventBus;
use gateway::config::GatewayConfig;
use gateway::proxy::RpcProxy;
use gateway::relay::Relay;
use gateway::router::create_router;
use gateway::rpc::{HttpStrategyEngine, StrategyEngine};
use gateway::state::AppState;
use gateway::stats::GatewayStats;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting Gateway API service");
    let config = GatewayConfig::from_env()?;

    let bus = EventBus::connect(&config.bus).await?;
    let cancel = CancellationToken::new();
    let stats = Arc::new(GatewayStats::new());

    let engine: Arc<dyn StrategyEngine> = Arc::new(HttpStrategyEngine::new(config.engine_url.clone()));
    tracing::info!(engine = %config.engine_url, "Strategy engine configured");
    let proxy = Arc::new(RpcProxy::new(engine, config.proxy.clone(), stats.clone(), cancel.clone()));
    let relay = Relay::new(bus.clone(), config.relay.clone(), stats.clone(), &cancel);

    let state = AppState::new(proxy, relay.clone(), bus.clone(), stats, config.tickers.clone());
    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Listening on {}", config.listen_addr);

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    // clients first, so no fan-out fires into a closed bus
    relay.shutdown().await;
    cancel.cancel();
    if let Err(e) = bus.close().await {
        tracing::warn!(error = %e, "Bus close failed");
    }
    server.await??;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
