use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use event_bus::EventBus;
use event_hub::api::{self, ApiState};
use event_hub::config::HubConfig;
use event_hub::hub::EventHub;
use event_hub::report::run_reporter;
use event_hub::stats::HubStats;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HubConfig::from_env()?;
    info!(url = %config.bus.url, tickers = ?config.tickers, "Event Hub starting");

    let bus = EventBus::connect(&config.bus)
        .await
        .context("event bus unavailable")?;

    let cancel = CancellationToken::new();
    let stats = Arc::new(HubStats::new(&config.tickers));
    let hub = Arc::new(EventHub::new(bus.clone(), stats.clone(), cancel.child_token()));

    let failed = hub.start().await;
    if failed > 0 {
        warn!(failed, retry_every = ?config.retry_interval, "Some streams unavailable at startup");
    }
    let retry = tokio::spawn(hub.clone().run_retry(config.retry_interval));
    let reporter = tokio::spawn(run_reporter(stats, config.stats_interval, cancel.child_token()));

    // HTTP
    let listener = TcpListener::bind(config.health_addr).await?;
    info!("Listening on {}", config.health_addr);
    let app = api::router(ApiState::new(hub.clone(), bus.clone()));
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    shutdown_signal().await;
    info!("Shutting down Event Hub");
    cancel.cancel();

    hub.shutdown().await;
    let _ = retry.await;
    let _ = reporter.await;
    if let Err(e) = bus.close().await {
        warn!(error = %e, "Bus close failed");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
