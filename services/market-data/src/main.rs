use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use event_bus::EventBus;
use market_data::alpaca::AlpacaProvider;
use market_data::api::{self, ApiState};
use market_data::config::MarketDataConfig;
use market_data::fallback::SampleResolver;
use market_data::historical::HistoricalService;
use market_data::metrics::AlertThresholds;
use market_data::provider::MarketDataProvider;
use market_data::scheduler::Scheduler;
use market_data::status::{run_reporter, ServiceStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = MarketDataConfig::from_env()?;
    info!(url = %config.bus.url, tickers = ?config.tickers, "Market Data Service starting");

    let bus = EventBus::connect(&config.bus)
        .await
        .context("event bus unavailable")?;
    let provider: Arc<dyn MarketDataProvider> = Arc::new(AlpacaProvider::new(config.alpaca.clone())?);

    let cancel = CancellationToken::new();
    let status = Arc::new(ServiceStatus::new());
    let resolver = Arc::new(SampleResolver::new(provider.clone(), config.cache_max_age));

    // Historical requests
    let historical = Arc::new(HistoricalService::new(
        provider.clone(),
        bus.clone(),
        status.clone(),
        config.historical.clone(),
        cancel.child_token(),
    ));
    let consumer = tokio::spawn(historical.run_consumer());

    // Streaming
    let scheduler = Scheduler::new(
        provider,
        resolver,
        bus.clone(),
        status.clone(),
        config.scheduler.clone(),
        cancel.child_token(),
    );
    for ticker in &config.tickers {
        if let Err(e) = scheduler.watch(ticker) {
            warn!(ticker = %ticker, error = %e, "Skipping invalid ticker");
        }
    }
    scheduler.start_daily_timer();

    let reporter = tokio::spawn(run_reporter(
        status.clone(),
        config.stats_interval,
        AlertThresholds::default(),
        cancel.child_token(),
    ));

    // HTTP
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    let app = api::router(ApiState {
        status,
        bus: bus.clone(),
    });
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    shutdown_signal().await;
    info!("Shutting down Market Data Service");
    cancel.cancel();

    scheduler.shutdown().await;
    let _ = consumer.await;
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
