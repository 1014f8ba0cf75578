//! Traveller Position Broadcaster
//!
//! Serves `GET /sse` (position stream) and `GET /health`.

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use traveller::{BroadcastServer, BroadcasterConfig, DEFAULT_LOG_FILTER, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Traveller Broadcaster v{}", VERSION);

    let config = BroadcasterConfig::load().unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        BroadcasterConfig::default()
    });
    info!(
        "Tick: {} ms, keep-alive: {} ms, dispatch timeout: {} ms",
        config.tick_interval_ms, config.keepalive_interval_ms, config.dispatch_timeout_ms
    );

    let server = Arc::new(BroadcastServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_server.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
