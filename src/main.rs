//! boltd - Bolt protocol endpoint
//!
//! A standalone Bolt endpoint speaking PackStream over chunked TCP framing.
//! Without a query engine attached it answers session control messages and
//! fails statements; embedders wire their own handler through boltd-server.

use boltd_server::{metrics, Config, Metrics, NullSession, Server, ServerConfig, ServerInfo};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if BOLTD_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("BOLTD_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("BOLTD_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting boltd");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let (metrics_shutdown_tx, _) = broadcast::channel(1);

    // Optional metrics endpoint
    let metrics_instance = if config.metrics.enabled {
        let m = Arc::new(Metrics::new()?);
        let addr = config.metrics.bind_addr;
        let server_metrics = m.clone();
        let shutdown_rx = metrics_shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = metrics::run_metrics_server(addr, server_metrics, shutdown_rx).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
        tracing::info!("  Metrics: enabled on {}", addr);
        Some(m)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let mut server_config = ServerConfig::new(config.network.bind_addr);
    server_config.max_connections = config.network.max_connections;
    if let Some(m) = metrics_instance {
        server_config = server_config.with_metrics(m);
    }

    let server = Arc::new(Server::new(
        server_config,
        NullSession::new(ServerInfo::default()),
    ));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    let shutdown_metrics = metrics_shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
        let _ = shutdown_metrics.send(());
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
