use anyhow::{Context, Result};
use retinue::api::{create_router, WsAppState};
use retinue::config::{load_config, RetinueConfig};
use retinue::directory::HttpDirectory;
use retinue::host::{CompanionHost, HostCommand};
use retinue::simulation::{EntitySpace, LogGreeter};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retinue=info".into()),
        )
        .init();

    info!("Retinue starting...");

    let config = match std::env::var("RETINUE_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => {
            warn!("RETINUE_CONFIG not set, using defaults");
            RetinueConfig::default()
        }
    };

    info!(
        directory_url = %config.directory.base_url,
        game_tag = %config.directory.game_tag,
        tick_rate_hz = config.tick.rate_hz,
        persistence = config.persistence.enabled,
        bind_address = %config.server.bind_address,
        "Configuration loaded"
    );

    let directory = Arc::new(
        HttpDirectory::new(&config.directory.base_url, config.directory.timeout())
            .context("Failed to initialize character directory client")?,
    );

    let bind_address = config.server.bind_address;
    let (host, handle) = CompanionHost::new(config, EntitySpace::new(), directory, Arc::new(LogGreeter));
    let host_task = tokio::spawn(host.run());
    info!("Companion host started");

    // Start WebSocket server
    let router = create_router(Arc::new(WsAppState {
        host: handle.clone(),
    }));
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!(address = %bind_address, "WebSocket server listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "WebSocket server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown: stop accepting connections, then let the host
    // save records and dismiss companions
    server_handle.abort();
    if handle.send(HostCommand::Shutdown).is_ok() {
        if let Err(e) = host_task.await {
            warn!(error = %e, "Companion host task failed");
        }
    }
    info!("Retinue stopped");

    Ok(())
}
