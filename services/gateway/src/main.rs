mod config;
mod error;
mod handlers;
mod logging;
mod models;
mod router;
mod state;

use config::{DEFAULT_CONFIG_PATH, GatewayConfig};
use router::create_router;
use state::AppState;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = GatewayConfig::load(&path)?;
    logging::init(&config.logging)?;

    tracing::info!(config = %path, version = market_data::SERVICE_VERSION, "Starting exchange gateway");

    let state = AppState::build(&config)?;
    let app = create_router(state.clone());

    let addr = config.server_address()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining engines");
    state.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
