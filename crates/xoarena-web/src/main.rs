mod api;
mod auth;
mod config;
mod dto;
mod error;
mod state;
mod store;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xoarena_core::SystemClock;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xoarena_web=debug,xoarena_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;

    let store = store::connect(&config.store).await?;
    let issuer = auth::build_issuer(&config.auth)?;
    tracing::info!(
        fail_mode = ?config.rate_limit.fail_mode,
        store_timeout_ms = config.store.timeout_ms,
        verify_timeout_ms = config.auth.verify_timeout_ms,
        "admission control configured"
    );

    let state = AppState::new(config, store, issuer, Arc::new(SystemClock));
    let app = api::build_app(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("xoarena-web listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
