//! MirCrew indexer server
//!
//! Loads the configuration, logs the forum session lazily on the first search
//! and serves the Torznab API until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mircrew_indexer::indexer::{MirCrewIndexer, ReqwestTransport};
use mircrew_indexer::{AppState, Config, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mircrew_indexer=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting MirCrew indexer");

    let config = Arc::new(Config::from_env()?);
    tracing::info!(base_url = %config.base_url, "Configuration loaded");

    let transport = ReqwestTransport::new(config.transport())
        .context("Failed to build HTTP client")?;
    let indexer = Arc::new(MirCrewIndexer::new(
        Arc::new(transport),
        config.credentials.clone(),
        config.indexer_settings(),
    ));

    let app = build_app(AppState {
        config: config.clone(),
        indexer: indexer.clone(),
    });

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("Torznab endpoint: http://{}/api?t=caps", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    indexer.session().logout().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
