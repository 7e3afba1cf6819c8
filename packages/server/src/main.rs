// Main entry point for the support chat API server.

mod app;
mod config;
mod inventory;
mod prompts;
mod routes;
mod search;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::{build_app, build_state};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,support_chat_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting support chat API");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        chat_model = %config.chat_model,
        embedding_model = %config.embedding_model,
        suggestions = config.suggestions_enabled,
        "Configuration loaded"
    );

    let state = build_state(&config).context("Failed to build application state")?;
    let app = build_app(state, &config.allowed_origins);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
