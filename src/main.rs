use std::net::SocketAddr;
use tracing_subscriber::{fmt, EnvFilter};

use veo_studio::{config::Config, routes::{router, AppState}};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    match &config.api_key {
        Some(key) => tracing::info!("Using API key: {}...", &key[..key.char_indices().nth(6).map_or(key.len(), |(i, _)| i)]),
        None => tracing::warn!("GEMINI_API_KEY is not set; generation and chat requests will fail with 401"),
    }

    let app = router(AppState::from_config(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, environment = %config.environment, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
