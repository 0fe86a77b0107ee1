use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use chat_api_server::app::build_router;
use chat_api_server::config::Settings;
use chat_api_server::services::{DisabledRetrieval, RetrievalProvider};
use chat_api_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chat_api_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting Chat API Server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("Configuration loaded");

    // The retrieval collaborator is an external service; nothing is wired
    // in-process, so context injection stays off until one is injected.
    let retrieval: Arc<dyn RetrievalProvider> = Arc::new(DisabledRetrieval);
    if settings.rag.enabled {
        warn!("rag.enabled is set but no retrieval collaborator is wired; context injection will be empty");
    }

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::new(settings, retrieval);
    let app = build_router(state);

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
