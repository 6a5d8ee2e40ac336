//! Sibyl gateway server binary.

use sibyl_pipeline::{
    InMemoryConnectionStore, InMemoryMessageStore, InMemorySchemaCache, InMemorySessionStore,
    InMemoryUserPreferences, InMemoryWorkspaceAuthority, PipelineStores, PlainCredentialStore,
    QueryPipeline,
};
use sibyl_server::{build_llm_router, create_router, AppState, ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env()?;
    info!(addr = %config.listen_addr, default_provider = %config.default_provider, "starting sibyl");

    let llm = Arc::new(build_llm_router(&config));
    let adapters = Arc::new(sibyl_adapters::default_router());

    // Single-process deployment: in-memory collaborators. A multi-node
    // deployment swaps these for durable implementations of the same
    // traits.
    let stores = PipelineStores {
        authority: Arc::new(InMemoryWorkspaceAuthority::new()),
        credentials: Arc::new(PlainCredentialStore),
        preferences: Arc::new(InMemoryUserPreferences::new()),
        connections: Arc::new(InMemoryConnectionStore::new()),
        sessions: Arc::new(InMemorySessionStore::new()),
        messages: Arc::new(InMemoryMessageStore::new()),
    };

    let pipeline = Arc::new(QueryPipeline::new(
        stores,
        adapters.clone(),
        llm,
        Arc::new(InMemorySchemaCache::new()),
    ));

    let app = create_router(AppState { pipeline });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    adapters.close_all().await;
    info!("all adapters closed, bye");
    Ok(())
}
