//! flowdeck server binary
//!
//! Boot sequence: logging, config, services, restore published pipelines
//! and schedules, serve the API. Shutdown stops the scheduler and every
//! running pipeline before the process exits.

use std::sync::Arc;

use flowdeck_engine::NodeRegistry;
use flowdeck_server::api::create_router;
use flowdeck_server::{FileStore, ServerConfig, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config = ServerConfig::load()?;
    tracing::info!(data_dir = %config.data_dir.display(), "loaded configuration");

    let store = Arc::new(FileStore::new(&config.data_dir));
    let nodes = Arc::new(NodeRegistry::with_builtins());
    let services = Arc::new(Services::new(store, nodes));

    // Bring back everything that was running before the last shutdown.
    services.restore_published();
    let running = services.published.list_running();
    if !running.is_empty() {
        tracing::info!(count = running.len(), "restored published pipelines");
    }

    let router = create_router(Arc::clone(&services));
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "flowdeck server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    services.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
