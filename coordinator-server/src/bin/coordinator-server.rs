//! Coordinator server entry point.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coordinator_core::types::CoordinatorConfig;
use coordinator_server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CoordinatorConfig::from_env();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8005);

    info!(
        service = %config.service_name,
        llama_cpp = %config.llama_cpp_url,
        qdrant = %config.qdrant_url,
        "starting coordinator"
    );

    let state = AppState::from_config(config)
        .await
        .context("building service container")?;
    state.tools.warm_cache().await;
    if state.tools.is_empty() {
        coordinator_server::mcp::seed_tool_catalog(&state.tools);
    }
    let background = state.spawn_background();

    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "coordinator HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    // Drain: stop engines, checkpoint the learning pipeline, flush caches.
    state.shutdown().await;
    for handle in background {
        handle.abort();
    }
    info!("coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
