//! API Cache - admin server
//!
//! Runs a cache manager with its expired-entry sweep and exposes the admin
//! HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_cache::api::create_router;
use api_cache::{spawn_cleanup_task, AppState, CacheManager, Config};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache manager (backend selected on first use)
/// 4. Start the expired entry sweep
/// 5. Serve the admin router until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info", overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting API cache");

    let config = Config::from_env();
    info!(
        enabled = config.cache.enabled,
        backend = %config.cache.backend,
        default_ttl = config.cache.default_ttl,
        max_size = config.cache.max_size,
        port = config.server_port,
        cleanup_interval = config.cleanup_interval,
        "Configuration loaded"
    );

    let manager = Arc::new(CacheManager::new(config.cache.clone()));
    let sweep = spawn_cleanup_task(manager.clone(), config.cleanup_interval);

    let app = create_router(AppState::new(manager.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding admin server to {}", addr))?;
    info!("Admin server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep))
        .await
        .context("admin server failed")?;

    manager.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then stops the sweep.
async fn shutdown_signal(sweep: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = sweep {
        handle.abort();
        info!("Expired entry sweep stopped");
    }
}
