//! Clavum server entry point.
//!
//! Bootstraps process hardening, structured logging, the storage backend,
//! and the collaborator graph, then serves the Axum router with graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use clavum_core::clock::SystemClock;
use clavum_storage::{MemoryStore, PostgresStore, Store};

use clavum_server::config::{ServerConfig, StorageBackendType};
use clavum_server::hardening;
use clavum_server::routes;
use clavum_server::state::{AppOptions, AppState};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Hardening runs before logging is initialized, so warnings go to
    // stderr directly.
    apply_hardening(&config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "Clavum starting");

    let store: Arc<dyn Store> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryStore::new())
        }
        StorageBackendType::Postgres { url } => {
            info!("using PostgreSQL storage");
            Arc::new(
                PostgresStore::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
    };

    let options = AppOptions {
        signature_max_age_ms: config.signature_max_age_ms,
        approval_timeout_ms: config.approval_timeout_ms,
        nonce_gc_stride: config.nonce_gc_stride,
        key_cache_ttl: Duration::from_secs(config.key_cache_ttl_secs),
    };
    let state = AppState::new(store, Arc::new(SystemClock), &options);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Clavum server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Clavum server stopped");
    Ok(())
}

/// Disable core dumps and lock memory before any key material loads.
fn apply_hardening(config: &ServerConfig) {
    if let Err(err) = hardening::disable_core_dumps() {
        eprintln!("warning: could not disable core dumps: {err}");
    }

    if config.disable_mlock {
        eprintln!("warning: mlock disabled via CLAVUM_DISABLE_MLOCK — dev use only");
    } else if let Err(err) = hardening::lock_memory() {
        eprintln!("warning: could not lock memory: {err} (set CLAVUM_DISABLE_MLOCK=true to silence)");
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
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
