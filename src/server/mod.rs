mod http;
mod socket;

use crate::orchestrator::DownloadOrchestrator;
use crate::session::SessionRegistry;
use anyhow::Result;
use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct AppState {
    pub orchestrator: DownloadOrchestrator,
    pub registry: Arc<SessionRegistry>,
    /// Cancelled when the process is shutting down; open event channels close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: DownloadOrchestrator) -> Arc<Self> {
        let registry = Arc::clone(orchestrator.registry());
        Arc::new(Self {
            orchestrator,
            registry,
            shutdown: CancellationToken::new(),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/", get(http::index_handler))
        .route("/health", get(http::health_handler))
        .route("/download", get(http::download_handler))
        .route("/ws", get(socket::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve until `state.shutdown` is cancelled, then let in-flight requests finish.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("Server stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
