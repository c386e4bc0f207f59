use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{AppState, handlers};
use crate::auth::AuthorizationComponents;
use crate::config::AppConfig;
use crate::health::{liveness_handler, readiness_handler};

/// Start the HTTP server and run until SIGINT or SIGTERM.
///
/// In-flight requests get `server.shutdown_timeout` seconds to drain. The
/// components are shut down afterwards, which stops the cache sweep.
pub async fn start_server(config: AppConfig, components: AuthorizationComponents) -> Result<()> {
    let app = create_router(AppState::new(components.clone()));

    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}. Is another process using this port?", bind_addr, e))?;
    info!("Server listening on {}", bind_addr);

    let stop = Arc::new(Notify::new());
    let serve = axum::serve(listener, app).with_graceful_shutdown({
        let stop = stop.clone();
        async move { stop.notified().await }
    });
    let mut server = tokio::spawn(async move { serve.await });

    tokio::select! {
        result = &mut server => {
            result??;
        }
        _ = shutdown_signal() => {
            stop.notify_one();
            let drain = Duration::from_secs(config.server.shutdown_timeout);
            match tokio::time::timeout(drain, &mut server).await {
                Ok(result) => result??,
                Err(_) => {
                    warn!(timeout_secs = config.server.shutdown_timeout, "Graceful shutdown timed out, aborting");
                    server.abort();
                }
            }
        }
    }

    components.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Build the routing table.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness_handler))
        .route("/api", get(liveness_handler))
        .route("/ping", get(liveness_handler))
        .route("/check/uiamp", get(liveness_handler))
        .route("/health", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/iam/verify", post(handlers::verify))
        .route("/iam/grant", post(handlers::grant_access))
        .route("/iam/revoke", post(handlers::revoke_access))
        .route("/permission/grant", post(handlers::grant_permission))
        .route("/permission/revoke", post(handlers::revoke_permission))
        .route("/custom", post(handlers::custom))
        .route("/events", post(handlers::publish_event))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
