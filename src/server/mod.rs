//! HTTP server: thin routing and validation over the broadcast engine.
//!
//! # Routes
//!
//! - `POST /api/sessions/merge` - start a video+audio merge session
//! - `POST /api/sessions/remux` - start a playlist remux session
//! - `GET /api/sessions/:id` - session status snapshot
//! - `GET /api/sessions/:id/ready` - block until prewarmed (or timeout)
//! - `GET /stream/:id` - the live broadcast itself
//! - `GET /health` - liveness probe

mod error;
pub mod routes_sessions;
pub mod routes_stream;

pub use error::AppError;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::engine::{start_cleanup_task, SessionRegistry};
use crate::tools;

/// Shared application context
///
/// The registry is an injected instance, not a process-global; tests stand
/// up as many independent contexts as they like.
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<Config>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", routes_sessions::session_routes())
        .route("/stream/:id", get(routes_stream::deliver_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ffmpeg =
        tools::resolve_ffmpeg(&config.tools).context("ffmpeg is required to run the server")?;
    tracing::info!(ffmpeg = %ffmpeg.display(), "Using ffmpeg");

    let registry = Arc::new(SessionRegistry::new(config.stream.clone(), ffmpeg));
    start_cleanup_task(Arc::clone(&registry), 60);

    let ctx = AppContext {
        registry,
        config: Arc::new(config),
    };
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
