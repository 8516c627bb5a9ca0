use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tether_link::ConnectionController;
use tether_telemetry::SqliteLogSink;

use crate::auth::require_bearer;
use crate::handlers;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
        }
    }
}

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: ConnectionController,
    pub server_name: Arc<str>,
    pub api_secret: Arc<SecretString>,
    pub start_time: Instant,
    /// Persisted warn+ log lines, when SQLite logging is on.
    pub logs: Option<Arc<SqliteLogSink>>,
}

impl AppState {
    pub fn new(controller: ConnectionController, server_name: &str, api_secret: SecretString) -> Self {
        Self {
            controller,
            server_name: Arc::from(server_name),
            api_secret: Arc::new(api_secret),
            start_time: Instant::now(),
            logs: None,
        }
    }

    pub fn with_logs(mut self, logs: Option<Arc<SqliteLogSink>>) -> Self {
        self.logs = logs;
        self
    }
}

/// Build the router. Everything under `/api` requires the bearer token.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/status", get(handlers::status))
        .route("/api/qr", get(handlers::qr))
        .route("/api/send", post(handlers::send))
        .route("/api/send-image", post(handlers::send_image))
        .route("/api/logout", post(handlers::logout))
        .route("/api/reconnect", post(handlers::reconnect))
        .route("/api/clear-session", post(handlers::clear_session))
        .route("/api/sync-credentials", post(handlers::sync_credentials))
        .route("/api/logs", get(handlers::logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub task: JoinHandle<()>,
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn start(
    config: &ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "control server listening");

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "control server stopped with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        task,
    })
}
