//! `RelayServer` — Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use relay_core::UserId;
use relay_store::{MembershipDirectory, MessageStore};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::ingest::Ingestor;
use crate::registry::Registry;
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry.
    pub registry: Arc<Registry>,
    /// Inbound message processor.
    pub ingestor: Arc<Ingestor>,
    /// Server configuration.
    pub config: ServerConfig,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Server-wide shutdown token; live sessions watch it and drain out.
    pub shutdown: CancellationToken,
}

/// The relay server: `/ws` upgrade plus `/health` and `/metrics`.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    ingestor: Arc<Ingestor>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server over the given store and membership directory.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn MembershipDirectory>,
    ) -> Self {
        let registry = Arc::new(Registry::new(directory));
        let ingestor = Arc::new(Ingestor::new(store, registry.clone()));
        Self {
            config,
            registry,
            ingestor,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Attach an installed Prometheus recorder for the `/metrics` endpoint.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            ingestor: self.ingestor.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.token(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }

    /// Bind a listener on the configured host and port.
    pub async fn bind(&self) -> std::io::Result<tokio::net::TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "relay server listening");
        Ok(listener)
    }

    /// Serve on `listener` until the shutdown coordinator fires.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        let token = self.shutdown.token();
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Query parameters for the `/ws` upgrade.
///
/// Identity is established by the fronting auth layer; the relay trusts
/// the supplied user id.
#[derive(Deserialize)]
struct WsQuery {
    user: String,
}

/// GET /ws?user=<id>
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if query.user.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing user").into_response();
    }
    if state.registry.connection_count().await >= state.config.max_connections {
        warn!(max = state.config.max_connections, "connection limit reached, upgrade refused");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let user_id = UserId::from(query.user);
    // The transport cap sits above the app limit so an oversized frame
    // reaches the reader's non-fatal skip instead of killing the read.
    ws.max_message_size(state.config.max_frame_bytes.saturating_mul(2))
        .on_upgrade(move |socket| {
            run_ws_session(
                socket,
                user_id,
                state.registry.clone(),
                state.ingestor.clone(),
                state.config.clone(),
                state.shutdown.clone(),
            )
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    let users = state.registry.user_count().await;
    Json(health::health_check(state.start_time, connections, users))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
