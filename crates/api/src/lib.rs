//! SafeWatch API Server
//!
//! REST API over the monitoring session manager: session lifecycle, SOS,
//! sensor reading ingestion, notification history, and Prometheus metrics.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use monitor::{FeedRegistry, MonitorError, SessionManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod routes;

/// Application state shared across handlers
pub struct AppState {
    /// Monitoring sessions
    pub manager: Arc<SessionManager>,
    /// Per-user sensor feeds the manager samples from
    pub feeds: Arc<FeedRegistry>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Prometheus render handle, if a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new application state
    pub fn new(manager: Arc<SessionManager>, feeds: Arc<FeedRegistry>) -> Self {
        Self {
            manager,
            feeds,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// `[server]` configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080)
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Metrics recorder not installed")]
    MetricsDisabled,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Monitor(MonitorError::AlreadyActive(_)) => StatusCode::CONFLICT,
            ApiError::Monitor(MonitorError::NotActive(_)) => StatusCode::NOT_FOUND,
            ApiError::Monitor(MonitorError::SensorUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Monitor(MonitorError::DispatchFailure(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Monitor(MonitorError::ConfigInvalid(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MetricsDisabled => StatusCode::NOT_FOUND,
        }
    }
}

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    /// Delivered notifications within the retained history window
    pub recent_notifications_delivered: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/monitoring", get(routes::monitoring::overview))
        .route("/api/v1/monitoring/:user/start", post(routes::monitoring::start))
        .route("/api/v1/monitoring/:user/stop", post(routes::monitoring::stop))
        .route("/api/v1/monitoring/:user/status", get(routes::monitoring::status))
        .route("/api/v1/monitoring/:user/history", get(routes::monitoring::history))
        .route("/api/v1/monitoring/:user/sos", post(routes::monitoring::sos))
        .route("/api/v1/monitoring/:user/resolve", post(routes::monitoring::resolve))
        .route(
            "/api/v1/monitoring/:user/auto-alert",
            post(routes::monitoring::set_auto_alert),
        )
        .route(
            "/api/v1/monitoring/:user/location",
            post(routes::monitoring::update_location),
        )
        .route("/api/v1/monitoring/:user/logout", post(routes::monitoring::logout))
        .route(
            "/api/v1/monitoring/:user/readings",
            post(routes::readings::publish),
        )
        .route(
            "/api/v1/notifications",
            get(routes::notifications::get_notifications),
        )
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions: state.manager.active_count(),
        recent_notifications_delivered: state
            .manager
            .dispatcher()
            .history(usize::MAX)
            .iter()
            .filter(|n| n.delivered)
            .count(),
    })
}

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ApiError::MetricsDisabled)
}

/// Initialize logging. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve until ctrl-c, then stop every session
pub async fn run_server(state: Arc<AppState>, addr: &str) -> Result<(), std::io::Error> {
    let manager = state.manager.clone();
    let app = create_router(state);

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => {
                    warn!("Cannot listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    manager.shutdown();
    info!("API server stopped");
    Ok(())
}
