//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting session and bus status plus Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of every session and the event bus
//! - `GET /healthz` - liveness probe (always OK)
//! - `GET /readyz` - readiness probe (a session is connected and a bus channel is enabled)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::services::StreamSession;
use crate::domain::session::SessionState;
use crate::infrastructure::bus::{BusStats, SharedEventBus};
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Feed version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-session status.
    pub sessions: Vec<SessionInfo>,
    /// Event bus status.
    pub bus: BusStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every session connected.
    Healthy,
    /// Some sessions connected.
    Degraded,
    /// No session connected.
    Unhealthy,
}

/// Status of one stream session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Exchange name.
    pub exchange: String,
    /// Session id.
    pub session_id: Uuid,
    /// Current state.
    pub state: SessionState,
    /// Whether the connection uses a listen key.
    pub authenticated: bool,
    /// Whether authenticated streams may still be attempted.
    pub can_use_authenticated: bool,
    /// Live background tasks.
    pub active_tasks: usize,
}

impl SessionInfo {
    fn from_session(session: &StreamSession) -> Self {
        Self {
            exchange: session.exchange_name().to_string(),
            session_id: session.session_id(),
            state: session.state(),
            authenticated: session.is_authenticated(),
            can_use_authenticated: session.can_use_authenticated(),
            active_tasks: session.active_tasks(),
        }
    }

    const fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }
}

/// Readiness probe body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// Whether events can flow to the consumer.
    pub ready: bool,
    /// Sessions currently connected.
    pub connected_sessions: usize,
    /// Whether at least one bus channel is enabled.
    pub bus_enabled: bool,
}

impl Readiness {
    fn of(state: &HealthServerState) -> Self {
        let connected_sessions = state
            .sessions
            .iter()
            .filter(|session| session.state() == SessionState::Connected)
            .count();
        let bus_enabled = state.bus.is_ticker_enabled() || state.bus.is_watcher_enabled();
        Self {
            ready: connected_sessions > 0 && bus_enabled,
            connected_sessions,
            bus_enabled,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    sessions: Vec<Arc<StreamSession>>,
    bus: SharedEventBus,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, sessions: Vec<Arc<StreamSession>>, bus: SharedEventBus) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            sessions,
            bus,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
#[derive(Debug)]
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind {
                port: self.port,
                source,
            })?;

        tracing::info!(port = self.port, "Health server listening");
        serve(listener, self.state, self.cancel).await?;
        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the health router on an already bound listener until cancelled.
///
/// # Errors
///
/// Returns `Serve` if the HTTP server stops with an error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(HealthServerError::Serve)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let code = if response.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let readiness = Readiness::of(&state);
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

async fn metrics_handler() -> impl IntoResponse {
    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let sessions: Vec<SessionInfo> = state
        .sessions
        .iter()
        .map(|session| SessionInfo::from_session(session))
        .collect();

    HealthResponse {
        status: determine_health_status(&sessions),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions,
        bus: state.bus.stats(),
    }
}

fn determine_health_status(sessions: &[SessionInfo]) -> HealthStatus {
    let connected = sessions.iter().filter(|s| s.is_connected()).count();
    match connected {
        0 => HealthStatus::Unhealthy,
        n if n == sessions.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listen port could not be bound.
    #[error("failed to bind health port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("health server failed")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::{BusConfig, EventBus};

    fn info(state: SessionState) -> SessionInfo {
        SessionInfo {
            exchange: "binance".to_string(),
            session_id: Uuid::nil(),
            state,
            authenticated: false,
            can_use_authenticated: false,
            active_tasks: 0,
        }
    }

    #[test]
    fn bind_error_names_port() {
        let error = HealthServerError::Bind {
            port: 8082,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(error.to_string(), "failed to bind health port 8082");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn status_by_connected_sessions() {
        let connected = info(SessionState::Connected);
        let closed = info(SessionState::Closed);

        assert_eq!(
            determine_health_status(&[connected.clone(), connected.clone()]),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&[connected, closed.clone()]),
            HealthStatus::Degraded
        );
        assert_eq!(determine_health_status(&[closed]), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(&[]), HealthStatus::Unhealthy);
    }

    #[test]
    fn session_info_serializes_state_lowercase() {
        let json = serde_json::to_value(info(SessionState::Degraded)).unwrap();
        assert_eq!(json["state"], "degraded");
    }

    #[tokio::test]
    async fn serves_probes_on_bound_listener() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        bus.enable_ticker();
        let state = Arc::new(HealthServerState::new("test".to_string(), Vec::new(), bus));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state, cancel.clone()));

        let client = reqwest::Client::new();
        let live = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(live.status(), reqwest::StatusCode::OK);

        let ready = client
            .get(format!("http://{addr}/readyz"))
            .send()
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let readiness: serde_json::Value = ready.json().await.unwrap();
        assert_eq!(readiness["connected_sessions"], 0);
        assert_eq!(readiness["bus_enabled"], true);

        let health: serde_json::Value = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "unhealthy");
        assert_eq!(health["bus"]["ticker_enabled"], true);
        assert_eq!(health["bus"]["watcher_enabled"], false);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
