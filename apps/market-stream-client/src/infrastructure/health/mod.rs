//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status with connection and traffic detail
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::health::{ConnectionQuality, ConnectionState, HealthSnapshot};
use crate::domain::stats::StatsSnapshot;
use crate::infrastructure::feed::StreamClient;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection health.
    pub connection: HealthSnapshot,
    /// Traffic statistics.
    pub stats: StatsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected with a good link.
    Healthy,
    /// Connected on a poor link, or reconnecting.
    Degraded,
    /// No connection and none in progress.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    client: StreamClient,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, client: StreamClient) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            client,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
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
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.client.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.client.health();

    HealthResponse {
        status: determine_health_status(&connection),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stats: state.client.stats(),
        connection,
    }
}

fn determine_health_status(connection: &HealthSnapshot) -> HealthStatus {
    match connection.status {
        ConnectionState::Connected => match connection.quality {
            ConnectionQuality::Excellent | ConnectionQuality::Good => HealthStatus::Healthy,
            ConnectionQuality::Fair | ConnectionQuality::Poor => HealthStatus::Degraded,
        },
        ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Error => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::health::ProtocolMode;
    use crate::infrastructure::config::ClientConfig;
    use crate::infrastructure::feed::InMemoryTransport;

    fn snapshot(status: ConnectionState, quality: ConnectionQuality) -> HealthSnapshot {
        HealthSnapshot {
            status,
            connection_id: None,
            protocol: ProtocolMode::Text,
            latency_ms: None,
            reconnect_count: 0,
            reconnect_attempts: 0,
            messages_sent: 0,
            messages_received: 0,
            error_count: 0,
            last_heartbeat: None,
            quality,
            queued_messages: 0,
            subscriptions: 0,
        }
    }

    fn server_state() -> (Arc<HealthServerState>, InMemoryTransport) {
        let transport = InMemoryTransport::new();
        let client = StreamClient::new(
            ClientConfig::new("ws://feed.test/stream"),
            Arc::new(transport.clone()),
        );
        (
            Arc::new(HealthServerState::new("0.1.0".to_string(), client)),
            transport,
        )
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionState::Connected, ConnectionQuality::Excellent, HealthStatus::Healthy)]
    #[test_case(ConnectionState::Connected, ConnectionQuality::Good, HealthStatus::Healthy)]
    #[test_case(ConnectionState::Connected, ConnectionQuality::Fair, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Connected, ConnectionQuality::Poor, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Reconnecting, ConnectionQuality::Poor, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Connecting, ConnectionQuality::Poor, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Disconnected, ConnectionQuality::Poor, HealthStatus::Unhealthy)]
    #[test_case(ConnectionState::Error, ConnectionQuality::Poor, HealthStatus::Unhealthy)]
    fn determine_status(state: ConnectionState, quality: ConnectionQuality, expected: HealthStatus) {
        assert_eq!(determine_health_status(&snapshot(state, quality)), expected);
    }

    #[tokio::test]
    async fn health_reports_disconnected_client_as_unavailable() {
        let (state, _transport) = server_state();

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.version, "0.1.0");

        let http = health_handler(State(state)).await.into_response();
        assert_eq!(http.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readiness_follows_connection() {
        let (state, transport) = server_state();

        let before = readiness_handler(State(state.clone())).await.into_response();
        assert_eq!(before.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.client.connect().await.unwrap();
        let _peer = transport.next_peer().await.unwrap();

        let after = readiness_handler(State(state.clone())).await.into_response();
        assert_eq!(after.status(), StatusCode::OK);

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.connection.status, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let response = liveness_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
