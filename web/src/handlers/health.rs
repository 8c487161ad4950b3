//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestrators to verify
//! service health.

use crate::state::AppState;
use availability_relay_runtime::{HealthCheck, HealthStatus};
use axum::{Json, extract::State, http::StatusCode};

/// Liveness: the process is up.
///
/// Does not look at the upstream bus.
///
/// ```text
/// GET /health → 200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: whether the hub is relaying updates.
///
/// # Status Codes
///
/// - 200 OK: connected (healthy), or connecting/reconnecting (degraded)
/// - 503 Service Unavailable: reconnect budget exhausted
///
/// ```text
/// GET /health/ready
/// ```
///
/// ```json
/// {
///   "component": "broadcast_hub",
///   "status": "degraded",
///   "message": "upstream subscription reconnecting (attempt 2)",
///   "metadata": [["state", "reconnecting (attempt 2)"], ...],
///   "checked_at": "2025-01-01T00:00:00Z"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthCheck>) {
    let health = state.hub.health();

    let status = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(health))
}
