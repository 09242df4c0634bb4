//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether the service is
//! alive and whether it should receive traffic.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Name reported by the liveness endpoint.
pub const SERVICE_NAME: &str = "reservation-service";

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Liveness check. Does NOT check dependencies.
///
/// ```text
/// GET /health → {"status":"ok","service":"reservation-service"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
    })
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Whether the service can take traffic
    pub ready: bool,
    /// Shared store reachable
    pub store: bool,
}

/// Readiness check: pings the shared store.
///
/// - 200 OK: store reachable
/// - 503 Service Unavailable: store unreachable
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    match state.coordinator.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                store: true,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed: store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    store: false,
                }),
            )
        }
    }
}
