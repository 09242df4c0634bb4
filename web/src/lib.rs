//! HTTP surface of the reservation service.
//!
//! Thin Axum layer over [`ReservationCoordinator`](stockhold_runtime::ReservationCoordinator):
//! handlers parse path segments into domain types, call the coordinator and
//! map [`ReservationError`](stockhold_core::ReservationError) onto status
//! codes through [`AppError`].
//!
//! # Request Flow
//!
//! 1. **HTTP request** arrives at an Axum handler
//! 2. **Parse** path segments into a `HoldKey` (422 on failure)
//! 3. **Call** the coordinator
//! 4. **Map** the result to a JSON response or an [`AppError`]

pub mod error;
pub mod handlers;
pub mod state;

pub use error::AppError;
pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the service router.
///
/// Metrics are not mounted here; the binary adds `/metrics` next to these
/// routes once the recorder is installed.
pub fn build_router(state: AppState) -> Router {
    use handlers::{health, reservations};

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route(
            "/reserve/:resource/:qty/:holder",
            post(reservations::reserve),
        )
        .route(
            "/confirm-payment/:resource/:qty/:holder",
            post(reservations::confirm_payment),
        )
        .route("/holds/:resource/:qty/:holder", get(reservations::get_hold))
        .route("/stock/:resource", get(reservations::get_stock))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
