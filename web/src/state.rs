//! Application state for Axum handlers.

use stockhold_runtime::ReservationCoordinator;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Reserve/confirm entry point.
    pub coordinator: ReservationCoordinator,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub const fn new(coordinator: ReservationCoordinator) -> Self {
        Self { coordinator }
    }
}
