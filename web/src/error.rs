//! Error types for web handlers.
//!
//! Bridges [`ReservationError`] and HTTP responses through Axum's
//! `IntoResponse`. Every error body has the same shape:
//!
//! ```json
//! { "code": "INSUFFICIENT_STOCK", "message": "Insufficient stock: requested 5, available 2" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use stockhold_core::ReservationError;

/// Application error type for web handlers.
///
/// Carries the HTTP status, a stable machine-readable code and a user-facing
/// message. Server-side failures keep their cause in `source`, which is
/// logged but never sent to the client.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying cause (logged, not exposed).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"), "NOT_FOUND")
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR",
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        let (status, code) = match &err {
            ReservationError::InvalidQuantity(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_QUANTITY")
            }
            ReservationError::InvalidIdentifier { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_IDENTIFIER")
            }
            ReservationError::DuplicateHold { .. } => (StatusCode::CONFLICT, "DUPLICATE_HOLD"),
            ReservationError::InsufficientStock { .. } => {
                (StatusCode::CONFLICT, "INSUFFICIENT_STOCK")
            }
            ReservationError::ResourceNotFound(_) => {
                (StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND")
            }
            ReservationError::CatalogUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CATALOG_UNAVAILABLE")
            }
            ReservationError::HoldExpiredOrUnknown { .. } => (StatusCode::GONE, "HOLD_EXPIRED"),
            ReservationError::Store(_) => {
                return Self::internal("An internal error occurred")
                    .with_source(anyhow::Error::new(err));
            }
        };

        Self::new(status, err.to_string(), code)
    }
}
