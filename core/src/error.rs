//! Error types for reservation operations.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::store::StoreError;

/// Result type alias for reservation operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Error taxonomy for reserve and confirm.
///
/// Every error is local to a single request. None of them leave the stock
/// counter inconsistent: the only mutating step runs after all validations
/// and is atomic at the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    // ═══════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════

    /// Quantity must be strictly positive.
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    /// Identifier is empty or contains a reserved character.
    #[error("Invalid {field}: {value:?}")]
    InvalidIdentifier {
        /// Which identifier was rejected
        field: &'static str,
        /// The rejected value
        value: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Conflict / Capacity
    // ═══════════════════════════════════════════════════════════

    /// The same holder already has an active hold with identical parameters.
    #[error("Hold already active: {key}")]
    DuplicateHold {
        /// Store key of the existing hold
        key: String,
    },

    /// Not enough units available.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units requested
        requested: u64,
        /// Units available when the request was evaluated
        available: u64,
    },

    // ═══════════════════════════════════════════════════════════
    // Upstream (catalog) Errors
    // ═══════════════════════════════════════════════════════════

    /// The catalog does not know the resource.
    #[error("Resource not found in catalog: {0}")]
    ResourceNotFound(String),

    /// The catalog could not be reached or answered with a failure.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    // ═══════════════════════════════════════════════════════════
    // Stale Reference
    // ═══════════════════════════════════════════════════════════

    /// The hold no longer exists: expired, already confirmed, or never
    /// created. The caller must reserve again.
    #[error("Hold expired or unknown: {key}")]
    HoldExpiredOrUnknown {
        /// Store key that was looked up
        key: String,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Shared state store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse classification of [`ReservationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request, rejected before any store access.
    Validation,
    /// Duplicate hold.
    Conflict,
    /// Not enough stock.
    Capacity,
    /// Catalog failure or unknown resource.
    Upstream,
    /// Hold gone by the time of confirmation.
    StaleReference,
    /// Infrastructure failure.
    Internal,
}

impl ErrorKind {
    /// Stable lowercase label, used for metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Capacity => "capacity",
            Self::Upstream => "upstream",
            Self::StaleReference => "stale_reference",
            Self::Internal => "internal",
        }
    }
}

impl ReservationError {
    /// Classify this error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use stockhold_core::error::{ErrorKind, ReservationError};
    /// assert_eq!(ReservationError::InvalidQuantity(0).kind(), ErrorKind::Validation);
    /// ```
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuantity(_) | Self::InvalidIdentifier { .. } => ErrorKind::Validation,
            Self::DuplicateHold { .. } => ErrorKind::Conflict,
            Self::InsufficientStock { .. } => ErrorKind::Capacity,
            Self::ResourceNotFound(_) | Self::CatalogUnavailable(_) => ErrorKind::Upstream,
            Self::HoldExpiredOrUnknown { .. } => ErrorKind::StaleReference,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if the caller can fix the request or simply retry it.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Internal | ErrorKind::Upstream)
    }
}

impl From<CatalogError> for ReservationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => Self::ResourceNotFound(id),
            other => Self::CatalogUnavailable(other.to_string()),
        }
    }
}
