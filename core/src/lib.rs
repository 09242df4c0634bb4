//! # Stockhold Core
//!
//! Core types and traits for time-bounded stock reservations.
//!
//! A caller reserves a quantity of a resource for a limited window and must
//! confirm before the window elapses; otherwise the shared store expires the
//! hold and the quantity is credited back to the stock counter.
//!
//! ## Core Concepts
//!
//! - **Stock counter**: units available for a resource, kept in the store
//! - **Hold**: a TTL-bounded claim identified by `(resource, quantity, holder)`
//! - **Expiration event**: notification that a hold's TTL elapsed
//!
//! ## Hold Lifecycle
//!
//! ```text
//!            reserve              confirm
//! ABSENT ──────────────► HELD ──────────────► CONFIRMED  (counter unchanged)
//!                          │
//!                          │ TTL elapses
//!                          ▼
//!                       EXPIRED                          (counter credited)
//! ```
//!
//! Existence in the store is the single authority on a hold's state.
//!
//! ## Seams
//!
//! - [`store::StockStore`]: counters and holds
//! - [`expiry::ExpirationFeed`]: expiration notifications
//! - [`catalog::CatalogGateway`]: initial stock figures
//! - [`environment::Clock`]: time

pub mod catalog;
pub mod environment;
pub mod error;
pub mod expiry;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{ErrorKind, ReservationError, Result};
pub use types::{
    ActiveHold, HoldKey, HolderId, InventorySnapshot, Quantity, Reservation, ResourceId,
};
