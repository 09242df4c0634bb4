//! # Stockhold Runtime
//!
//! Request handling and background reconciliation for time-bounded holds.
//!
//! ## Core Components
//!
//! - **Coordinator**: reserve / confirm against the shared store, fetching
//!   initial stock from the catalog on first use
//! - **Reconciler**: listens for hold expirations and credits the counter
//! - **Retry**: backoff for startup connections and resubscription
//! - **Metrics**: Prometheus recorders for all of the above
//!
//! ## Example
//!
//! ```ignore
//! use stockhold_runtime::{CoordinatorConfig, ExpiryReconciler, ReservationCoordinator};
//!
//! let coordinator = ReservationCoordinator::new(
//!     store.clone(),
//!     catalog,
//!     Arc::new(SystemClock),
//!     CoordinatorConfig::default(),
//! );
//! let reconciler = ExpiryReconciler::new(feed, store, shutdown_rx).spawn();
//!
//! let hold = HoldKey::from_parts("E1", 3, "U1")?;
//! let reservation = coordinator.reserve(&hold).await?;
//! coordinator.confirm(&hold).await?;
//! ```

pub mod coordinator;
pub mod metrics;
pub mod reconciler;
pub mod retry;

pub use coordinator::{CoordinatorConfig, ReservationCoordinator};
pub use reconciler::{ExpiryReconciler, Reconciliation, reconcile_expiration};
pub use retry::{RetryPolicy, retry_with_backoff};
