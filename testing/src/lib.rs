//! # Stockhold Testing
//!
//! Test doubles for the reservation service.
//!
//! This crate provides:
//! - [`ManualClock`]: time that only moves when a test says so
//! - [`InMemoryStockStore`]: a `StockStore` + `ExpirationFeed` with TTL
//!   expiry driven by the manual clock
//! - [`MockCatalogGateway`]: scripted catalog answers with call counting
//!
//! ## Example
//!
//! ```ignore
//! use stockhold_testing::{InMemoryStockStore, MockCatalogGateway};
//!
//! #[tokio::test]
//! async fn hold_expires() {
//!     let store = Arc::new(InMemoryStockStore::new());
//!     let catalog = Arc::new(MockCatalogGateway::new().with_stock("E1", 10));
//!     let coordinator = ReservationCoordinator::new(
//!         store.clone(), catalog, Arc::new(store.clock().clone()), config,
//!     );
//!
//!     coordinator.reserve(&hold).await?;
//!     store.clock().advance(Duration::from_secs(301));
//!     store.purge_expired(); // emits the expiration notification
//! }
//! ```

use chrono::{DateTime, Utc};
use stockhold_core::environment::Clock;

pub mod catalog;
pub mod stock_store;

/// Controllable clocks.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Clock that only moves when [`advance`](Self::advance) or
    /// [`set`](Self::set) is called.
    ///
    /// Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use stockhold_testing::mocks::{ManualClock, test_clock};
    /// use stockhold_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = test_clock();
    /// let start = clock.now();
    /// clock.advance(Duration::from_secs(300));
    /// assert_eq!((clock.now() - start).num_seconds(), 300);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(later) = chrono::Duration::from_std(by)
                .ok()
                .and_then(|by| time.checked_add_signed(by))
            {
                *time = later;
            }
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// A manual clock starting at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

pub use catalog::MockCatalogGateway;
pub use mocks::{ManualClock, test_clock};
pub use stock_store::InMemoryStockStore;
