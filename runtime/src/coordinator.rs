//! Reservation coordinator: reserve and confirm against the shared store.
//!
//! # Reserve Protocol
//!
//! ```text
//! 1. hold exists?            → DuplicateHold          (early out)
//! 2. counter missing?        → fetch catalog, create-if-absent
//! 3. quantity > counter?     → InsufficientStock      (early out)
//! 4. atomic script:          re-check 1 and 3, DECRBY counter, SET hold EX ttl
//! ```
//!
//! Steps 1 and 3 only avoid needless work (and a needless catalog call).
//! Correctness rests on step 4 alone: two concurrent holders can both pass the
//! early checks, but only the script decides, so the resource is never
//! oversold.
//!
//! # Confirm Protocol
//!
//! A single `DEL` of the exact hold key. The counter is left alone: the
//! units were paid for.

use crate::metrics::{CatalogMetrics, ReservationMetrics, confirm_outcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stockhold_core::catalog::{CatalogError, CatalogGateway};
use stockhold_core::environment::Clock;
use stockhold_core::store::{ReserveOutcome, StockStore, StoreError, whole_second_ttl};
use stockhold_core::{
    ActiveHold, HoldKey, InventorySnapshot, Reservation, ReservationError, ResourceId, Result,
};
use tracing::{debug, info, warn};

/// Default hold window (5 minutes).
pub const DEFAULT_HOLD_TTL: Duration = Duration::from_secs(300);

/// Default bound on a catalog fetch.
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a hold lives before the store expires it
    pub hold_ttl: Duration,
    /// Upper bound on a catalog fetch, whatever the gateway's own timeout
    pub catalog_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hold_ttl: DEFAULT_HOLD_TTL,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
        }
    }
}

/// Handles reserve and confirm requests.
///
/// Cheap to clone; all clones share the same store, catalog and clock.
#[derive(Clone)]
pub struct ReservationCoordinator {
    store: Arc<dyn StockStore>,
    catalog: Arc<dyn CatalogGateway>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl ReservationCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn StockStore>,
        catalog: Arc<dyn CatalogGateway>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            config,
        }
    }

    /// Coordinator settings.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StockStore> {
        &self.store
    }

    /// Reserve `hold.quantity` units of `hold.resource_id` for `hold.holder_id`.
    ///
    /// # Errors
    ///
    /// - `DuplicateHold`: the same triple is already held
    /// - `ResourceNotFound` / `CatalogUnavailable`: the counter was unknown and
    ///   the catalog could not supply it
    /// - `InsufficientStock`: not enough units
    /// - `Store`: the shared store failed
    pub async fn reserve(&self, hold: &HoldKey) -> Result<Reservation> {
        let started = Instant::now();
        let result = self.try_reserve(hold).await;

        match &result {
            Ok(_) => ReservationMetrics::record_reserved(started.elapsed()),
            Err(e) => ReservationMetrics::record_rejected(e.kind(), started.elapsed()),
        }

        result
    }

    async fn try_reserve(&self, hold: &HoldKey) -> Result<Reservation> {
        if self.store.hold_exists(hold).await? {
            warn!(hold_key = %hold, "Reserve rejected: hold already active");
            return Err(ReservationError::DuplicateHold {
                key: hold.store_key(),
            });
        }

        let requested = hold.quantity.get();
        let available = self.ensure_stock(&hold.resource_id).await?;
        if requested > available {
            warn!(
                hold_key = %hold,
                requested,
                available,
                "Reserve rejected: insufficient stock"
            );
            return Err(ReservationError::InsufficientStock {
                requested,
                available,
            });
        }

        // Taken before the script runs, so the hold never outlives the
        // reported deadline.
        let expires_at = self.expires_at(self.clock.now());
        match self.store.reserve(hold, self.config.hold_ttl).await? {
            ReserveOutcome::Reserved { remaining } => {
                info!(
                    resource_id = %hold.resource_id,
                    holder_id = %hold.holder_id,
                    quantity = requested,
                    remaining_stock = remaining,
                    expires_at = %expires_at,
                    "Hold created"
                );
                Ok(Reservation {
                    hold: hold.clone(),
                    remaining_stock: remaining,
                    expires_at,
                })
            }
            ReserveOutcome::DuplicateHold => {
                warn!(hold_key = %hold, "Reserve lost race: hold created concurrently");
                Err(ReservationError::DuplicateHold {
                    key: hold.store_key(),
                })
            }
            ReserveOutcome::InsufficientStock { available } => {
                warn!(
                    hold_key = %hold,
                    requested,
                    available,
                    "Reserve lost race: stock taken concurrently"
                );
                Err(ReservationError::InsufficientStock {
                    requested,
                    available,
                })
            }
            ReserveOutcome::CounterMissing => Err(StoreError::MalformedValue {
                key: hold.resource_id.stock_key(),
                reason: "stock counter disappeared during reserve".to_string(),
            }
            .into()),
        }
    }

    /// Return the resource's counter, creating it from the catalog if needed.
    async fn ensure_stock(&self, resource_id: &ResourceId) -> Result<u64> {
        if let Some(stock) = self.store.stock(resource_id).await? {
            return Ok(stock);
        }

        info!(resource_id = %resource_id, "Stock unknown, fetching from catalog");
        let started = Instant::now();
        let fetched = tokio::time::timeout(
            self.config.catalog_timeout,
            self.catalog.initial_stock(resource_id),
        )
        .await
        .unwrap_or(Err(CatalogError::Timeout));
        CatalogMetrics::record_fetch(fetched.is_ok(), started.elapsed());

        let initial = fetched.map_err(|e| {
            warn!(resource_id = %resource_id, error = %e, "Catalog fetch failed");
            ReservationError::from(e)
        })?;

        let current = self.store.initialize_stock(resource_id, initial).await?;
        if current == initial {
            info!(resource_id = %resource_id, stock = initial, "Stock counter initialized");
        } else {
            debug!(
                resource_id = %resource_id,
                fetched = initial,
                current,
                "Stock counter was initialized concurrently; keeping existing value"
            );
        }
        Ok(current)
    }

    /// Deadline of a hold created at `now`, with the TTL the store applies.
    fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(whole_second_ttl(self.config.hold_ttl))
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(now)
    }

    /// Confirm (pay for) an active hold.
    ///
    /// Deletes the hold; the reserved units stay consumed.
    ///
    /// # Errors
    ///
    /// - `HoldExpiredOrUnknown`: no such active hold
    /// - `Store`: the shared store failed
    pub async fn confirm(&self, hold: &HoldKey) -> Result<()> {
        let released = self.store.release(hold).await;
        ReservationMetrics::record_confirm(confirm_outcome(&released));

        if released? {
            info!(
                resource_id = %hold.resource_id,
                holder_id = %hold.holder_id,
                quantity = hold.quantity.get(),
                "Hold confirmed"
            );
            Ok(())
        } else {
            warn!(hold_key = %hold, "Confirm rejected: hold expired or unknown");
            Err(ReservationError::HoldExpiredOrUnknown {
                key: hold.store_key(),
            })
        }
    }

    /// Look up an active hold and its remaining time-to-live.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store failed.
    pub async fn hold_status(&self, hold: &HoldKey) -> Result<Option<ActiveHold>> {
        Ok(self.store.active_hold(hold).await?)
    }

    /// Report the counter and the active holds of a resource.
    ///
    /// Never contacts the catalog: an uninitialized counter is reported as
    /// `available: None`.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the shared store failed.
    pub async fn snapshot(&self, resource_id: &ResourceId) -> Result<InventorySnapshot> {
        let available = self.store.stock(resource_id).await?;
        let holds = self.store.active_holds(resource_id).await?;

        Ok(InventorySnapshot {
            resource_id: resource_id.clone(),
            available,
            held: holds.iter().map(|hold| hold.quantity.get()).sum(),
            active_holds: holds.len(),
        })
    }
}

impl std::fmt::Debug for ReservationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
