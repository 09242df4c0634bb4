//! Shared state store abstraction for stock counters and reservation holds.
//!
//! This module defines the [`StockStore`] trait: the capability the
//! coordinator and the reconciler need from the external key-value store.
//! The counter's source of truth is the store, never process memory, because
//! several processes share it.
//!
//! # Atomicity Requirements
//!
//! - [`StockStore::reserve`] MUST re-check hold absence and stock sufficiency,
//!   decrement the counter and create the hold in one atomic step
//! - [`StockStore::initialize_stock`] MUST be create-if-absent
//! - [`StockStore::release`] MUST be a single atomic command
//! - [`StockStore::credit_expired`] MUST claim the expiration and increment
//!   the counter in one atomic step, so that when every process hears the
//!   same expiration only the first one credits it
//!
//! # Implementations
//!
//! - `RedisStockStore` (in `stockhold-redis` crate): Lua script + native commands
//! - `InMemoryStockStore` (in `stockhold-testing` crate): mutex-guarded maps
//!   with a controllable clock
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
//! so that the coordinator and reconciler can share an `Arc<dyn StockStore>`.

use crate::types::{ActiveHold, HoldKey, ResourceId};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to connect to the store
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A command or script failed
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// A stored value could not be interpreted
    #[error("Malformed value at '{key}': {reason}")]
    MalformedValue {
        /// The key holding the value
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Failed to subscribe to expiration notifications
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Verdict of the atomic reserve step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Counter decremented and hold created.
    Reserved {
        /// Counter value after the decrement
        remaining: u64,
    },
    /// A hold with the same key already exists; nothing changed.
    DuplicateHold,
    /// Not enough units; nothing changed.
    InsufficientStock {
        /// Counter value at the time of the check
        available: u64,
    },
    /// The counter does not exist; nothing changed.
    CounterMissing,
}

/// Verdict of crediting an expired hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// This caller claimed the expiration and incremented the counter.
    Credited {
        /// Counter value after the increment
        stock: u64,
    },
    /// Another caller already credited this expiration; nothing changed.
    AlreadyCredited,
}

/// Time-to-live a store actually applies for a requested hold TTL.
///
/// Hold expiry has whole-second resolution: sub-second parts round up and
/// the minimum is one second.
///
/// ```
/// use stockhold_core::store::whole_second_ttl;
/// use std::time::Duration;
///
/// assert_eq!(whole_second_ttl(Duration::from_millis(1500)), Duration::from_secs(2));
/// assert_eq!(whole_second_ttl(Duration::ZERO), Duration::from_secs(1));
/// ```
#[must_use]
pub fn whole_second_ttl(ttl: Duration) -> Duration {
    let secs = if ttl.subsec_nanos() > 0 {
        ttl.as_secs().saturating_add(1)
    } else {
        ttl.as_secs()
    };
    Duration::from_secs(secs.max(1))
}

/// How long the credit claim of an expired hold is kept.
///
/// Half the applied hold TTL: long enough to absorb the delivery skew
/// between processes hearing the same expiration, and short enough that the
/// claim is gone before a new hold with the same key can expire.
#[must_use]
pub fn claim_window(hold_ttl: Duration) -> Duration {
    whole_second_ttl(hold_ttl) / 2
}

/// Stock counter and hold storage.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single instance is shared by all
/// request handlers and the reconciler.
pub trait StockStore: Send + Sync {
    /// Read the stock counter of a resource.
    ///
    /// Returns `None` if the counter has never been initialized.
    ///
    /// # Errors
    ///
    /// - `ConnectionFailed` / `CommandFailed`: store unreachable or command failed
    /// - `MalformedValue`: the counter is not a non-negative integer
    fn stock<'a>(&'a self, resource_id: &'a ResourceId) -> StoreFuture<'a, Option<u64>>;

    /// Initialize a resource's counter if it does not exist yet.
    ///
    /// Returns the counter value after the call: `initial` if this call
    /// created it, otherwise the value written by whoever got there first.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn initialize_stock<'a>(
        &'a self,
        resource_id: &'a ResourceId,
        initial: u64,
    ) -> StoreFuture<'a, u64>;

    /// Check whether a hold is currently active.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn hold_exists<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, bool>;

    /// Atomically reserve: check the hold is absent and stock suffices, then
    /// decrement the counter and create the hold with `ttl`, rounded by
    /// [`whole_second_ttl`].
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails. Business rejections are
    /// reported through [`ReserveOutcome`], not as errors.
    fn reserve<'a>(&'a self, hold: &'a HoldKey, ttl: Duration) -> StoreFuture<'a, ReserveOutcome>;

    /// Delete a hold without touching the counter.
    ///
    /// Returns `true` if the hold existed.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn release<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, bool>;

    /// Credit an expired hold's quantity back to its resource's counter,
    /// at most once per expiration.
    ///
    /// Claims the expiration for `claim_window` and increments the counter
    /// in one atomic step. If the claim is already held the counter is left
    /// alone and [`CreditOutcome::AlreadyCredited`] is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails. Neither the claim nor the
    /// increment happened then.
    fn credit_expired<'a>(
        &'a self,
        hold: &'a HoldKey,
        claim_window: Duration,
    ) -> StoreFuture<'a, CreditOutcome>;

    /// Look up a hold and its remaining time-to-live.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn active_hold<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, Option<ActiveHold>>;

    /// List the active holds of a resource.
    ///
    /// Not atomic with respect to concurrent reserves; intended for
    /// diagnostics only.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn active_holds<'a>(&'a self, resource_id: &'a ResourceId) -> StoreFuture<'a, Vec<HoldKey>>;

    /// Check connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
