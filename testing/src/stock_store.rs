//! In-memory stock store with clock-driven hold expiry.
//!
//! Holds carry an absolute deadline computed from a [`ManualClock`]. Expired
//! holds are removed lazily: at the start of every store operation, or when a
//! test calls [`InMemoryStockStore::purge_expired`]. Each removal is published
//! as an [`ExpirationEvent`] on a broadcast channel, which gives the same
//! delivery semantics as store keyspace notifications: subscribers present at
//! that moment see it, nobody else ever will.

#![allow(clippy::unwrap_used)] // Test infrastructure: mutex poisoning is a test bug
#![allow(clippy::missing_panics_doc)]

use crate::mocks::{ManualClock, test_clock};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockhold_core::environment::Clock;
use stockhold_core::expiry::{ExpirationEvent, ExpirationFeed, ExpirationStream};
use stockhold_core::store::{
    CreditOutcome, ReserveOutcome, StockStore, StoreError, StoreFuture, whole_second_ttl,
};
use stockhold_core::{ActiveHold, HoldKey, ResourceId};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct State {
    counters: HashMap<String, u64>,
    holds: HashMap<String, (HoldKey, DateTime<Utc>)>,
    claims: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Faults {
    credit: Option<StoreError>,
    subscribe_failures: usize,
    unavailable: bool,
}

/// In-memory [`StockStore`] and [`ExpirationFeed`].
///
/// Clones share state, clock and notification channel.
///
/// # Example
///
/// ```
/// use stockhold_testing::InMemoryStockStore;
/// use stockhold_core::store::StockStore;
/// use stockhold_core::{HoldKey, ResourceId};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStockStore::new();
/// let e1 = ResourceId::new("E1")?;
/// store.initialize_stock(&e1, 10).await?;
///
/// let hold = HoldKey::from_parts("E1", 3, "U1")?;
/// store.reserve(&hold, Duration::from_secs(300)).await?;
/// assert_eq!(store.stock(&e1).await?, Some(7));
///
/// store.clock().advance(Duration::from_secs(300));
/// assert!(!store.hold_exists(&hold).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
    events: Arc<Mutex<broadcast::Sender<ExpirationEvent>>>,
    clock: ManualClock,
}

impl InMemoryStockStore {
    /// Create an empty store driven by [`test_clock`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(test_clock())
    }

    /// Create an empty store driven by `clock`.
    #[must_use]
    pub fn with_clock(clock: ManualClock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            events: Arc::new(Mutex::new(events)),
            clock,
        }
    }

    /// The clock that decides when holds expire.
    #[must_use]
    pub const fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Set a counter directly, bypassing create-if-absent.
    pub fn set_stock(&self, resource_id: &str, stock: u64) {
        self.state
            .lock()
            .unwrap()
            .counters
            .insert(resource_id.to_string(), stock);
    }

    /// Read a counter without purging expired holds.
    #[must_use]
    pub fn counter(&self, resource_id: &str) -> Option<u64> {
        self.state.lock().unwrap().counters.get(resource_id).copied()
    }

    /// Number of holds not yet purged (expired or not).
    #[must_use]
    pub fn hold_count(&self) -> usize {
        self.state.lock().unwrap().holds.len()
    }

    /// Remove every hold whose deadline has passed and publish an
    /// expiration event for each. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let keys: Vec<String> = state
                .holds
                .iter()
                .filter(|(_, (_, deadline))| *deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                state.holds.remove(key);
            }
            // Claim markers lapse silently: their expiry is not a hold's.
            state.claims.retain(|_, deadline| *deadline > now);
            keys
        };

        for key in &expired {
            self.publish_expiration(key);
        }
        expired.len()
    }

    /// Publish an expiration notification for an arbitrary key.
    ///
    /// Returns `false` if nobody was subscribed (the event is lost).
    pub fn publish_expiration(&self, key: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .send(ExpirationEvent::new(key))
            .is_ok()
    }

    /// End every open expiration stream, as a dropped connection would.
    pub fn disconnect_subscribers(&self) {
        let (fresh, _) = broadcast::channel(EVENT_CAPACITY);
        *self.events.lock().unwrap() = fresh;
    }

    /// Number of open expiration streams.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.lock().unwrap().receiver_count()
    }

    /// Whether the credit of `hold`'s expiration is currently claimed.
    #[must_use]
    pub fn is_claimed(&self, hold: &HoldKey) -> bool {
        let now = self.clock.now();
        self.state
            .lock()
            .unwrap()
            .claims
            .get(&hold.claim_key())
            .is_some_and(|deadline| *deadline > now)
    }

    /// Make every subsequent credit fail with `error` (or succeed again
    /// with `None`).
    pub fn fail_credits(&self, error: Option<StoreError>) {
        self.faults.lock().unwrap().credit = error;
    }

    /// Make the next `count` subscribe calls fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.faults.lock().unwrap().subscribe_failures = count;
    }

    /// Make every operation fail with `ConnectionFailed`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unwrap().unavailable = unavailable;
    }

    /// Fail if unavailable, then purge expired holds.
    fn prepare(&self) -> Result<(), StoreError> {
        if self.faults.lock().unwrap().unavailable {
            return Err(StoreError::ConnectionFailed(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        self.purge_expired();
        Ok(())
    }

    /// Absolute deadline `ttl` from now. Callers round hold TTLs first.
    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StockStore for InMemoryStockStore {
    fn stock<'a>(&'a self, resource_id: &'a ResourceId) -> StoreFuture<'a, Option<u64>> {
        Box::pin(async move {
            self.prepare()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .counters
                .get(resource_id.as_str())
                .copied())
        })
    }

    fn initialize_stock<'a>(
        &'a self,
        resource_id: &'a ResourceId,
        initial: u64,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            self.prepare()?;
            let mut state = self.state.lock().unwrap();
            Ok(*state
                .counters
                .entry(resource_id.as_str().to_string())
                .or_insert(initial))
        })
    }

    fn hold_exists<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.prepare()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .holds
                .contains_key(&hold.store_key()))
        })
    }

    fn reserve<'a>(&'a self, hold: &'a HoldKey, ttl: Duration) -> StoreFuture<'a, ReserveOutcome> {
        Box::pin(async move {
            self.prepare()?;
            let deadline = self.deadline(whole_second_ttl(ttl));
            let key = hold.store_key();
            let mut state = self.state.lock().unwrap();

            if state.holds.contains_key(&key) {
                return Ok(ReserveOutcome::DuplicateHold);
            }
            let Some(counter) = state.counters.get_mut(hold.resource_id.as_str()) else {
                return Ok(ReserveOutcome::CounterMissing);
            };
            let requested = hold.quantity.get();
            if requested > *counter {
                return Ok(ReserveOutcome::InsufficientStock {
                    available: *counter,
                });
            }

            *counter -= requested;
            let remaining = *counter;
            state.holds.insert(key, (hold.clone(), deadline));
            Ok(ReserveOutcome::Reserved { remaining })
        })
    }

    fn release<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.prepare()?;
            Ok(self
                .state
                .lock()
                .unwrap()
                .holds
                .remove(&hold.store_key())
                .is_some())
        })
    }

    fn credit_expired<'a>(
        &'a self,
        hold: &'a HoldKey,
        claim_window: Duration,
    ) -> StoreFuture<'a, CreditOutcome> {
        Box::pin(async move {
            self.prepare()?;
            if let Some(error) = self.faults.lock().unwrap().credit.clone() {
                return Err(error);
            }
            let claim_until = self.deadline(claim_window);
            let mut state = self.state.lock().unwrap();

            let claim_key = hold.claim_key();
            if state.claims.contains_key(&claim_key) {
                return Ok(CreditOutcome::AlreadyCredited);
            }
            state.claims.insert(claim_key, claim_until);

            // INCRBY on a missing key starts from zero.
            let counter = state
                .counters
                .entry(hold.resource_id.as_str().to_string())
                .or_insert(0);
            *counter = counter.saturating_add(hold.quantity.get());
            Ok(CreditOutcome::Credited { stock: *counter })
        })
    }

    fn active_hold<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, Option<ActiveHold>> {
        Box::pin(async move {
            self.prepare()?;
            let now = self.clock.now();
            let state = self.state.lock().unwrap();
            Ok(state
                .holds
                .get(&hold.store_key())
                .map(|(hold, deadline)| ActiveHold {
                    hold: hold.clone(),
                    remaining: (*deadline - now).to_std().ok(),
                }))
        })
    }

    fn active_holds<'a>(&'a self, resource_id: &'a ResourceId) -> StoreFuture<'a, Vec<HoldKey>> {
        Box::pin(async move {
            self.prepare()?;
            let state = self.state.lock().unwrap();
            let mut holds: Vec<HoldKey> = state
                .holds
                .values()
                .filter(|(hold, _)| hold.resource_id == *resource_id)
                .map(|(hold, _)| hold.clone())
                .collect();
            holds.sort_by_key(HoldKey::store_key);
            Ok(holds)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.prepare() })
    }
}

impl ExpirationFeed for InMemoryStockStore {
    fn enable_notifications(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(()) })
    }

    fn subscribe(&self) -> StoreFuture<'_, ExpirationStream> {
        Box::pin(async move {
            {
                let mut faults = self.faults.lock().unwrap();
                if faults.subscribe_failures > 0 {
                    faults.subscribe_failures -= 1;
                    return Err(StoreError::SubscriptionFailed(
                        "injected subscribe failure".to_string(),
                    ));
                }
            }

            let mut receiver = self.events.lock().unwrap().subscribe();
            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield Ok(event),
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as ExpirationStream)
        })
    }
}
