//! Expiration notifications from the shared state store.
//!
//! When a hold's TTL elapses the store deletes it autonomously and emits an
//! [`ExpirationEvent`] carrying the expired key. The reconciler consumes the
//! [`ExpirationStream`] returned by [`ExpirationFeed::subscribe`].
//!
//! # Delivery
//!
//! - **At-most-once**: each expiring entry is reported at most once
//! - **No replay**: an event emitted while nobody is subscribed is lost
//! - **Unfiltered**: the stream may carry keys that are not holds
//!
//! # Implementations
//!
//! - `RedisExpirationFeed` (in `stockhold-redis` crate): keyspace notifications
//! - `InMemoryStockStore` (in `stockhold-testing` crate): broadcast channel

use crate::store::{StoreError, StoreFuture};
use crate::types::HoldKey;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A store entry has just expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationEvent {
    /// The expired key.
    pub key: String,
}

impl ExpirationEvent {
    /// Create an event for an expired key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The hold this event refers to, if the key is a hold key.
    #[must_use]
    pub fn hold(&self) -> Option<HoldKey> {
        HoldKey::parse(&self.key)
    }
}

/// Stream of expiration notifications.
pub type ExpirationStream =
    Pin<Box<dyn Stream<Item = Result<ExpirationEvent, StoreError>> + Send>>;

/// Source of expiration notifications.
pub trait ExpirationFeed: Send + Sync {
    /// Configure the store to emit expiration notifications.
    ///
    /// Idempotent; called once at process start, never per request.
    ///
    /// # Errors
    ///
    /// Returns error if the store rejects the configuration.
    fn enable_notifications(&self) -> StoreFuture<'_, ()>;

    /// Subscribe to expiration notifications.
    ///
    /// The stream ends when the underlying connection is lost; callers are
    /// expected to resubscribe.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionFailed` if the subscription cannot be established.
    fn subscribe(&self) -> StoreFuture<'_, ExpirationStream>;
}
