//! Expiry reconciler: credits expired holds back to their stock counter.
//!
//! When a hold's TTL elapses the store deletes the key and publishes an
//! expiration notification carrying only the key name. The reconciler parses
//! resource and quantity out of the name and increments the counter.
//!
//! Every process runs a reconciler and every subscriber hears every
//! expiration, so the credit goes through
//! [`StockStore::credit_expired`], which claims the expiration for a short
//! window and increments only if the claim is new. Whichever replica runs
//! first credits; the rest see [`Reconciliation::AlreadyCredited`].
//!
//! # Subscribe-Process-Resubscribe Loop
//!
//! ```text
//! enable notifications (best effort)
//! loop {
//!     subscribe:
//!         loop {
//!             next expiration → parse → claim + INCRBY (no retry)
//!             shutdown?       → exit
//!         }
//!     stream ended / subscribe failed → backoff, resubscribe
//! }
//! ```
//!
//! # Delivery
//!
//! Notifications are fire-and-forget. Expirations that happen while the
//! subscription is down are not replayed, and a credit that fails is only
//! logged. Both leave the counter lower than it should be until repaired
//! out of band; [`InventorySnapshot`](stockhold_core::InventorySnapshot)
//! helps spot the drift.

use crate::metrics::ReconcilerMetrics;
use crate::coordinator::DEFAULT_HOLD_TTL;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use stockhold_core::expiry::{ExpirationFeed, ExpirationEvent, ExpirationStream};
use stockhold_core::store::{CreditOutcome, StockStore, StoreError, claim_window};
use stockhold_core::HoldKey;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Outcome of reconciling one expiration notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The hold's quantity was added back.
    Credited {
        /// The expired hold
        hold: HoldKey,
        /// Counter value after the credit
        stock: u64,
    },
    /// Another process already credited this expiration.
    AlreadyCredited {
        /// The expired hold
        hold: HoldKey,
    },
    /// The key is not a hold key.
    Ignored,
}

/// Reconcile a single expiration notification.
///
/// Non-hold keys (and malformed hold keys) are ignored. The credit is
/// attempted exactly once, and only counts if no other process claimed the
/// same expiration within `claim_window`.
///
/// # Errors
///
/// Returns the store error if the credit failed. The quantity is then lost
/// from the counter.
pub async fn reconcile_expiration(
    store: &dyn StockStore,
    event: &ExpirationEvent,
    claim_window: Duration,
) -> Result<Reconciliation, StoreError> {
    let Some(hold) = event.hold() else {
        ReconcilerMetrics::record_ignored();
        debug!(key = %event.key, "Ignoring expiration of non-hold key");
        return Ok(Reconciliation::Ignored);
    };

    match store.credit_expired(&hold, claim_window).await {
        Ok(CreditOutcome::Credited { stock }) => {
            ReconcilerMetrics::record_reconciled(hold.quantity.get());
            info!(
                resource_id = %hold.resource_id,
                holder_id = %hold.holder_id,
                quantity = hold.quantity.get(),
                stock,
                "Expired hold credited back"
            );
            Ok(Reconciliation::Credited { hold, stock })
        }
        Ok(CreditOutcome::AlreadyCredited) => {
            ReconcilerMetrics::record_already_credited();
            debug!(hold_key = %hold, "Expired hold already credited elsewhere");
            Ok(Reconciliation::AlreadyCredited { hold })
        }
        Err(e) => {
            ReconcilerMetrics::record_failed();
            error!(
                resource_id = %hold.resource_id,
                holder_id = %hold.holder_id,
                quantity = hold.quantity.get(),
                error = %e,
                "Failed to credit expired hold; quantity lost until repaired"
            );
            Err(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Background task that listens for hold expirations.
///
/// Runs until the shutdown channel fires (or its sender is dropped).
pub struct ExpiryReconciler {
    name: String,
    feed: Arc<dyn ExpirationFeed>,
    store: Arc<dyn StockStore>,
    shutdown: broadcast::Receiver<()>,
    retry_policy: RetryPolicy,
    claim_window: Duration,
}

impl ExpiryReconciler {
    /// Create a reconciler with the default resubscribe backoff
    /// (500ms doubling up to 30s) and the claim window of the default hold
    /// TTL.
    #[must_use]
    pub fn new(
        feed: Arc<dyn ExpirationFeed>,
        store: Arc<dyn StockStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: "expiry-reconciler".to_string(),
            feed,
            store,
            shutdown,
            retry_policy: RetryPolicy::reconnect(
                Duration::from_millis(500),
                Duration::from_secs(30),
            ),
            claim_window: claim_window(DEFAULT_HOLD_TTL),
        }
    }

    /// Set the name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the resubscribe backoff.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set how long a credited expiration stays claimed. Derive it from the
    /// hold TTL with [`claim_window`].
    #[must_use]
    pub fn with_claim_window(mut self, window: Duration) -> Self {
        self.claim_window = window;
        self
    }

    /// Spawn the reconciler as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(reconciler = %self.name, "Expiry reconciler started");
        let mut attempt = 0usize;

        loop {
            if let Err(e) = self.feed.enable_notifications().await {
                warn!(
                    reconciler = %self.name,
                    error = %e,
                    "Could not enable expiration notifications; relying on store configuration"
                );
            }

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(reconciler = %self.name, "Shutdown signal received");
                    break;
                }
                subscribe_result = self.feed.subscribe() => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            attempt = 0;
                            info!(reconciler = %self.name, "Subscribed to expiration notifications");
                            if self.process_stream(&mut stream).await == StreamEnd::Shutdown {
                                break;
                            }
                            ReconcilerMetrics::record_resubscribe();
                        }
                        Err(e) => {
                            error!(reconciler = %self.name, error = %e, "Failed to subscribe to expirations");
                        }
                    }
                }
            }

            let delay = self.retry_policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            warn!(
                reconciler = %self.name,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Resubscribing to expiration notifications after delay"
            );

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(reconciler = %self.name, "Shutdown signal received during backoff");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(reconciler = %self.name, "Expiry reconciler stopped");
    }

    async fn process_stream(&mut self, stream: &mut ExpirationStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(reconciler = %self.name, "Shutdown signal received while processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            // Failures are logged inside; the stream keeps going.
                            let _ = reconcile_expiration(
                                self.store.as_ref(),
                                &event,
                                self.claim_window,
                            )
                            .await;
                        }
                        Some(Err(e)) => {
                            error!(reconciler = %self.name, error = %e, "Error receiving expiration");
                        }
                        None => {
                            warn!(reconciler = %self.name, "Expiration stream ended");
                            return StreamEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ExpiryReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryReconciler")
            .field("name", &self.name)
            .field("retry_policy", &self.retry_policy)
            .field("claim_window", &self.claim_window)
            .finish_non_exhaustive()
    }
}
