//! Integration tests for the expiry reconciler.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::time::Duration;
use stockhold_core::expiry::ExpirationEvent;
use stockhold_core::store::{StockStore, StoreError};
use stockhold_core::HoldKey;
use stockhold_runtime::{ExpiryReconciler, Reconciliation, RetryPolicy, reconcile_expiration};
use stockhold_testing::InMemoryStockStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ============================================================================
// Test Fixtures
// ============================================================================

const WINDOW: Duration = Duration::from_secs(150);

fn reconciler(
    store: &InMemoryStockStore,
    name: &str,
    shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    ExpiryReconciler::new(Arc::new(store.clone()), Arc::new(store.clone()), shutdown_rx)
        .with_name(name)
        .with_retry_policy(RetryPolicy::reconnect(
            Duration::from_millis(10),
            Duration::from_millis(40),
        ))
        .with_claim_window(WINDOW)
        .spawn()
}

fn spawn_reconciler(store: &InMemoryStockStore) -> (broadcast::Sender<()>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = reconciler(store, "test-reconciler", shutdown_rx);
    (shutdown_tx, handle)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5 seconds");
}

async fn stop(shutdown_tx: &broadcast::Sender<()>, handle: JoinHandle<()>) {
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reconciler did not stop")
        .unwrap();
}

// ============================================================================
// Single notifications
// ============================================================================

#[tokio::test]
async fn expired_hold_is_credited_back() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 2);

    let outcome = reconcile_expiration(&store, &ExpirationEvent::new("hold:E1:5:U2"), WINDOW)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Reconciliation::Credited {
            hold: HoldKey::from_parts("E1", 5, "U2").unwrap(),
            stock: 7,
        }
    );
    assert_eq!(store.counter("E1"), Some(7));
}

#[tokio::test]
async fn repeated_notification_is_credited_once() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 2);
    let event = ExpirationEvent::new("hold:E1:5:U2");

    reconcile_expiration(&store, &event, WINDOW).await.unwrap();
    let again = reconcile_expiration(&store, &event, WINDOW).await.unwrap();

    assert_eq!(
        again,
        Reconciliation::AlreadyCredited {
            hold: HoldKey::from_parts("E1", 5, "U2").unwrap(),
        }
    );
    assert_eq!(store.counter("E1"), Some(7));
}

#[tokio::test]
async fn later_expiration_of_same_key_is_credited_again() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 10);
    let hold = HoldKey::from_parts("E1", 3, "U1").unwrap();
    let ttl = Duration::from_secs(300);

    store.reserve(&hold, ttl).await.unwrap();
    store.clock().advance(ttl);
    store.purge_expired();
    reconcile_expiration(&store, &ExpirationEvent::new(&hold.store_key()), WINDOW)
        .await
        .unwrap();
    assert_eq!(store.counter("E1"), Some(10));

    // Same triple, reserved again right away: its expiry is a new event.
    store.reserve(&hold, ttl).await.unwrap();
    store.clock().advance(ttl);
    store.purge_expired();
    let outcome = reconcile_expiration(&store, &ExpirationEvent::new(&hold.store_key()), WINDOW)
        .await
        .unwrap();

    assert!(matches!(outcome, Reconciliation::Credited { stock: 10, .. }));
    assert_eq!(store.counter("E1"), Some(10));
}

#[tokio::test]
async fn foreign_and_malformed_keys_are_ignored() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 2);

    for key in [
        "session:abc",
        "stock:E1",
        "hold:E1:abc:U1",
        "hold:E1:0:U1",
        "hold:E1:3:U1:extra",
        "reconciled:hold:E1:3:U1",
    ] {
        let outcome = reconcile_expiration(&store, &ExpirationEvent::new(key), WINDOW)
            .await
            .unwrap();
        assert_eq!(outcome, Reconciliation::Ignored, "key {key}");
    }

    assert_eq!(store.counter("E1"), Some(2));
}

#[tokio::test]
async fn failed_credit_is_reported_and_not_retried() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 2);
    store.fail_credits(Some(StoreError::CommandFailed("READONLY".to_string())));

    let result = reconcile_expiration(&store, &ExpirationEvent::new("hold:E1:5:U2"), WINDOW).await;

    assert_eq!(result, Err(StoreError::CommandFailed("READONLY".to_string())));
    store.fail_credits(None);
    assert_eq!(store.counter("E1"), Some(2));
}

// ============================================================================
// Background task
// ============================================================================

#[tokio::test]
async fn reconciler_keeps_going_after_a_failed_credit() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 0);
    let (shutdown_tx, handle) = spawn_reconciler(&store);
    wait_until(|| store.subscriber_count() == 1).await;

    store.fail_credits(Some(StoreError::ConnectionFailed("reset".to_string())));
    store.publish_expiration("hold:E1:4:U1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.counter("E1"), Some(0));

    store.fail_credits(None);
    store.publish_expiration("hold:E1:1:U2");
    wait_until(|| store.counter("E1") == Some(1)).await;

    stop(&shutdown_tx, handle).await;
}

#[tokio::test]
async fn reconciler_resubscribes_after_disconnect() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 0);
    let (shutdown_tx, handle) = spawn_reconciler(&store);
    wait_until(|| store.subscriber_count() == 1).await;

    store.disconnect_subscribers();
    assert_eq!(store.subscriber_count(), 0);
    wait_until(|| store.subscriber_count() == 1).await;

    store.publish_expiration("hold:E1:3:U1");
    wait_until(|| store.counter("E1") == Some(3)).await;

    stop(&shutdown_tx, handle).await;
}

#[tokio::test]
async fn reconciler_retries_failed_subscriptions() {
    let store = InMemoryStockStore::new();
    store.fail_next_subscribes(3);
    let (shutdown_tx, handle) = spawn_reconciler(&store);

    wait_until(|| store.subscriber_count() == 1).await;

    stop(&shutdown_tx, handle).await;
}

#[tokio::test]
async fn reconciler_stops_while_backing_off() {
    let store = InMemoryStockStore::new();
    store.fail_next_subscribes(usize::MAX);
    let (shutdown_tx, handle) = spawn_reconciler(&store);
    tokio::time::sleep(Duration::from_millis(30)).await;

    stop(&shutdown_tx, handle).await;
}

#[tokio::test]
async fn reconciler_stops_when_shutdown_sender_is_dropped() {
    let store = InMemoryStockStore::new();
    let (shutdown_tx, handle) = spawn_reconciler(&store);
    wait_until(|| store.subscriber_count() == 1).await;

    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reconciler did not stop")
        .unwrap();
}

#[tokio::test]
async fn expiration_without_subscriber_is_lost() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 10);
    let hold = HoldKey::from_parts("E1", 4, "U1").unwrap();
    store.reserve(&hold, Duration::from_secs(60)).await.unwrap();

    // Nobody is listening when the hold lapses.
    store.clock().advance(Duration::from_secs(60));
    assert_eq!(store.purge_expired(), 1);

    let (shutdown_tx, handle) = spawn_reconciler(&store);
    wait_until(|| store.subscriber_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.counter("E1"), Some(6));
    stop(&shutdown_tx, handle).await;
}

// ============================================================================
// Several processes
// ============================================================================

#[tokio::test]
async fn replicas_credit_each_expiration_once() {
    let store = InMemoryStockStore::new();
    store.set_stock("E1", 10);
    let (shutdown_tx, _) = broadcast::channel(1);
    let replicas = vec![
        reconciler(&store, "replica-a", shutdown_tx.subscribe()),
        reconciler(&store, "replica-b", shutdown_tx.subscribe()),
    ];
    wait_until(|| store.subscriber_count() == 2).await;

    let hold = HoldKey::from_parts("E1", 3, "U1").unwrap();
    store.reserve(&hold, Duration::from_secs(300)).await.unwrap();
    store.clock().advance(Duration::from_secs(301));
    assert_eq!(store.purge_expired(), 1);

    wait_until(|| store.is_claimed(&hold)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.counter("E1"), Some(10));

    shutdown_tx.send(()).unwrap();
    for handle in replicas {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}
