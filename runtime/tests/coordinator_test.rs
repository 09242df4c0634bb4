//! Integration tests for the reservation coordinator.
//!
//! Runs the coordinator against the in-memory store and catalog doubles,
//! including the full reserve → confirm → expire walkthrough.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::time::Duration;
use stockhold_core::catalog::CatalogError;
use stockhold_core::environment::Clock;
use stockhold_core::store::StockStore;
use stockhold_core::{ErrorKind, HoldKey, ReservationError, ResourceId};
use stockhold_runtime::{CoordinatorConfig, ExpiryReconciler, ReservationCoordinator, RetryPolicy};
use stockhold_testing::{InMemoryStockStore, MockCatalogGateway};
use tokio::sync::broadcast;

// ============================================================================
// Test Fixtures
// ============================================================================

fn coordinator_with(
    store: &InMemoryStockStore,
    catalog: &MockCatalogGateway,
    config: CoordinatorConfig,
) -> ReservationCoordinator {
    ReservationCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(catalog.clone()),
        Arc::new(store.clock().clone()),
        config,
    )
}

fn setup(catalog: MockCatalogGateway) -> (ReservationCoordinator, InMemoryStockStore, MockCatalogGateway) {
    let store = InMemoryStockStore::new();
    let coordinator = coordinator_with(&store, &catalog, CoordinatorConfig::default());
    (coordinator, store, catalog)
}

fn hold(resource: &str, quantity: i64, holder: &str) -> HoldKey {
    HoldKey::from_parts(resource, quantity, holder).unwrap()
}

fn e1() -> ResourceId {
    ResourceId::new("E1").unwrap()
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

// ============================================================================
// End-to-end walkthrough
// ============================================================================

#[tokio::test]
async fn reserve_confirm_expire_walkthrough() {
    let (coordinator, store, catalog) = setup(MockCatalogGateway::new().with_stock("E1", 10));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = ExpiryReconciler::new(Arc::new(store.clone()), Arc::new(store.clone()), shutdown_rx)
        .with_retry_policy(RetryPolicy::reconnect(Duration::from_millis(10), Duration::from_millis(50)))
        .spawn();
    wait_until(|| store.subscriber_count() == 1).await;

    // First reserve initializes the counter from the catalog.
    let first = coordinator.reserve(&hold("E1", 3, "U1")).await.unwrap();
    assert_eq!(first.remaining_stock, 7);
    assert_eq!(catalog.calls(), 1);

    // Same triple again is a duplicate; nothing changes.
    let duplicate = coordinator.reserve(&hold("E1", 3, "U1")).await.unwrap_err();
    assert!(matches!(duplicate, ReservationError::DuplicateHold { ref key } if key == "hold:E1:3:U1"));
    assert_eq!(store.stock(&e1()).await.unwrap(), Some(7));

    // Confirm consumes the hold, counter stays.
    coordinator.confirm(&hold("E1", 3, "U1")).await.unwrap();
    assert!(!store.hold_exists(&hold("E1", 3, "U1")).await.unwrap());
    assert_eq!(store.stock(&e1()).await.unwrap(), Some(7));

    // Second holder; the catalog is not consulted again.
    let second = coordinator.reserve(&hold("E1", 5, "U2")).await.unwrap();
    assert_eq!(second.remaining_stock, 2);
    assert_eq!(catalog.calls(), 1);

    // Let U2's hold lapse.
    store.clock().advance(Duration::from_secs(300));
    assert_eq!(store.purge_expired(), 1);
    wait_until(|| store.counter("E1") == Some(7)).await;

    // Confirming after expiry is rejected and credits nothing further.
    let late = coordinator.confirm(&hold("E1", 5, "U2")).await.unwrap_err();
    assert_eq!(late.kind(), ErrorKind::StaleReference);
    assert_eq!(store.stock(&e1()).await.unwrap(), Some(7));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), reconciler).await.unwrap().unwrap();
}

#[tokio::test]
async fn replicas_never_account_more_than_catalog_stock() {
    let store = InMemoryStockStore::new();
    let catalog = MockCatalogGateway::new().with_stock("E1", 10);
    let replica_a = coordinator_with(&store, &catalog, CoordinatorConfig::default());
    let replica_b = coordinator_with(&store, &catalog, CoordinatorConfig::default());

    let (shutdown_tx, _) = broadcast::channel(1);
    let reconcilers: Vec<_> = ["replica-a", "replica-b"]
        .into_iter()
        .map(|name| {
            ExpiryReconciler::new(Arc::new(store.clone()), Arc::new(store.clone()), shutdown_tx.subscribe())
                .with_name(name)
                .with_retry_policy(RetryPolicy::reconnect(Duration::from_millis(10), Duration::from_millis(50)))
                .spawn()
        })
        .collect();
    wait_until(|| store.subscriber_count() == 2).await;

    replica_a.reserve(&hold("E1", 3, "U1")).await.unwrap();
    replica_b.reserve(&hold("E1", 2, "U2")).await.unwrap();
    replica_b.reserve(&hold("E1", 4, "U3")).await.unwrap();
    replica_a.confirm(&hold("E1", 2, "U2")).await.unwrap();
    let sold = 2;

    let before = replica_a.snapshot(&e1()).await.unwrap();
    assert_eq!(before.accounted(), Some(10 - sold));

    store.clock().advance(Duration::from_secs(301));
    assert_eq!(store.purge_expired(), 2);
    wait_until(|| store.counter("E1") == Some(10 - sold)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = replica_b.snapshot(&e1()).await.unwrap();
    assert_eq!(after.available, Some(10 - sold));
    assert_eq!(after.held, 0);
    assert!(after.accounted().unwrap() + sold <= 10);

    shutdown_tx.send(()).unwrap();
    for reconciler in reconcilers {
        tokio::time::timeout(Duration::from_secs(5), reconciler).await.unwrap().unwrap();
    }
}

// ============================================================================
// Reserve
// ============================================================================

#[tokio::test]
async fn reservation_expiry_is_ttl_after_now() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 10));

    let reservation = coordinator.reserve(&hold("E1", 1, "U1")).await.unwrap();

    let expected = store.clock().now() + chrono::Duration::seconds(300);
    assert_eq!(reservation.expires_at, expected);

    let active = coordinator.hold_status(&hold("E1", 1, "U1")).await.unwrap().unwrap();
    assert_eq!(active.remaining, Some(Duration::from_secs(300)));
}

#[tokio::test]
async fn custom_hold_ttl_is_applied() {
    let store = InMemoryStockStore::new();
    let catalog = MockCatalogGateway::new().with_stock("E1", 10);
    let config = CoordinatorConfig {
        hold_ttl: Duration::from_secs(30),
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator_with(&store, &catalog, config);

    coordinator.reserve(&hold("E1", 2, "U1")).await.unwrap();
    store.clock().advance(Duration::from_secs(29));
    assert!(store.hold_exists(&hold("E1", 2, "U1")).await.unwrap());
    store.clock().advance(Duration::from_secs(1));
    assert!(!store.hold_exists(&hold("E1", 2, "U1")).await.unwrap());
}

#[tokio::test]
async fn fractional_hold_ttl_reports_the_deadline_the_store_applies() {
    let store = InMemoryStockStore::new();
    let catalog = MockCatalogGateway::new().with_stock("E1", 10);
    let config = CoordinatorConfig {
        hold_ttl: Duration::from_millis(1500),
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator_with(&store, &catalog, config);
    let started = store.clock().now();

    let reservation = coordinator.reserve(&hold("E1", 2, "U1")).await.unwrap();

    assert_eq!(reservation.expires_at, started + chrono::Duration::seconds(2));
    store.clock().advance(Duration::from_millis(1999));
    assert!(store.hold_exists(&hold("E1", 2, "U1")).await.unwrap());
    store.clock().advance(Duration::from_millis(1));
    assert!(!store.hold_exists(&hold("E1", 2, "U1")).await.unwrap());
}

#[tokio::test]
async fn insufficient_stock_leaves_state_untouched() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 2));

    let err = coordinator.reserve(&hold("E1", 3, "U1")).await.unwrap_err();

    assert_eq!(
        err,
        ReservationError::InsufficientStock {
            requested: 3,
            available: 2
        }
    );
    assert_eq!(store.stock(&e1()).await.unwrap(), Some(2));
    assert_eq!(store.hold_count(), 0);
}

#[tokio::test]
async fn exact_remaining_stock_can_be_reserved() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 4));

    let reservation = coordinator.reserve(&hold("E1", 4, "U1")).await.unwrap();

    assert_eq!(reservation.remaining_stock, 0);
    let err = coordinator.reserve(&hold("E1", 1, "U2")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);
    assert_eq!(store.stock(&e1()).await.unwrap(), Some(0));
}

#[tokio::test]
async fn existing_counter_is_used_without_catalog() {
    let (coordinator, store, catalog) = setup(MockCatalogGateway::new().with_stock("E1", 10));
    store.set_stock("E1", 4);

    let reservation = coordinator.reserve(&hold("E1", 1, "U1")).await.unwrap();

    assert_eq!(reservation.remaining_stock, 3);
    assert_eq!(catalog.calls(), 0);
}

#[tokio::test]
async fn same_holder_different_quantity_is_a_distinct_hold() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 10));

    coordinator.reserve(&hold("E1", 2, "U1")).await.unwrap();
    let second = coordinator.reserve(&hold("E1", 3, "U1")).await.unwrap();

    assert_eq!(second.remaining_stock, 5);
    assert_eq!(store.hold_count(), 2);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_store() {
    let (_, store, catalog) = setup(MockCatalogGateway::new().with_stock("E1", 10));

    assert_eq!(
        HoldKey::from_parts("E1", 0, "U1").unwrap_err(),
        ReservationError::InvalidQuantity(0)
    );
    assert_eq!(
        HoldKey::from_parts("E1", -2, "U1").unwrap_err(),
        ReservationError::InvalidQuantity(-2)
    );
    assert_eq!(
        HoldKey::from_parts("", 1, "U1").unwrap_err().kind(),
        ErrorKind::Validation
    );

    assert_eq!(catalog.calls(), 0);
    assert_eq!(store.stock(&e1()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_never_oversell() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 10));

    let tasks: Vec<_> = (0..25)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.reserve(&hold("E1", 1, &format!("U{i}"))).await })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => reserved += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::Capacity),
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(store.stock(&e1()).await.unwrap(), Some(0));
    assert_eq!(store.hold_count(), 10);
}

// ============================================================================
// Catalog failures
// ============================================================================

#[tokio::test]
async fn unknown_resource_is_not_found_and_creates_no_counter() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new());

    let err = coordinator.reserve(&hold("E404", 1, "U1")).await.unwrap_err();

    assert_eq!(err, ReservationError::ResourceNotFound("E404".to_string()));
    let e404 = ResourceId::new("E404").unwrap();
    assert_eq!(store.stock(&e404).await.unwrap(), None);
}

#[tokio::test]
async fn catalog_failure_is_unavailable() {
    let (coordinator, store, _) = setup(
        MockCatalogGateway::new().with_failure("E1", CatalogError::Unavailable("HTTP 500".to_string())),
    );

    let err = coordinator.reserve(&hold("E1", 1, "U1")).await.unwrap_err();

    assert!(matches!(err, ReservationError::CatalogUnavailable(_)));
    assert!(!err.is_user_error());
    assert_eq!(store.stock(&e1()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn slow_catalog_times_out() {
    let store = InMemoryStockStore::new();
    let catalog = MockCatalogGateway::new()
        .with_stock("E1", 10)
        .with_delay(Duration::from_secs(60));
    let config = CoordinatorConfig {
        catalog_timeout: Duration::from_millis(200),
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator_with(&store, &catalog, config);

    let err = coordinator.reserve(&hold("E1", 1, "U1")).await.unwrap_err();

    assert_eq!(
        err,
        ReservationError::CatalogUnavailable(CatalogError::Timeout.to_string())
    );
    assert_eq!(store.stock(&e1()).await.unwrap(), None);
}

// ============================================================================
// Confirm, status, snapshot
// ============================================================================

#[tokio::test]
async fn confirm_unknown_hold_is_rejected() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 10));
    coordinator.reserve(&hold("E1", 3, "U1")).await.unwrap();

    // Quantity is part of the identity.
    let err = coordinator.confirm(&hold("E1", 2, "U1")).await.unwrap_err();

    assert_eq!(
        err,
        ReservationError::HoldExpiredOrUnknown {
            key: "hold:E1:2:U1".to_string()
        }
    );
    assert!(store.hold_exists(&hold("E1", 3, "U1")).await.unwrap());
}

#[tokio::test]
async fn hold_status_of_missing_hold_is_none() {
    let (coordinator, _, _) = setup(MockCatalogGateway::new());
    assert!(coordinator.hold_status(&hold("E1", 1, "U1")).await.unwrap().is_none());
}

#[tokio::test]
async fn snapshot_accounts_for_active_holds() {
    let (coordinator, _, catalog) = setup(MockCatalogGateway::new().with_stock("E1", 10));

    let empty = coordinator.snapshot(&e1()).await.unwrap();
    assert_eq!(empty.available, None);
    assert_eq!(catalog.calls(), 0);

    coordinator.reserve(&hold("E1", 3, "U1")).await.unwrap();
    coordinator.reserve(&hold("E1", 2, "U2")).await.unwrap();
    coordinator.confirm(&hold("E1", 2, "U2")).await.unwrap();

    let snapshot = coordinator.snapshot(&e1()).await.unwrap();
    assert_eq!(snapshot.available, Some(5));
    assert_eq!(snapshot.held, 3);
    assert_eq!(snapshot.active_holds, 1);
    assert_eq!(snapshot.accounted(), Some(8));
}

#[tokio::test]
async fn store_outage_is_an_internal_error() {
    let (coordinator, store, _) = setup(MockCatalogGateway::new().with_stock("E1", 10));
    store.set_unavailable(true);

    let reserve = coordinator.reserve(&hold("E1", 1, "U1")).await.unwrap_err();
    let confirm = coordinator.confirm(&hold("E1", 1, "U1")).await.unwrap_err();

    assert_eq!(reserve.kind(), ErrorKind::Internal);
    assert_eq!(confirm.kind(), ErrorKind::Internal);
}
