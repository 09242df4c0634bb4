//! Integration tests for the Redis store and expiration feed using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. Each test starts its own Redis container.
//! Run with: `cargo test -p stockhold-redis -- --ignored`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code uses expect for clear failure messages

use std::sync::Arc;
use std::time::Duration;
use stockhold_core::expiry::ExpirationFeed;
use stockhold_core::store::{CreditOutcome, ReserveOutcome, StockStore};
use stockhold_core::{HoldKey, ResourceId};
use stockhold_redis::{RedisExpirationFeed, RedisStockStore};
use stockhold_runtime::{ExpiryReconciler, RetryPolicy};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};
use tokio::sync::broadcast;

/// Start a Redis container and return a client pointing at it.
///
/// Returns the container too, to keep it alive for the test's duration.
async fn setup_redis() -> (ContainerAsync<Redis>, redis::Client) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");

    let client = redis::Client::open(format!("redis://127.0.0.1:{port}")).expect("valid URL");
    (container, client)
}

fn hold(quantity: i64, holder: &str) -> HoldKey {
    HoldKey::from_parts("E1", quantity, holder).unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reserve_confirm_round_trip() {
    let (_container, client) = setup_redis().await;
    let store = RedisStockStore::connect(client).await.expect("connect");
    let e1 = ResourceId::new("E1").unwrap();
    let ttl = Duration::from_secs(300);

    store.ping().await.unwrap();
    assert_eq!(store.stock(&e1).await.unwrap(), None);
    assert_eq!(
        store.reserve(&hold(3, "U1"), ttl).await.unwrap(),
        ReserveOutcome::CounterMissing
    );

    assert_eq!(store.initialize_stock(&e1, 10).await.unwrap(), 10);
    assert_eq!(store.initialize_stock(&e1, 50).await.unwrap(), 10);

    assert_eq!(
        store.reserve(&hold(3, "U1"), ttl).await.unwrap(),
        ReserveOutcome::Reserved { remaining: 7 }
    );
    assert_eq!(
        store.reserve(&hold(3, "U1"), ttl).await.unwrap(),
        ReserveOutcome::DuplicateHold
    );
    assert_eq!(
        store.reserve(&hold(8, "U2"), ttl).await.unwrap(),
        ReserveOutcome::InsufficientStock { available: 7 }
    );

    let active = store.active_hold(&hold(3, "U1")).await.unwrap().unwrap();
    let remaining = active.remaining.unwrap();
    assert!(remaining <= ttl && remaining > Duration::from_secs(290));
    assert_eq!(store.active_holds(&e1).await.unwrap(), vec![hold(3, "U1")]);

    assert!(store.release(&hold(3, "U1")).await.unwrap());
    assert!(!store.release(&hold(3, "U1")).await.unwrap());
    assert_eq!(store.stock(&e1).await.unwrap(), Some(7));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_reserves_never_oversell() {
    let (_container, client) = setup_redis().await;
    let store = RedisStockStore::connect(client).await.expect("connect");
    let e1 = ResourceId::new("E1").unwrap();
    store.initialize_stock(&e1, 10).await.unwrap();

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .reserve(&hold(1, &format!("U{i}")), Duration::from_secs(60))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), ReserveOutcome::Reserved { .. }) {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(store.stock(&e1).await.unwrap(), Some(0));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn expiration_is_credited_at_most_once() {
    let (_container, client) = setup_redis().await;
    let store = RedisStockStore::connect(client).await.expect("connect");
    let e1 = ResourceId::new("E1").unwrap();
    let window = Duration::from_millis(300);
    store.initialize_stock(&e1, 7).await.unwrap();

    assert_eq!(
        store.credit_expired(&hold(3, "U1"), window).await.unwrap(),
        CreditOutcome::Credited { stock: 10 }
    );
    assert_eq!(
        store.credit_expired(&hold(3, "U1"), window).await.unwrap(),
        CreditOutcome::AlreadyCredited
    );
    assert_eq!(store.stock(&e1).await.unwrap(), Some(10));

    // Once the claim lapses, a later expiration of the same key counts again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        store.credit_expired(&hold(3, "U1"), window).await.unwrap(),
        CreditOutcome::Credited { stock: 13 }
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn two_reconcilers_credit_an_expiration_once() {
    let (_container, client) = setup_redis().await;
    let store = Arc::new(RedisStockStore::connect(client.clone()).await.expect("connect"));
    let e1 = ResourceId::new("E1").unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let reconcilers: Vec<_> = ["replica-a", "replica-b"]
        .into_iter()
        .map(|name| {
            ExpiryReconciler::new(
                Arc::new(RedisExpirationFeed::new(client.clone())),
                store.clone(),
                shutdown_tx.subscribe(),
            )
            .with_name(name)
            .with_claim_window(Duration::from_secs(1))
            .spawn()
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(500)).await;

    store.initialize_stock(&e1, 10).await.unwrap();
    store
        .reserve(&hold(3, "U1"), Duration::from_secs(1))
        .await
        .unwrap();

    let mut credited = false;
    for _ in 0..100 {
        if store.stock(&e1).await.unwrap() == Some(10) {
            credited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(credited, "expired hold was not credited back");

    // Let the slower replica catch up, then check it did not credit again.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.stock(&e1).await.unwrap(), Some(10));

    shutdown_tx.send(()).unwrap();
    for reconciler in reconcilers {
        reconciler.await.unwrap();
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn expired_hold_is_credited_by_reconciler() {
    let (_container, client) = setup_redis().await;
    let store = Arc::new(RedisStockStore::connect(client.clone()).await.expect("connect"));
    let feed = Arc::new(RedisExpirationFeed::new(client));
    let e1 = ResourceId::new("E1").unwrap();

    feed.enable_notifications().await.unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = ExpiryReconciler::new(feed, store.clone(), shutdown_rx)
        .with_retry_policy(RetryPolicy::reconnect(
            Duration::from_millis(50),
            Duration::from_millis(200),
        ))
        .spawn();
    // Give the subscription time to be established.
    tokio::time::sleep(Duration::from_millis(500)).await;

    store.initialize_stock(&e1, 10).await.unwrap();
    store
        .reserve(&hold(4, "U1"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(store.stock(&e1).await.unwrap(), Some(6));

    let mut credited = false;
    for _ in 0..100 {
        if store.stock(&e1).await.unwrap() == Some(10) {
            credited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(credited, "expired hold was not credited back");
    assert!(!store.hold_exists(&hold(4, "U1")).await.unwrap());

    shutdown_tx.send(()).unwrap();
    reconciler.await.unwrap();
}
