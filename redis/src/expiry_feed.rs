//! Expiration notifications via Redis keyspace events.
//!
//! Redis publishes `__keyevent@{db}__:expired` with the key name as payload
//! when a key's TTL elapses, provided `notify-keyspace-events` contains the
//! `E` (keyevent) class and the `x` (expired) type. Pub/sub delivery is
//! fire-and-forget: nothing is replayed for a subscriber that was away.

use crate::error::store_error;
use futures::StreamExt;
use redis::Client;
use stockhold_core::expiry::{ExpirationEvent, ExpirationFeed, ExpirationStream};
use stockhold_core::store::{StoreError, StoreFuture};

const NOTIFY_CONFIG: &str = "notify-keyspace-events";

/// [`ExpirationFeed`] over Redis keyspace notifications.
///
/// Each [`subscribe`](ExpirationFeed::subscribe) opens a dedicated pub/sub
/// connection; the returned stream ends when that connection drops.
#[derive(Clone)]
pub struct RedisExpirationFeed {
    client: Client,
    channel: String,
}

impl RedisExpirationFeed {
    /// Create a feed for the database selected by the client's URL.
    #[must_use]
    pub fn new(client: Client) -> Self {
        let db = client.get_connection_info().redis.db;
        Self {
            client,
            channel: expired_channel(db),
        }
    }

    /// The pub/sub channel this feed listens on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Channel carrying expirations of database `db`.
#[must_use]
pub fn expired_channel(db: i64) -> String {
    format!("__keyevent@{db}__:expired")
}

/// Merge the flags required for expiration events into an existing
/// `notify-keyspace-events` value.
///
/// Returns `None` when `current` already enables them. Existing flags are
/// preserved so other consumers of keyspace events keep working.
#[must_use]
pub fn merge_notify_flags(current: &str) -> Option<String> {
    let has_keyevent = current.contains('E');
    // `A` is an alias that includes `x`.
    let has_expired = current.contains('x') || current.contains('A');
    if has_keyevent && has_expired {
        return None;
    }

    let mut merged = current.to_string();
    if !has_keyevent {
        merged.push('E');
    }
    if !has_expired {
        merged.push('x');
    }
    Some(merged)
}

impl ExpirationFeed for RedisExpirationFeed {
    fn enable_notifications(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(store_error("connect for CONFIG"))?;

            let reply: Vec<String> = redis::cmd("CONFIG")
                .arg("GET")
                .arg(NOTIFY_CONFIG)
                .query_async(&mut conn)
                .await
                .map_err(store_error("CONFIG GET"))?;
            let current = reply.get(1).map_or("", String::as_str);

            let Some(merged) = merge_notify_flags(current) else {
                tracing::debug!(flags = current, "Expiration notifications already enabled");
                return Ok(());
            };

            let () = redis::cmd("CONFIG")
                .arg("SET")
                .arg(NOTIFY_CONFIG)
                .arg(&merged)
                .query_async(&mut conn)
                .await
                .map_err(store_error("CONFIG SET"))?;

            tracing::info!(previous = current, flags = %merged, "Enabled Redis expiration notifications");
            Ok(())
        })
    }

    fn subscribe(&self) -> StoreFuture<'_, ExpirationStream> {
        Box::pin(async move {
            let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
                StoreError::SubscriptionFailed(format!("Failed to open pub/sub connection: {e}"))
            })?;
            pubsub.subscribe(&self.channel).await.map_err(|e| {
                StoreError::SubscriptionFailed(format!("SUBSCRIBE {}: {e}", self.channel))
            })?;

            tracing::debug!(channel = %self.channel, "Subscribed to expiration channel");

            let channel = self.channel.clone();
            let stream = pubsub.into_on_message().map(move |msg| {
                msg.get_payload::<String>()
                    .map(ExpirationEvent::new)
                    .map_err(|e| StoreError::MalformedValue {
                        key: channel.clone(),
                        reason: format!("undecodable expiration payload: {e}"),
                    })
            });
            Ok(Box::pin(stream) as ExpirationStream)
        })
    }
}

impl std::fmt::Debug for RedisExpirationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisExpirationFeed")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
