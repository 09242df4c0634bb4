//! Redis-backed stock counters and holds.
//!
//! # Key Layout
//!
//! - `stock:{resource}` → integer counter
//! - `hold:{resource}:{quantity}:{holder}` → quantity, with `EX` = hold TTL
//! - `reconciled:hold:{resource}:{quantity}:{holder}` → credit claim of an
//!   expired hold, with `PX` = claim window
//!
//! # Atomicity
//!
//! Reserve runs as a single Lua script, so the existence check, the stock
//! check, the decrement and the hold creation cannot interleave with another
//! client. Initialization is `SET NX`; confirm is `DEL`. Crediting an expired
//! hold is a second script: `SET NX` of the claim key, then `INCRBY` only if
//! the claim was new. Every process hears every expiration, and only the
//! first to run the script credits it.

use crate::error::{counter_from_reply, parse_counter, store_error};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use stockhold_core::store::{
    CreditOutcome, ReserveOutcome, StockStore, StoreError, StoreFuture, whole_second_ttl,
};
use stockhold_core::{ActiveHold, HoldKey, ResourceId};

/// Reply codes of [`RESERVE_SCRIPT`].
const RESERVED: i64 = 0;
const DUPLICATE_HOLD: i64 = 1;
const COUNTER_MISSING: i64 = 2;
const INSUFFICIENT_STOCK: i64 = 3;

/// `KEYS[1]` hold key, `KEYS[2]` stock key, `ARGV[1]` quantity,
/// `ARGV[2]` TTL in seconds. Replies `{code, value}`.
const RESERVE_SCRIPT: &str = r"
local hold_key = KEYS[1]
local stock_key = KEYS[2]
local quantity = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

if redis.call('EXISTS', hold_key) == 1 then
    return {1, 0}
end

local raw = redis.call('GET', stock_key)
if not raw then
    return {2, 0}
end

local stock = tonumber(raw)
if stock == nil then
    return redis.error_reply('stock counter at ' .. stock_key .. ' is not a number')
end
if stock < quantity then
    return {3, stock}
end

local remaining = redis.call('DECRBY', stock_key, quantity)
redis.call('SET', hold_key, quantity, 'EX', ttl)
return {0, remaining}
";

/// `KEYS[1]` claim key, `KEYS[2]` stock key, `ARGV[1]` quantity,
/// `ARGV[2]` claim window in milliseconds. Replies `{claimed, stock}`.
const CREDIT_SCRIPT: &str = r"
local claim_key = KEYS[1]
local stock_key = KEYS[2]
local quantity = tonumber(ARGV[1])
local window = tonumber(ARGV[2])

if not redis.call('SET', claim_key, '1', 'NX', 'PX', window) then
    return {0, 0}
end

return {1, redis.call('INCRBY', stock_key, quantity)}
";

/// Reply flags of [`CREDIT_SCRIPT`].
const ALREADY_CREDITED: i64 = 0;
const CREDITED: i64 = 1;

const SCAN_BATCH: usize = 100;

/// [`StockStore`] over a shared Redis instance.
///
/// Cloning is cheap: clones share the connection manager, which reconnects
/// on its own after a dropped connection.
#[derive(Clone)]
pub struct RedisStockStore {
    conn_manager: ConnectionManager,
    reserve_script: Script,
    credit_script: Script,
}

impl RedisStockStore {
    /// Connect using an existing client.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if Redis cannot be reached.
    pub async fn connect(client: Client) -> Result<Self, StoreError> {
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self::from_manager(conn_manager))
    }

    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the URL is invalid or Redis cannot be
    /// reached.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;
        Self::connect(client).await
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            reserve_script: Script::new(RESERVE_SCRIPT),
            credit_script: Script::new(CREDIT_SCRIPT),
        }
    }

    fn ttl_seconds(ttl: Duration) -> u64 {
        whole_second_ttl(ttl).as_secs()
    }

    fn window_millis(window: Duration) -> u64 {
        // `PX 0` is rejected by Redis.
        u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

impl StockStore for RedisStockStore {
    fn stock<'a>(&'a self, resource_id: &'a ResourceId) -> StoreFuture<'a, Option<u64>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = resource_id.stock_key();

            let raw: Option<String> = conn.get(&key).await.map_err(store_error("GET stock"))?;
            raw.map(|raw| parse_counter(&key, &raw)).transpose()
        })
    }

    fn initialize_stock<'a>(
        &'a self,
        resource_id: &'a ResourceId,
        initial: u64,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = resource_id.stock_key();

            let (raw,): (String,) = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&key)
                .arg(initial)
                .arg("NX")
                .ignore()
                .get(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_error("SET NX stock"))?;

            let current = parse_counter(&key, &raw)?;
            tracing::debug!(
                resource_id = %resource_id,
                initial,
                current,
                created = current == initial,
                "Stock counter initialized in Redis"
            );
            Ok(current)
        })
    }

    fn hold_exists<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let exists: bool = conn
                .exists(hold.store_key())
                .await
                .map_err(store_error("EXISTS hold"))?;
            Ok(exists)
        })
    }

    fn reserve<'a>(&'a self, hold: &'a HoldKey, ttl: Duration) -> StoreFuture<'a, ReserveOutcome> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let stock_key = hold.resource_id.stock_key();

            let reply: Vec<i64> = self
                .reserve_script
                .key(hold.store_key())
                .key(&stock_key)
                .arg(hold.quantity.get())
                .arg(Self::ttl_seconds(ttl))
                .invoke_async(&mut conn)
                .await
                .map_err(store_error("reserve script"))?;

            match reply.as_slice() {
                [RESERVED, remaining] => Ok(ReserveOutcome::Reserved {
                    remaining: counter_from_reply(&stock_key, *remaining)?,
                }),
                [DUPLICATE_HOLD, _] => Ok(ReserveOutcome::DuplicateHold),
                [COUNTER_MISSING, _] => Ok(ReserveOutcome::CounterMissing),
                [INSUFFICIENT_STOCK, available] => Ok(ReserveOutcome::InsufficientStock {
                    available: counter_from_reply(&stock_key, *available)?,
                }),
                other => Err(StoreError::CommandFailed(format!(
                    "reserve script: unexpected reply {other:?}"
                ))),
            }
        })
    }

    fn release<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = conn
                .del(hold.store_key())
                .await
                .map_err(store_error("DEL hold"))?;
            Ok(deleted > 0)
        })
    }

    fn credit_expired<'a>(
        &'a self,
        hold: &'a HoldKey,
        claim_window: Duration,
    ) -> StoreFuture<'a, CreditOutcome> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let stock_key = hold.resource_id.stock_key();

            let reply: Vec<i64> = self
                .credit_script
                .key(hold.claim_key())
                .key(&stock_key)
                .arg(hold.quantity.get())
                .arg(Self::window_millis(claim_window))
                .invoke_async(&mut conn)
                .await
                .map_err(store_error("credit script"))?;

            match reply.as_slice() {
                [CREDITED, stock] => Ok(CreditOutcome::Credited {
                    stock: counter_from_reply(&stock_key, *stock)?,
                }),
                [ALREADY_CREDITED, _] => Ok(CreditOutcome::AlreadyCredited),
                other => Err(StoreError::CommandFailed(format!(
                    "credit script: unexpected reply {other:?}"
                ))),
            }
        })
    }

    fn active_hold<'a>(&'a self, hold: &'a HoldKey) -> StoreFuture<'a, Option<ActiveHold>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let millis: i64 = conn
                .pttl(hold.store_key())
                .await
                .map_err(store_error("PTTL hold"))?;

            // -2: no such key, -1: key without expiry.
            Ok(match millis {
                -2 => None,
                -1 => Some(ActiveHold {
                    hold: hold.clone(),
                    remaining: None,
                }),
                millis => Some(ActiveHold {
                    hold: hold.clone(),
                    remaining: u64::try_from(millis).ok().map(Duration::from_millis),
                }),
            })
        })
    }

    fn active_holds<'a>(&'a self, resource_id: &'a ResourceId) -> StoreFuture<'a, Vec<HoldKey>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let pattern = resource_id.hold_pattern();
            let mut cursor: u64 = 0;
            let mut holds = Vec::new();

            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await
                    .map_err(store_error("SCAN holds"))?;

                // MATCH is a glob, so a resource id containing `*` or `?`
                // could match other resources' holds.
                holds.extend(
                    keys.iter()
                        .filter_map(|key| HoldKey::parse(key))
                        .filter(|hold| hold.resource_id == *resource_id),
                );

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            holds.sort_by_key(HoldKey::store_key);
            holds.dedup();
            Ok(holds)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(store_error("PING"))?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for RedisStockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStockStore").finish_non_exhaustive()
    }
}
