//! # Stockhold Redis
//!
//! Redis implementations of the store seams:
//!
//! - [`RedisStockStore`]: counters (`stock:{resource}`) and holds
//!   (`hold:{resource}:{quantity}:{holder}`, value = quantity, `EX` = hold TTL)
//! - [`RedisExpirationFeed`]: keyspace notifications on
//!   `__keyevent@{db}__:expired`
//!
//! # Example
//!
//! ```no_run
//! use stockhold_redis::{RedisExpirationFeed, RedisStockStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = redis::Client::open("redis://127.0.0.1:6379")?;
//! let store = RedisStockStore::connect(client.clone()).await?;
//! let feed = RedisExpirationFeed::new(client);
//! # Ok(())
//! # }
//! ```

mod error;
pub mod expiry_feed;
pub mod stock_store;

pub use expiry_feed::RedisExpirationFeed;
pub use stock_store::RedisStockStore;
