//! Reservation service process.
//!
//! Wires the Redis store, the HTTP catalog gateway, the coordinator, the
//! expiry reconciler and the HTTP API together, and manages their
//! lifecycle.

pub mod app;
pub mod config;

pub use app::run;
pub use config::Config;
