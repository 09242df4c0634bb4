//! HTTP request handlers.

pub mod health;
pub mod reservations;

pub use health::{health_check, readiness_check};
