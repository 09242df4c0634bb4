//! Redis error translation.

use redis::RedisError;
use stockhold_core::store::StoreError;

/// Translate a Redis error raised while running `operation`.
///
/// Transport failures become `ConnectionFailed`; everything else is a
/// `CommandFailed`.
pub(crate) fn store_error(operation: &'static str) -> impl FnOnce(RedisError) -> StoreError {
    move |e| {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            StoreError::ConnectionFailed(format!("{operation}: {e}"))
        } else {
            StoreError::CommandFailed(format!("{operation}: {e}"))
        }
    }
}

/// Parse a counter value, rejecting anything but a non-negative integer.
pub(crate) fn parse_counter(key: &str, raw: &str) -> Result<u64, StoreError> {
    raw.trim().parse::<u64>().map_err(|_| StoreError::MalformedValue {
        key: key.to_string(),
        reason: format!("expected a non-negative integer, found {raw:?}"),
    })
}

/// Convert a signed Redis integer reply to a counter value.
pub(crate) fn counter_from_reply(key: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::MalformedValue {
        key: key.to_string(),
        reason: format!("negative counter {value}"),
    })
}
