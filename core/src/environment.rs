//! Injected dependencies that are not part of the store contract.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
///
/// // Test - manually advanced clock
/// let clock = ManualClock::new(start);
/// clock.advance(Duration::from_secs(301));
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
