//! Exponential backoff for transient store failures.
//!
//! Two callers use this module:
//!
//! - Startup: [`retry_with_backoff`] bounds how long the server waits for the
//!   shared store before giving up.
//! - The expiry reconciler: [`RetryPolicy::delay_for_attempt`] paces
//!   resubscription after the notification stream drops.
//!
//! Request-path operations are never retried here. A failed credit of an
//! expired hold is not retried either; see the reconciler docs.
//!
//! # Example
//!
//! ```rust
//! use stockhold_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(200))
//!     .build();
//!
//! let connection = retry_with_backoff("connect", policy, || async {
//!     Ok::<_, String>("connected")
//! })
//! .await?;
//! assert_eq!(connection, "connected");
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff configuration.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy builder seeded with the defaults.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Unbounded policy for long-lived subscriptions.
    ///
    /// Only [`delay_for_attempt`](Self::delay_for_attempt) is meaningful here;
    /// the caller decides when to stop.
    #[must_use]
    pub const fn reconnect(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: usize::MAX,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set the number of retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the cap on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_retries` retries fail.
///
/// `label` names the operation in logs.
///
/// # Errors
///
/// Returns the error of the final attempt once retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    label: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(operation = label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt >= policy.max_retries => {
                RetryMetrics::record_exhausted();
                tracing::error!(operation = label, attempt, error = %err, "Retries exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                RetryMetrics::record_attempt();
                tracing::warn!(
                    operation = label,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
