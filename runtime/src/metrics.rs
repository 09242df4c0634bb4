//! Prometheus metrics for the reservation service.
//!
//! - Reserve / confirm outcomes and latency
//! - Catalog fetches
//! - Expiry reconciliation
//! - Startup retries
//!
//! # Example
//!
//! ```rust,no_run
//! use stockhold_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut metrics = MetricsServer::new();
//! metrics.start()?;
//!
//! // Serve `metrics.render()` from an HTTP route.
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use stockhold_core::ErrorKind;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the global recorder
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders the scrape payload.
///
/// The payload is served by the web layer, so no listener is bound here.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed. A
    /// recorder that is already installed (common in tests) is tolerated
    /// and leaves [`handle`](Self::handle) as `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already installed, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// The exporter handle, if this instance installed it.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "reservations_total",
        "Reserve requests by outcome (reserved, or the rejection kind)"
    );
    describe_histogram!(
        "reservation_duration_seconds",
        "Time taken to handle a reserve request"
    );
    describe_counter!(
        "confirmations_total",
        "Confirm requests by outcome (confirmed, rejected, error)"
    );

    describe_counter!(
        "catalog_fetches_total",
        "Catalog stock lookups by outcome (ok, error)"
    );
    describe_histogram!(
        "catalog_fetch_duration_seconds",
        "Time taken by a catalog stock lookup"
    );

    describe_counter!(
        "expirations_reconciled_total",
        "Expired holds whose quantity was credited back"
    );
    describe_counter!(
        "expired_units_credited_total",
        "Units returned to stock counters by expired holds"
    );
    describe_counter!(
        "expirations_ignored_total",
        "Expiration notifications for keys that are not holds"
    );
    describe_counter!(
        "expirations_already_credited_total",
        "Expiration notifications another process had already credited"
    );
    describe_counter!(
        "expirations_failed_total",
        "Expired holds whose credit failed (quantity lost until repaired)"
    );
    describe_counter!(
        "reconciler_resubscriptions_total",
        "Times the reconciler re-established its notification subscription"
    );

    describe_counter!("retry_attempts_total", "Retries scheduled after a failure");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that ran out of retries");
}

/// Reserve / confirm metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a successful reserve.
    pub fn record_reserved(duration: Duration) {
        counter!("reservations_total", "outcome" => "reserved").increment(1);
        histogram!("reservation_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a rejected reserve.
    pub fn record_rejected(kind: ErrorKind, duration: Duration) {
        counter!("reservations_total", "outcome" => kind.as_str()).increment(1);
        histogram!("reservation_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a confirm attempt, labelled by [`confirm_outcome`].
    pub fn record_confirm(outcome: &'static str) {
        counter!("confirmations_total", "outcome" => outcome).increment(1);
    }
}

/// Label of a confirm attempt given the result of deleting the hold.
///
/// A store failure is an `error`, not a `rejected` confirm: the hold may
/// well still exist.
#[must_use]
pub const fn confirm_outcome<E>(released: &Result<bool, E>) -> &'static str {
    match released {
        Ok(true) => "confirmed",
        Ok(false) => "rejected",
        Err(_) => "error",
    }
}

/// Catalog metrics recorder.
pub struct CatalogMetrics;

impl CatalogMetrics {
    /// Record a catalog lookup.
    pub fn record_fetch(ok: bool, duration: Duration) {
        let outcome = if ok { "ok" } else { "error" };
        counter!("catalog_fetches_total", "outcome" => outcome).increment(1);
        histogram!("catalog_fetch_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Expiry reconciler metrics recorder.
pub struct ReconcilerMetrics;

impl ReconcilerMetrics {
    /// Record a credited expiration of `quantity` units.
    pub fn record_reconciled(quantity: u64) {
        counter!("expirations_reconciled_total").increment(1);
        counter!("expired_units_credited_total").increment(quantity);
    }

    /// Record a notification for a non-hold key.
    pub fn record_ignored() {
        counter!("expirations_ignored_total").increment(1);
    }

    /// Record an expiration another process already credited.
    pub fn record_already_credited() {
        counter!("expirations_already_credited_total").increment(1);
    }

    /// Record a failed credit.
    pub fn record_failed() {
        counter!("expirations_failed_total").increment(1);
    }

    /// Record a resubscription.
    pub fn record_resubscribe() {
        counter!("reconciler_resubscriptions_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a scheduled retry.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record success after at least one retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
