//! Scripted catalog gateway.

#![allow(clippy::unwrap_used)] // Test infrastructure: mutex poisoning is a test bug
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stockhold_core::ResourceId;
use stockhold_core::catalog::{CatalogError, CatalogFuture, CatalogGateway};

/// Catalog double answering from a fixed table.
///
/// Unknown resources answer `NotFound`. Every call is counted, so tests can
/// assert the catalog was consulted only when the counter was missing.
///
/// # Example
///
/// ```
/// use stockhold_testing::MockCatalogGateway;
/// use stockhold_core::catalog::{CatalogError, CatalogGateway};
/// use stockhold_core::ResourceId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = MockCatalogGateway::new()
///     .with_stock("E1", 10)
///     .with_failure("E2", CatalogError::Timeout);
///
/// assert_eq!(catalog.initial_stock(&ResourceId::new("E1")?).await?, 10);
/// assert_eq!(catalog.calls(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockCatalogGateway {
    answers: Arc<Mutex<HashMap<String, Result<u64, CatalogError>>>>,
    calls: Arc<AtomicUsize>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockCatalogGateway {
    /// Create a catalog that knows no resources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `stock` for `resource_id`.
    #[must_use]
    pub fn with_stock(self, resource_id: &str, stock: u64) -> Self {
        self.set_stock(resource_id, stock);
        self
    }

    /// Answer `error` for `resource_id`.
    #[must_use]
    pub fn with_failure(self, resource_id: &str, error: CatalogError) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), Err(error));
        self
    }

    /// Sleep before every answer.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Change the answer for `resource_id` after construction.
    pub fn set_stock(&self, resource_id: &str, stock: u64) {
        self.answers
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), Ok(stock));
    }

    /// Number of `initial_stock` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CatalogGateway for MockCatalogGateway {
    fn initial_stock<'a>(&'a self, resource_id: &'a ResourceId) -> CatalogFuture<'a, u64> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.answers
                .lock()
                .unwrap()
                .get(resource_id.as_str())
                .cloned()
                .unwrap_or_else(|| Err(CatalogError::NotFound(resource_id.to_string())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let catalog = MockCatalogGateway::new();
        let missing = ResourceId::new("E404").unwrap();
        assert_eq!(
            catalog.initial_stock(&missing).await,
            Err(CatalogError::NotFound("E404".to_string()))
        );
        assert_eq!(catalog.calls(), 1);
    }
}
