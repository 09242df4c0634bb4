//! Catalog gateway abstraction.
//!
//! The catalog is the authority on a resource's initial stock. It is queried
//! once per resource, the first time the counter is missing from the store,
//! and never written to.

use crate::types::ResourceId;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by a catalog gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog does not know the resource
    #[error("Resource {0} not found")]
    NotFound(String),

    /// The request did not complete in time
    #[error("Catalog request timed out")]
    Timeout,

    /// Transport failure or non-success response
    #[error("Catalog request failed: {0}")]
    Unavailable(String),

    /// Success response that could not be interpreted
    #[error("Invalid catalog response: {0}")]
    InvalidResponse(String),
}

/// Boxed future returned by catalog operations.
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CatalogError>> + Send + 'a>>;

/// Read-only access to the authoritative stock figures.
pub trait CatalogGateway: Send + Sync {
    /// Fetch the initial stock of a resource.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the resource does not exist
    /// - `Timeout` / `Unavailable` / `InvalidResponse`: the figure could not be obtained
    fn initial_stock<'a>(&'a self, resource_id: &'a ResourceId) -> CatalogFuture<'a, u64>;
}
