//! # Stockhold Catalog
//!
//! HTTP client for the catalog service, the authority on each resource's
//! initial stock.
//!
//! # Contract
//!
//! `GET {base_url}{resource_path}/{id}`:
//!
//! - `200` with a JSON body containing `stock` → initial quantity
//! - `404` → the resource does not exist
//! - anything else, a transport error or a timeout → unavailable
//!
//! # Example
//!
//! ```no_run
//! use stockhold_catalog::HttpCatalogGateway;
//! use stockhold_core::catalog::CatalogGateway;
//! use stockhold_core::ResourceId;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = HttpCatalogGateway::new(
//!     "http://catalog-service:8000",
//!     "/api/concerts",
//!     Duration::from_secs(5),
//! )?;
//! let stock = catalog.initial_stock(&ResourceId::new("E1")?).await?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::HttpCatalogGateway;
