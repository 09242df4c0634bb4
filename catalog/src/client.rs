//! Catalog HTTP client implementation

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use stockhold_core::ResourceId;
use stockhold_core::catalog::{CatalogError, CatalogFuture, CatalogGateway};

/// Catalog entry as returned by the service. Other fields are ignored.
#[derive(Debug, Deserialize)]
struct ResourceEntry {
    stock: StockValue,
}

/// Some catalog deployments serialize integers as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StockValue {
    Number(i64),
    Text(String),
}

impl StockValue {
    fn into_stock(self) -> Result<u64, CatalogError> {
        let value = match self {
            Self::Number(n) => n,
            Self::Text(text) => text.trim().parse::<i64>().map_err(|_| {
                CatalogError::InvalidResponse(format!("stock is not an integer: {text:?}"))
            })?,
        };
        u64::try_from(value)
            .map_err(|_| CatalogError::InvalidResponse(format!("negative stock {value}")))
    }
}

/// [`CatalogGateway`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpCatalogGateway {
    client: Client,
    endpoint: Url,
}

impl HttpCatalogGateway {
    /// Create a gateway whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, resource_path: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Self::with_client(client, base_url, resource_path)
    }

    /// Create a gateway on top of an existing HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if `base_url` + `resource_path` is not a valid
    /// base URL.
    pub fn with_client(client: Client, base_url: &str, resource_path: &str) -> Result<Self, CatalogError> {
        let joined = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            resource_path.trim_matches('/')
        );
        let endpoint = Url::parse(&joined)
            .map_err(|e| CatalogError::Unavailable(format!("Invalid catalog URL {joined:?}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(CatalogError::Unavailable(format!(
                "Catalog URL {joined:?} cannot be a base"
            )));
        }
        Ok(Self { client, endpoint })
    }

    /// URL of a single resource; the id is percent-encoded as one segment.
    fn resource_url(&self, resource_id: &ResourceId) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(resource_id.as_str());
        }
        url
    }
}

impl CatalogGateway for HttpCatalogGateway {
    fn initial_stock<'a>(&'a self, resource_id: &'a ResourceId) -> CatalogFuture<'a, u64> {
        Box::pin(async move {
            let url = self.resource_url(resource_id);
            tracing::debug!(resource_id = %resource_id, url = %url, "Fetching initial stock");

            let response = self.client.get(url).send().await.map_err(|e| {
                if e.is_timeout() {
                    CatalogError::Timeout
                } else {
                    CatalogError::Unavailable(e.to_string())
                }
            })?;

            match response.status() {
                StatusCode::OK => {
                    let entry = response.json::<ResourceEntry>().await.map_err(|e| {
                        if e.is_timeout() {
                            CatalogError::Timeout
                        } else {
                            CatalogError::InvalidResponse(e.to_string())
                        }
                    })?;
                    let stock = entry.stock.into_stock()?;
                    tracing::debug!(resource_id = %resource_id, stock, "Catalog stock fetched");
                    Ok(stock)
                }
                StatusCode::NOT_FOUND => Err(CatalogError::NotFound(resource_id.to_string())),
                status => Err(CatalogError::Unavailable(format!("HTTP {}", status.as_u16()))),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway(base: &str, path: &str) -> HttpCatalogGateway {
        HttpCatalogGateway::new(base, path, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn resource_url_joins_base_path_and_id() {
        let id = ResourceId::new("E1").unwrap();
        assert_eq!(
            gateway("http://catalog:8000", "/api/concerts").resource_url(&id).as_str(),
            "http://catalog:8000/api/concerts/E1"
        );
        assert_eq!(
            gateway("http://catalog:8000/", "api/concerts/").resource_url(&id).as_str(),
            "http://catalog:8000/api/concerts/E1"
        );
    }

    #[test]
    fn resource_id_is_a_single_segment() {
        let id = ResourceId::new("a/b?c").unwrap();
        assert_eq!(
            gateway("http://catalog", "/items").resource_url(&id).as_str(),
            "http://catalog/items/a%2Fb%3Fc"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpCatalogGateway::new("not a url", "/x", Duration::from_secs(1)),
            Err(CatalogError::Unavailable(_))
        ));
    }

    #[test]
    fn stock_values_must_be_non_negative_integers() {
        assert_eq!(StockValue::Number(10).into_stock(), Ok(10));
        assert_eq!(StockValue::Text(" 12 ".to_string()).into_stock(), Ok(12));
        assert!(StockValue::Number(-1).into_stock().is_err());
        assert!(StockValue::Text("many".to_string()).into_stock().is_err());
    }
}
