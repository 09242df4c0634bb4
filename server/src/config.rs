//! Configuration management for the reservation service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unset or unparseable values fall back to the default; durations that
//! must be positive also fall back when set to zero.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use stockhold_core::store::claim_window;
use stockhold_runtime::{CoordinatorConfig, RetryPolicy};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Shared store
    pub redis: RedisConfig,
    /// Catalog service
    pub catalog: CatalogConfig,
    /// Hold behavior
    pub holds: HoldConfig,
    /// Expiry reconciler
    pub reconciler: ReconcilerConfig,
    /// HTTP server
    pub server: ServerConfig,
}

/// Redis configuration
///
/// `Debug` shows [`redacted_url`](Self::redacted_url), never the password.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Connection retries at startup before giving up
    pub connect_retries: usize,
}

/// Catalog service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Base URL, e.g. `http://catalog-service:8000`
    pub base_url: String,
    /// Collection path under the base URL, e.g. `/api/concerts`
    pub resource_path: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Hold configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldConfig {
    /// Hold time-to-live in seconds
    pub ttl_secs: u64,
}

/// Expiry reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// First resubscribe delay in milliseconds
    pub retry_initial_ms: u64,
    /// Resubscribe delay cap in milliseconds
    pub retry_max_ms: u64,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl RedisConfig {
    /// The connection URL with any password masked, for logs and errors.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        match redis::parse_redis_url(&self.url) {
            Some(mut url) => {
                if url.password().is_some() {
                    // Only fails for URLs that cannot carry credentials.
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            None => "<unparseable redis url>".to_string(),
        }
    }
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.redacted_url())
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            redis: RedisConfig {
                url: text("REDIS_URL", "redis://localhost:6379"),
                connect_retries: parsed(&lookup, "STARTUP_CONNECT_RETRIES").unwrap_or(5),
            },
            catalog: CatalogConfig {
                base_url: text("CATALOG_BASE_URL", "http://catalog-service:8000"),
                resource_path: text("CATALOG_RESOURCE_PATH", "/api/concerts"),
                timeout_secs: positive(&lookup, "CATALOG_TIMEOUT").unwrap_or(5),
            },
            holds: HoldConfig {
                ttl_secs: positive(&lookup, "HOLD_TTL").unwrap_or(300),
            },
            reconciler: ReconcilerConfig {
                retry_initial_ms: positive(&lookup, "RECONCILER_RETRY_INITIAL_MS").unwrap_or(500),
                retry_max_ms: positive(&lookup, "RECONCILER_RETRY_MAX_MS").unwrap_or(30_000),
            },
            server: ServerConfig {
                host: text("HOST", "0.0.0.0"),
                port: parsed(&lookup, "PORT").unwrap_or(5002),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT").unwrap_or(30),
            },
        }
    }

    /// `host:port` to bind the HTTP listener to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Catalog request timeout.
    #[must_use]
    pub const fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.timeout_secs)
    }

    /// Coordinator settings.
    #[must_use]
    pub const fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            hold_ttl: Duration::from_secs(self.holds.ttl_secs),
            catalog_timeout: self.catalog_timeout(),
        }
    }

    /// How long an expired hold stays claimed by the reconciler that
    /// credited it.
    #[must_use]
    pub fn reconciler_claim_window(&self) -> Duration {
        claim_window(self.coordinator().hold_ttl)
    }

    /// Backoff for the startup Redis connection.
    #[must_use]
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.redis.connect_retries)
            .build()
    }

    /// Backoff for reconciler resubscription. The cap never undercuts the
    /// initial delay.
    #[must_use]
    pub fn reconciler_policy(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.reconciler.retry_initial_ms);
        let max = Duration::from_millis(self.reconciler.retry_max_ms).max(initial);
        RetryPolicy::reconnect(initial, max)
    }

    /// Time allowed for background tasks to stop after the server exits.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    parsed(lookup, key).filter(|&value| value > 0)
}
