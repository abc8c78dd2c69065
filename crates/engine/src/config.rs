//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string
//!
//! ## Optional
//! - `ENGINE_HOST` - Webhook ingress bind address (default: 127.0.0.1)
//! - `ENGINE_PORT` - Webhook ingress port (default: 8080)
//! - `SYNC_WORKER_CONCURRENCY` - Global worker pool size (default: 8)
//! - `SYNC_QUEUE_POLL_MS` - Queue poll timeout in milliseconds (default: 500)
//! - `SYNC_BACKOFF_BASE_SECS` - Base backoff for retryable provider faults (default: 10)
//! - `SYNC_MAX_ATTEMPTS` - Attempt budget per outbound call (default: 5)
//! - `SYNC_PRODUCT_DEBOUNCE_SECS` - Default debounce delay for product sync jobs (default: 5)
//! - `LIMITER_IDLE_SECS` - Idle period after which a store's limiter is torn down (default: 600)
//! - `PROVIDER_HTTP_TIMEOUT_SECS` - Per-request timeout for outbound calls (default: 30)
//! - `PROVIDER_CONCURRENCY` - Concurrent outbound calls per store (default: 4)
//! - `RATE_LIMIT_SHOPIFY` - Shopify requests-per-minute quota (default: 40)
//! - `RATE_LIMIT_WOOCOMMERCE` - WooCommerce requests-per-minute quota (default: 60)
//! - `RATE_LIMIT_EASYORDER` - EasyOrder requests-per-minute quota (default: 120)
//! - `SHOPIFY_API_VERSION` - Shopify Admin API version (default: 2026-01)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Sentry error sample rate (default: 1.0)

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use storebridge_core::Provider;

const DEFAULT_SHOPIFY_API_VERSION: &str = "2026-01";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the webhook ingress to
    pub host: IpAddr,
    /// Port for the webhook ingress
    pub port: u16,
    /// Worker pool and queue tuning
    pub worker: WorkerConfig,
    /// Outbound rate limiting and retry tuning
    pub limits: LimiterConfig,
    /// Shopify Admin API version
    pub shopify_api_version: String,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
}

/// Worker pool and queue tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers draining the queue.
    pub concurrency: usize,
    /// How long a worker sleeps between empty queue polls.
    pub poll_interval: Duration,
    /// Default debounce delay applied to product sync jobs.
    pub product_debounce: Duration,
}

/// Outbound rate limiting and retry tuning.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Requests-per-minute quota per provider.
    pub shopify_per_minute: u32,
    /// Requests-per-minute quota per provider.
    pub woocommerce_per_minute: u32,
    /// Requests-per-minute quota per provider.
    pub easyorder_per_minute: u32,
    /// Concurrent outbound calls allowed per store.
    pub concurrency: u32,
    /// Idle period after which a store's limiter is evicted.
    pub idle_eviction: Duration,
    /// Base backoff for retryable faults; attempt N sleeps `N * base`.
    pub backoff_base: Duration,
    /// Attempt budget per outbound call (including the first attempt).
    pub max_attempts: u32,
    /// Fixed per-request timeout for outbound HTTP calls.
    pub http_timeout: Duration,
}

impl LimiterConfig {
    /// The requests-per-minute quota for a provider.
    #[must_use]
    pub const fn per_minute(&self, provider: Provider) -> u32 {
        match provider {
            Provider::Shopify => self.shopify_per_minute,
            Provider::WooCommerce => self.woocommerce_per_minute,
            Provider::EasyOrder => self.easyorder_per_minute,
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            shopify_per_minute: 40,
            woocommerce_per_minute: 60,
            easyorder_per_minute: 120,
            concurrency: 4,
            idle_eviction: Duration::from_secs(600),
            backoff_base: Duration::from_secs(10),
            max_attempts: 5,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval: Duration::from_millis(500),
            product_debounce: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = SecretString::from(get_required_env("DATABASE_URL")?);
        let host = parse_env("ENGINE_HOST", "127.0.0.1")?;
        let port = parse_env("ENGINE_PORT", "8080")?;

        let worker = WorkerConfig {
            concurrency: parse_env("SYNC_WORKER_CONCURRENCY", "8")?,
            poll_interval: Duration::from_millis(parse_env("SYNC_QUEUE_POLL_MS", "500")?),
            product_debounce: Duration::from_secs(parse_env("SYNC_PRODUCT_DEBOUNCE_SECS", "5")?),
        };

        let limits = LimiterConfig {
            shopify_per_minute: parse_env("RATE_LIMIT_SHOPIFY", "40")?,
            woocommerce_per_minute: parse_env("RATE_LIMIT_WOOCOMMERCE", "60")?,
            easyorder_per_minute: parse_env("RATE_LIMIT_EASYORDER", "120")?,
            concurrency: parse_env("PROVIDER_CONCURRENCY", "4")?,
            idle_eviction: Duration::from_secs(parse_env("LIMITER_IDLE_SECS", "600")?),
            backoff_base: Duration::from_secs(parse_env("SYNC_BACKOFF_BASE_SECS", "10")?),
            max_attempts: parse_env("SYNC_MAX_ATTEMPTS", "5")?,
            http_timeout: Duration::from_secs(parse_env("PROVIDER_HTTP_TIMEOUT_SECS", "30")?),
        };

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            database_url,
            host,
            port,
            worker,
            limits,
            shopify_api_version: get_env_or_default(
                "SHOPIFY_API_VERSION",
                DEFAULT_SHOPIFY_API_VERSION,
            ),
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
        })
    }

    /// Returns the socket address for binding the webhook ingress.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn get_required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn get_optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn get_env_or_default(name: &str, default: &str) -> String {
    get_optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(name, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_defaults() {
        let limits = LimiterConfig::default();
        assert_eq!(limits.per_minute(Provider::Shopify), 40);
        assert_eq!(limits.per_minute(Provider::WooCommerce), 60);
        assert_eq!(limits.per_minute(Provider::EasyOrder), 120);
        assert_eq!(limits.max_attempts, 5);
        assert_eq!(limits.backoff_base, Duration::from_secs(10));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("DATABASE_URL".to_string());
        assert_eq!(err.to_string(), "Missing environment variable: DATABASE_URL");
    }
}
