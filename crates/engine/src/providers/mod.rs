//! Provider adapters: one contract, three platforms.
//!
//! [`ProviderAdapter`] normalizes the Shopify GraphQL Admin API and the
//! WooCommerce/EasyOrder REST APIs behind a single trait so the rest of the
//! engine is provider-agnostic. Adapters are selected at dispatch time from
//! a provider-keyed [`AdapterRegistry`].
//!
//! Error policy: adapters never swallow business errors (missing
//! credentials, mapping failures) — those propagate to the worker pool,
//! which logs and drops the job. Transient transport faults are retried by
//! the rate-limited executor before they ever reach a caller.

mod easyorder;
mod shopify;
mod types;
mod woocommerce;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use thiserror::Error;

use storebridge_core::{Provider, StatusTransition, UnifiedOrderPayload};

use crate::config::EngineConfig;
use crate::limiter::RequestExecutor;
use crate::models::{Category, Order, Product, Store, Variant};

pub use easyorder::EasyOrderAdapter;
pub use shopify::ShopifyAdapter;
pub use types::{
    RemoteCategory, RemoteProduct, RemoteProductDetail, RemoteVariant, RemoteVariantDetail,
};
pub use woocommerce::WooCommerceAdapter;

/// Errors that can occur when talking to an external platform.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited by the platform (HTTP 429 or a throttle signal).
    #[error("rate limited by provider")]
    RateLimited {
        /// Retry-After hint in seconds, when the platform sent one.
        retry_after: Option<u64>,
    },

    /// The outbound request timed out.
    #[error("request timed out")]
    Timeout,

    /// Connection-level fault (reset, refused, DNS failure).
    #[error("network fault: {0}")]
    Network(String),

    /// Any other transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform rejected the request.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// GraphQL-level errors from the Shopify Admin API.
    #[error("GraphQL errors: {0}")]
    GraphQL(String),

    /// A response could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The store has no credentials for this provider.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// The credential bundle could not be parsed.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// A payload could not be translated (unmatched variant, malformed
    /// webhook, unknown field shape).
    #[error("mapping error: {0}")]
    Mapping(String),
}

impl ProviderError {
    /// Classify a reqwest error into the engine's taxonomy.
    ///
    /// Timeouts and connection-level faults are retryable; everything else
    /// (builder misuse, body/decode errors) is not.
    #[must_use]
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Network(err.to_string())
        } else {
            Self::Http(err)
        }
    }

    /// Whether the rate-limited executor should retry this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::Network(_)
        )
    }

    /// Whether this is a data/business problem that retrying cannot fix.
    #[must_use]
    pub const fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials(_) | Self::InvalidCredentials(_) | Self::Mapping(_)
        )
    }
}

/// Which webhook a signature check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    OrderCreate,
    OrderStatus,
}

/// The uniform contract the engine programs against.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The platform this adapter speaks to.
    fn provider(&self) -> Provider;

    /// Exact-match remote category lookup by natural key.
    async fn find_category(
        &self,
        store: &Store,
        natural_key: &str,
    ) -> Result<Option<RemoteCategory>, ProviderError>;

    /// Bulk remote category lookup, one call per batch page.
    async fn find_categories_by_keys(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteCategory>, ProviderError>;

    /// Exact-match remote product lookup by natural key.
    async fn find_product(
        &self,
        store: &Store,
        natural_key: &str,
    ) -> Result<Option<RemoteProduct>, ProviderError>;

    /// Bulk remote product lookup, one call per batch page.
    async fn find_products_by_keys(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteProduct>, ProviderError>;

    /// Update the remote category when `existing` is given, create it
    /// otherwise.
    async fn push_category(
        &self,
        store: &Store,
        category: &Category,
        existing: Option<&RemoteCategory>,
    ) -> Result<RemoteCategory, ProviderError>;

    /// Update-or-create the remote product, pushing its variants along, and
    /// return the remote variant stubs for external-id reconciliation.
    async fn push_product(
        &self,
        store: &Store,
        product: &Product,
        variants: &[Variant],
        category_external_id: Option<&str>,
        existing: Option<&RemoteProduct>,
    ) -> Result<RemoteProduct, ProviderError>;

    /// Push the order's status through the provider's fixed status table.
    /// No-ops (with a warning) when the status has no mapping or the order
    /// has no external id yet.
    async fn sync_order_status(&self, store: &Store, order: &Order) -> Result<(), ProviderError>;

    /// Reverse direction: fetch remote products by natural key for local
    /// import.
    async fn pull_products(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteProductDetail>, ProviderError>;

    /// Verify an inbound webhook's authenticity from the raw body, before
    /// any parsing or side effect.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store's credentials are unusable;
    /// a bad signature is `Ok(false)`.
    fn verify_webhook(
        &self,
        store: &Store,
        action: WebhookAction,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<bool, ProviderError>;

    /// Translate a platform "order created" webhook into the unified shape.
    fn map_webhook_order_created(
        &self,
        store: &Store,
        payload: &serde_json::Value,
    ) -> Result<UnifiedOrderPayload, ProviderError>;

    /// Translate a platform status webhook into a canonical transition, or
    /// `None` when the remote status has no local equivalent.
    fn map_webhook_order_updated(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Option<StatusTransition>, ProviderError>;

    /// Single-entity category sync: look up by natural key, then update or
    /// create.
    async fn sync_category(
        &self,
        store: &Store,
        category: &Category,
    ) -> Result<RemoteCategory, ProviderError> {
        let existing = self.find_category(store, &category.slug).await?;
        self.push_category(store, category, existing.as_ref()).await
    }

    /// Single-entity product sync: look up by natural key, then update or
    /// create with variants.
    async fn sync_product(
        &self,
        store: &Store,
        product: &Product,
        variants: &[Variant],
        category_external_id: Option<&str>,
    ) -> Result<RemoteProduct, ProviderError> {
        let existing = self.find_product(store, &product.slug).await?;
        self.push_product(store, product, variants, category_external_id, existing.as_ref())
            .await
    }
}

/// Provider-keyed strategy map for adapter lookup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own provider key.
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Look up the adapter for a provider.
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Build the standard registry with all three adapters sharing one HTTP
    /// client and one rate-limited executor.
    #[must_use]
    pub fn standard(
        config: &EngineConfig,
        http: reqwest::Client,
        executor: Arc<RequestExecutor>,
    ) -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(ShopifyAdapter::new(
            http.clone(),
            Arc::clone(&executor),
            config.shopify_api_version.clone(),
        )));
        registry.insert(Arc::new(WooCommerceAdapter::new(
            http.clone(),
            Arc::clone(&executor),
        )));
        registry.insert(Arc::new(EasyOrderAdapter::new(http, executor)));
        registry
    }
}

/// Parse a store's opaque credential bundle into a provider-specific shape.
pub(crate) fn parse_credentials<T: DeserializeOwned>(store: &Store) -> Result<T, ProviderError> {
    let raw = store.credentials.expose_secret();
    if raw.trim().is_empty() {
        return Err(ProviderError::MissingCredentials(format!(
            "store {} has no credentials",
            store.id
        )));
    }
    serde_json::from_str(raw).map_err(|e| {
        ProviderError::InvalidCredentials(format!("store {}: {e}", store.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Network("connection reset".to_string()).is_retryable());
        assert!(
            !ProviderError::Remote {
                status: 422,
                message: "bad input".to_string()
            }
            .is_retryable()
        );
        assert!(!ProviderError::Mapping("no such variant".to_string()).is_retryable());
    }

    #[test]
    fn test_business_error_classification() {
        assert!(ProviderError::MissingCredentials("store x".to_string()).is_business_error());
        assert!(ProviderError::Mapping("unmatched".to_string()).is_business_error());
        assert!(!ProviderError::Timeout.is_business_error());
    }
}
