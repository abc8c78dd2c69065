//! WooCommerce adapter (REST API v3).
//!
//! Categories and products are matched by slug; variants are pushed through
//! the per-product variations endpoint and reconciled by SKU. Authentication
//! is basic auth with the store's consumer key/secret.
//!
//! # Webhooks
//!
//! WooCommerce signs webhooks with `X-WC-Webhook-Signature`: base64
//! HMAC-SHA256 over the raw request body, keyed by the per-store webhook
//! secret.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;
use tracing::warn;

use storebridge_core::{
    CustomerInfo, OrderStatus, PaymentStatus, Provider, StatusTransition, UnifiedLineItem,
    UnifiedOrderPayload, slugify,
};

use crate::limiter::RequestExecutor;
use crate::models::{Category, Order, Product, Store, Variant};

use super::types::{
    RemoteCategory, RemoteProduct, RemoteProductDetail, RemoteVariant, RemoteVariantDetail,
};
use super::{ProviderAdapter, ProviderError, WebhookAction, parse_credentials};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-wc-webhook-signature";

/// WooCommerce credential bundle: site URL, REST consumer key/secret, and
/// the webhook signing secret.
#[derive(Deserialize)]
struct WooCredentials {
    base_url: String,
    consumer_key: String,
    consumer_secret: SecretString,
    webhook_secret: SecretString,
}

/// Adapter for the WooCommerce REST API.
pub struct WooCommerceAdapter {
    http: reqwest::Client,
    executor: Arc<RequestExecutor>,
}

#[derive(Debug, Deserialize)]
struct WooCategory {
    id: i64,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct WooProduct {
    id: i64,
    slug: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    variations: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct WooVariation {
    id: i64,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    menu_order: i32,
    #[serde(default)]
    attributes: Vec<WooAttribute>,
}

#[derive(Debug, Deserialize)]
struct WooAttribute {
    name: String,
    option: String,
}

#[derive(Debug, Deserialize)]
struct WooVariationBatch {
    #[serde(default)]
    create: Vec<WooVariation>,
    #[serde(default)]
    update: Vec<WooVariation>,
}

impl WooCommerceAdapter {
    /// Create the adapter.
    #[must_use]
    pub const fn new(http: reqwest::Client, executor: Arc<RequestExecutor>) -> Self {
        Self { http, executor }
    }

    /// Execute one REST call through the rate-limited executor.
    async fn request<T: DeserializeOwned>(
        &self,
        store: &Store,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ProviderError> {
        let creds: WooCredentials = parse_credentials(store)?;
        let url = format!(
            "{}/wp-json/wc/v3/{}",
            creds.base_url.trim_end_matches('/'),
            path
        );

        self.executor
            .execute(store, || {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .basic_auth(&creds.consumer_key, Some(creds.consumer_secret.expose_secret()))
                    .query(query);
                if let Some(body) = &body {
                    request = request.json(body);
                }
                async move {
                    let response = request.send().await.map_err(ProviderError::from_reqwest)?;
                    let status = response.status();

                    if status.as_u16() == 429 {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse().ok());
                        return Err(ProviderError::RateLimited { retry_after });
                    }
                    if !status.is_success() {
                        let message = response.text().await.unwrap_or_default();
                        return Err(ProviderError::Remote {
                            status: status.as_u16(),
                            message,
                        });
                    }

                    response.json().await.map_err(ProviderError::from_reqwest)
                }
            })
            .await
    }

    fn slug_params(natural_keys: &[String]) -> Vec<(&'static str, String)> {
        natural_keys.iter().map(|k| ("slug[]", k.clone())).collect()
    }

    fn variation_payload(product: &Product, variant: &Variant) -> serde_json::Value {
        let price = variant.price.unwrap_or(product.price);
        let attributes: Vec<_> = variant
            .attributes
            .iter()
            .map(|(name, option)| serde_json::json!({ "name": name, "option": option }))
            .collect();
        serde_json::json!({
            "sku": variant.sku,
            "regular_price": price.to_string(),
            "menu_order": variant.position,
            "attributes": attributes,
        })
    }

    fn variation_key(variation: &WooVariation) -> String {
        if let Some(sku) = variation.sku.as_deref() {
            if !sku.trim().is_empty() {
                return sku.trim().to_string();
            }
        }
        if !variation.attributes.is_empty() {
            let map: BTreeMap<&str, &str> = variation
                .attributes
                .iter()
                .map(|a| (a.name.as_str(), a.option.as_str()))
                .collect();
            return map
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";");
        }
        format!("position-{}", variation.menu_order)
    }

    /// Push the product's variations in one batch call and return the
    /// resulting remote variant stubs.
    async fn push_variations(
        &self,
        store: &Store,
        product_external_id: &str,
        product: &Product,
        variants: &[Variant],
    ) -> Result<Vec<RemoteVariant>, ProviderError> {
        if variants.is_empty() {
            return Ok(Vec::new());
        }

        // Existing remote variations, for update-vs-create decisions by SKU.
        let existing: Vec<WooVariation> = self
            .request(
                store,
                reqwest::Method::GET,
                &format!("products/{product_external_id}/variations"),
                &[("per_page", "100".to_string())],
                None,
            )
            .await?;
        let existing_by_key: BTreeMap<String, i64> = existing
            .iter()
            .map(|v| (Self::variation_key(v), v.id))
            .collect();

        let mut create = Vec::new();
        let mut update = Vec::new();
        for variant in variants {
            let mut payload = Self::variation_payload(product, variant);
            match existing_by_key.get(&variant.natural_key()) {
                Some(id) => {
                    payload["id"] = serde_json::Value::from(*id);
                    update.push(payload);
                }
                None => create.push(payload),
            }
        }

        let batch: WooVariationBatch = self
            .request(
                store,
                reqwest::Method::POST,
                &format!("products/{product_external_id}/variations/batch"),
                &[],
                Some(serde_json::json!({ "create": create, "update": update })),
            )
            .await?;

        Ok(batch
            .create
            .iter()
            .chain(batch.update.iter())
            .map(|v| RemoteVariant {
                external_id: v.id.to_string(),
                natural_key: Self::variation_key(v),
            })
            .collect())
    }

    /// Fixed push table into WooCommerce's status vocabulary.
    fn remote_status(status: OrderStatus) -> Option<&'static str> {
        match status {
            OrderStatus::Pending => Some("pending"),
            OrderStatus::Processing => Some("processing"),
            OrderStatus::Shipped | OrderStatus::Delivered => Some("completed"),
            OrderStatus::Cancelled => Some("cancelled"),
            OrderStatus::Refunded => Some("refunded"),
        }
    }

    /// Reverse table from WooCommerce's vocabulary. `on-hold` and `failed`
    /// have no local equivalent and are ignored upstream.
    fn local_status(remote: &str) -> Option<OrderStatus> {
        match remote {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "completed" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

#[async_trait]
impl ProviderAdapter for WooCommerceAdapter {
    fn provider(&self) -> Provider {
        Provider::WooCommerce
    }

    async fn find_category(
        &self,
        store: &Store,
        natural_key: &str,
    ) -> Result<Option<RemoteCategory>, ProviderError> {
        let found = self
            .find_categories_by_keys(store, &[natural_key.to_string()])
            .await?;
        Ok(found.into_iter().find(|c| c.natural_key == natural_key))
    }

    async fn find_categories_by_keys(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteCategory>, ProviderError> {
        if natural_keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = Self::slug_params(natural_keys);
        query.push(("per_page", natural_keys.len().to_string()));
        let categories: Vec<WooCategory> = self
            .request(store, reqwest::Method::GET, "products/categories", &query, None)
            .await?;
        Ok(categories
            .into_iter()
            .map(|c| RemoteCategory {
                external_id: c.id.to_string(),
                natural_key: c.slug,
            })
            .collect())
    }

    async fn find_product(
        &self,
        store: &Store,
        natural_key: &str,
    ) -> Result<Option<RemoteProduct>, ProviderError> {
        let found = self
            .find_products_by_keys(store, &[natural_key.to_string()])
            .await?;
        Ok(found.into_iter().find(|p| p.natural_key == natural_key))
    }

    async fn find_products_by_keys(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteProduct>, ProviderError> {
        if natural_keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = Self::slug_params(natural_keys);
        query.push(("per_page", natural_keys.len().to_string()));
        let products: Vec<WooProduct> = self
            .request(store, reqwest::Method::GET, "products", &query, None)
            .await?;

        // Variation stubs are resolved lazily during push; lookups only need
        // identity.
        Ok(products
            .into_iter()
            .map(|p| RemoteProduct {
                external_id: p.id.to_string(),
                natural_key: p.slug,
                variants: Vec::new(),
            })
            .collect())
    }

    async fn push_category(
        &self,
        store: &Store,
        category: &Category,
        existing: Option<&RemoteCategory>,
    ) -> Result<RemoteCategory, ProviderError> {
        let pushed: WooCategory = if let Some(existing) = existing {
            self.request(
                store,
                reqwest::Method::PUT,
                &format!("products/categories/{}", existing.external_id),
                &[],
                Some(serde_json::json!({ "name": category.name })),
            )
            .await?
        } else {
            self.request(
                store,
                reqwest::Method::POST,
                "products/categories",
                &[],
                Some(serde_json::json!({ "name": category.name, "slug": category.slug })),
            )
            .await?
        };

        Ok(RemoteCategory {
            external_id: pushed.id.to_string(),
            natural_key: pushed.slug,
        })
    }

    async fn push_product(
        &self,
        store: &Store,
        product: &Product,
        variants: &[Variant],
        category_external_id: Option<&str>,
        existing: Option<&RemoteProduct>,
    ) -> Result<RemoteProduct, ProviderError> {
        let mut body = serde_json::json!({
            "name": product.title,
            "slug": product.slug,
            "description": product.description.clone().unwrap_or_default(),
            "regular_price": product.price.to_string(),
            "type": if variants.is_empty() { "simple" } else { "variable" },
        });
        if let Some(category_id) = category_external_id {
            body["categories"] = serde_json::json!([{ "id": category_id.parse::<i64>().map_err(
                |_| ProviderError::Mapping(format!("non-numeric WooCommerce category id: {category_id}"))
            )? }]);
        }

        let pushed: WooProduct = if let Some(existing) = existing {
            self.request(
                store,
                reqwest::Method::PUT,
                &format!("products/{}", existing.external_id),
                &[],
                Some(body),
            )
            .await?
        } else {
            self.request(store, reqwest::Method::POST, "products", &[], Some(body))
                .await?
        };

        let external_id = pushed.id.to_string();
        let remote_variants = self
            .push_variations(store, &external_id, product, variants)
            .await?;

        Ok(RemoteProduct {
            external_id,
            natural_key: pushed.slug,
            variants: remote_variants,
        })
    }

    async fn sync_order_status(&self, store: &Store, order: &Order) -> Result<(), ProviderError> {
        let Some(external_id) = order.external_id.as_deref() else {
            warn!(
                tenant_id = %store.tenant_id,
                store_id = %store.id,
                order_id = %order.id,
                "order has no external id yet, skipping status sync"
            );
            return Ok(());
        };
        let Some(remote_status) = Self::remote_status(order.status) else {
            warn!(
                tenant_id = %store.tenant_id,
                store_id = %store.id,
                order_id = %order.id,
                status = order.status.as_str(),
                "no WooCommerce mapping for order status, skipping"
            );
            return Ok(());
        };

        let _response: serde_json::Value = self
            .request(
                store,
                reqwest::Method::PUT,
                &format!("orders/{external_id}"),
                &[],
                Some(serde_json::json!({ "status": remote_status })),
            )
            .await?;
        Ok(())
    }

    async fn pull_products(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteProductDetail>, ProviderError> {
        if natural_keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = Self::slug_params(natural_keys);
        query.push(("per_page", natural_keys.len().to_string()));
        let products: Vec<WooProduct> = self
            .request(store, reqwest::Method::GET, "products", &query, None)
            .await?;

        let mut details = Vec::with_capacity(products.len());
        for product in products {
            let variations: Vec<WooVariation> = if product.variations.is_empty() {
                Vec::new()
            } else {
                self.request(
                    store,
                    reqwest::Method::GET,
                    &format!("products/{}/variations", product.id),
                    &[("per_page", "100".to_string())],
                    None,
                )
                .await?
            };

            details.push(RemoteProductDetail {
                external_id: product.id.to_string(),
                natural_key: product.slug.clone(),
                title: product.name.clone().unwrap_or_default(),
                description: product.description.clone(),
                price: product
                    .price
                    .as_deref()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(Decimal::ZERO),
                currency: None,
                variants: variations
                    .iter()
                    .map(|v| RemoteVariantDetail {
                        external_id: v.id.to_string(),
                        sku: v.sku.clone().filter(|s| !s.trim().is_empty()),
                        attributes: v
                            .attributes
                            .iter()
                            .map(|a| (a.name.clone(), a.option.clone()))
                            .collect(),
                        price: v.price.as_deref().and_then(|p| p.parse().ok()),
                        position: v.menu_order,
                    })
                    .collect(),
            });
        }

        Ok(details)
    }

    fn verify_webhook(
        &self,
        store: &Store,
        _action: WebhookAction,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<bool, ProviderError> {
        let creds: WooCredentials = parse_credentials(store)?;
        let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
            return Ok(false);
        };
        let Ok(signature) = BASE64.decode(signature) else {
            return Ok(false);
        };

        let mut mac = HmacSha256::new_from_slice(creds.webhook_secret.expose_secret().as_bytes())
            .map_err(|e| ProviderError::InvalidCredentials(e.to_string()))?;
        mac.update(body);
        Ok(mac.verify_slice(&signature).is_ok())
    }

    fn map_webhook_order_created(
        &self,
        _store: &Store,
        payload: &serde_json::Value,
    ) -> Result<UnifiedOrderPayload, ProviderError> {
        let order: WooOrderWebhook = serde_json::from_value(payload.clone())?;

        let name = order.billing.as_ref().map(|b| {
            format!(
                "{} {}",
                b.first_name.as_deref().unwrap_or_default(),
                b.last_name.as_deref().unwrap_or_default()
            )
            .trim()
            .to_string()
        });

        let line_items = order
            .line_items
            .iter()
            .map(|item| UnifiedLineItem {
                product_key: slugify(&item.name),
                variant_key: item.sku.clone().filter(|s| !s.trim().is_empty()),
                quantity: item.quantity,
                unit_price: item.price.as_deref().and_then(|p| p.parse().ok()).unwrap_or(
                    item.total
                        .as_deref()
                        .and_then(|t| t.parse::<Decimal>().ok())
                        .map(|t| {
                            if item.quantity > 0 {
                                t / Decimal::from(item.quantity)
                            } else {
                                t
                            }
                        })
                        .unwrap_or(Decimal::ZERO),
                ),
            })
            .collect();

        Ok(UnifiedOrderPayload {
            external_id: order
                .id
                .map(|id| id.to_string())
                .ok_or_else(|| ProviderError::Mapping("order webhook carried no id".into()))?,
            customer: CustomerInfo {
                name: name.filter(|n| !n.is_empty()),
                email: order.billing.as_ref().and_then(|b| b.email.clone()),
                phone: order.billing.and_then(|b| b.phone),
            },
            line_items,
            payment_method: order.payment_method_title.or(order.payment_method),
            payment_status: if order.date_paid.is_some() {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Pending
            },
            shipping_cost: order
                .shipping_total
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Decimal::ZERO),
            currency: order.currency.unwrap_or_else(|| "USD".to_string()),
            placed_at: order.date_created_gmt.map(|dt| dt.and_utc()),
        })
    }

    fn map_webhook_order_updated(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Option<StatusTransition>, ProviderError> {
        let order: WooOrderWebhook = serde_json::from_value(payload.clone())?;
        let external_id = order
            .id
            .map(|id| id.to_string())
            .ok_or_else(|| ProviderError::Mapping("order webhook carried no id".into()))?;
        let Some(remote_status) = order.status else {
            return Ok(None);
        };

        Ok(Self::local_status(&remote_status).map(|mapped_status| StatusTransition {
            external_id,
            remote_status,
            mapped_status,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct WooOrderWebhook {
    id: Option<i64>,
    status: Option<String>,
    currency: Option<String>,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    payment_method_title: Option<String>,
    #[serde(default)]
    date_paid: Option<String>,
    #[serde(default)]
    date_created_gmt: Option<chrono::NaiveDateTime>,
    #[serde(default)]
    shipping_total: Option<String>,
    billing: Option<WooBilling>,
    #[serde(default)]
    line_items: Vec<WooLineItem>,
}

#[derive(Debug, Deserialize)]
struct WooBilling {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WooLineItem {
    name: String,
    #[serde(default)]
    sku: Option<String>,
    quantity: u32,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    total: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use storebridge_core::{StoreId, SyncStatus, TenantId};

    use crate::config::LimiterConfig;

    use super::*;

    fn adapter() -> WooCommerceAdapter {
        WooCommerceAdapter::new(
            reqwest::Client::new(),
            Arc::new(RequestExecutor::new(LimiterConfig::default())),
        )
    }

    fn store_with_secret(secret: &str) -> Store {
        Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider: Provider::WooCommerce,
            credentials: SecretString::from(format!(
                "{{\"base_url\":\"https://shop.example.com\",\"consumer_key\":\"ck_test\",\"consumer_secret\":\"cs_test\",\"webhook_secret\":\"{secret}\"}}"
            )),
            active: true,
            sync_status: SyncStatus::Synced,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_tables_roundtrip() {
        assert_eq!(
            WooCommerceAdapter::remote_status(OrderStatus::Processing),
            Some("processing")
        );
        assert_eq!(
            WooCommerceAdapter::remote_status(OrderStatus::Shipped),
            Some("completed")
        );
        assert_eq!(
            WooCommerceAdapter::local_status("refunded"),
            Some(OrderStatus::Refunded)
        );
        // WooCommerce-only statuses have no local equivalent.
        assert_eq!(WooCommerceAdapter::local_status("on-hold"), None);
        assert_eq!(WooCommerceAdapter::local_status("failed"), None);
    }

    #[test]
    fn test_verify_webhook_rejects_bad_signature() {
        let adapter = adapter();
        let store = store_with_secret("woo_secret");
        let body = br#"{"id":77}"#;

        let mut mac = HmacSha256::new_from_slice(b"wrong").expect("key");
        mac.update(body);
        let bad = BASE64.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, bad.parse().expect("header value"));
        assert!(
            !adapter
                .verify_webhook(&store, WebhookAction::OrderStatus, &headers, body)
                .expect("verify")
        );

        let mut mac = HmacSha256::new_from_slice(b"woo_secret").expect("key");
        mac.update(body);
        let good = BASE64.encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, good.parse().expect("header value"));
        assert!(
            adapter
                .verify_webhook(&store, WebhookAction::OrderStatus, &headers, body)
                .expect("verify")
        );
    }

    #[test]
    fn test_map_order_created() {
        let adapter = adapter();
        let store = store_with_secret("s");
        let payload = serde_json::json!({
            "id": 88,
            "status": "processing",
            "currency": "GBP",
            "payment_method": "stripe",
            "payment_method_title": "Card (Stripe)",
            "date_paid": "2026-03-01T09:00:00",
            "date_created_gmt": "2026-03-01T08:59:30",
            "shipping_total": "3.50",
            "billing": {
                "first_name": "Ada",
                "last_name": "Byron",
                "email": "ada@example.com",
                "phone": "+44 1234"
            },
            "line_items": [
                { "name": "Linen Shirt", "sku": "LS-1", "quantity": 1, "price": "39.90" }
            ]
        });

        let unified = adapter
            .map_webhook_order_created(&store, &payload)
            .expect("map");
        assert_eq!(unified.external_id, "88");
        assert_eq!(unified.customer.name.as_deref(), Some("Ada Byron"));
        assert_eq!(unified.payment_status, PaymentStatus::Paid);
        assert_eq!(unified.payment_method.as_deref(), Some("Card (Stripe)"));
        assert_eq!(unified.shipping_cost, Decimal::new(350, 2));
        assert_eq!(unified.line_items[0].product_key, "linen-shirt");
        assert_eq!(unified.line_items[0].variant_key.as_deref(), Some("LS-1"));
    }

    #[test]
    fn test_map_order_updated_unknown_status_is_ignored() {
        let adapter = adapter();

        let known = serde_json::json!({ "id": 88, "status": "completed" });
        let transition = adapter
            .map_webhook_order_updated(&known)
            .expect("map")
            .expect("mapped");
        assert_eq!(transition.mapped_status, OrderStatus::Delivered);
        assert_eq!(transition.remote_status, "completed");

        let unknown = serde_json::json!({ "id": 88, "status": "on-hold" });
        assert!(
            adapter
                .map_webhook_order_updated(&unknown)
                .expect("map")
                .is_none()
        );
    }

    #[test]
    fn test_variation_key_matches_local_derivation() {
        let variation = WooVariation {
            id: 5,
            sku: None,
            price: None,
            menu_order: 0,
            attributes: vec![
                WooAttribute { name: "size".into(), option: "M".into() },
                WooAttribute { name: "color".into(), option: "blue".into() },
            ],
        };
        assert_eq!(
            WooCommerceAdapter::variation_key(&variation),
            "color=blue;size=M"
        );
    }
}
