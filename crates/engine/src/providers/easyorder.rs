//! EasyOrder adapter (generic REST API).
//!
//! EasyOrder is the simplest of the three platforms: a flat JSON REST API
//! authenticated with an `X-Api-Key` header, with variants embedded in the
//! product resource.
//!
//! # Webhooks
//!
//! EasyOrder does not sign payloads; it sends the store's webhook token in
//! `X-EasyOrder-Token`, which is compared against the stored secret in
//! constant time.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use subtle::ConstantTimeEq;
use tracing::warn;

use storebridge_core::{
    CustomerInfo, OrderStatus, PaymentStatus, Provider, StatusTransition, UnifiedLineItem,
    UnifiedOrderPayload,
};

use crate::limiter::RequestExecutor;
use crate::models::{Category, Order, Product, Store, Variant};

use super::types::{
    RemoteCategory, RemoteProduct, RemoteProductDetail, RemoteVariant, RemoteVariantDetail,
};
use super::{ProviderAdapter, ProviderError, WebhookAction, parse_credentials};

const TOKEN_HEADER: &str = "x-easyorder-token";

/// EasyOrder credential bundle: API base URL, API key, and the webhook
/// token.
#[derive(Deserialize)]
struct EasyOrderCredentials {
    base_url: String,
    api_key: SecretString,
    webhook_token: SecretString,
}

/// Adapter for the EasyOrder REST API.
pub struct EasyOrderAdapter {
    http: reqwest::Client,
    executor: Arc<RequestExecutor>,
}

#[derive(Debug, Deserialize)]
struct EasyCategory {
    id: String,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct EasyProduct {
    id: String,
    slug: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    variants: Vec<EasyVariant>,
}

#[derive(Debug, Deserialize)]
struct EasyVariant {
    id: String,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    attributes: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    position: i32,
}

impl EasyOrderAdapter {
    /// Create the adapter.
    #[must_use]
    pub const fn new(http: reqwest::Client, executor: Arc<RequestExecutor>) -> Self {
        Self { http, executor }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        store: &Store,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ProviderError> {
        let creds: EasyOrderCredentials = parse_credentials(store)?;
        let url = format!("{}/api/v1/{}", creds.base_url.trim_end_matches('/'), path);

        self.executor
            .execute(store, || {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .header("X-Api-Key", creds.api_key.expose_secret())
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

    fn variant_body(product: &Product, variant: &Variant) -> serde_json::Value {
        serde_json::json!({
            "sku": variant.sku,
            "attributes": variant.attributes,
            "price": variant.price.unwrap_or(product.price),
            "position": variant.position,
        })
    }

    fn variant_stub(index: usize, variant: &EasyVariant) -> RemoteVariant {
        let natural_key = if let Some(sku) = variant.sku.as_deref().filter(|s| !s.trim().is_empty())
        {
            sku.trim().to_string()
        } else if variant.attributes.is_empty() {
            format!("position-{index}")
        } else {
            variant
                .attributes
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";")
        };
        RemoteVariant {
            external_id: variant.id.clone(),
            natural_key,
        }
    }

    fn to_remote_product(product: &EasyProduct) -> RemoteProduct {
        RemoteProduct {
            external_id: product.id.clone(),
            natural_key: product.slug.clone(),
            variants: product
                .variants
                .iter()
                .enumerate()
                .map(|(i, v)| Self::variant_stub(i, v))
                .collect(),
        }
    }

    /// Fixed push table into EasyOrder's status vocabulary. Refunds are
    /// handled out-of-band on EasyOrder, so `Refunded` has no mapping.
    fn remote_status(status: OrderStatus) -> Option<&'static str> {
        match status {
            OrderStatus::Pending => Some("new"),
            OrderStatus::Processing => Some("preparing"),
            OrderStatus::Shipped => Some("shipped"),
            OrderStatus::Delivered => Some("delivered"),
            OrderStatus::Cancelled => Some("cancelled"),
            OrderStatus::Refunded => None,
        }
    }

    fn local_status(remote: &str) -> Option<OrderStatus> {
        match remote {
            "new" => Some(OrderStatus::Pending),
            "preparing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

#[async_trait]
impl ProviderAdapter for EasyOrderAdapter {
    fn provider(&self) -> Provider {
        Provider::EasyOrder
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
        let categories: Vec<EasyCategory> = self
            .request(
                store,
                reqwest::Method::GET,
                "categories",
                &[("slugs", natural_keys.join(","))],
                None,
            )
            .await?;
        Ok(categories
            .into_iter()
            .map(|c| RemoteCategory {
                external_id: c.id,
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
        let products: Vec<EasyProduct> = self
            .request(
                store,
                reqwest::Method::GET,
                "products",
                &[("slugs", natural_keys.join(","))],
                None,
            )
            .await?;
        Ok(products.iter().map(Self::to_remote_product).collect())
    }

    async fn push_category(
        &self,
        store: &Store,
        category: &Category,
        existing: Option<&RemoteCategory>,
    ) -> Result<RemoteCategory, ProviderError> {
        let pushed: EasyCategory = if let Some(existing) = existing {
            self.request(
                store,
                reqwest::Method::PUT,
                &format!("categories/{}", existing.external_id),
                &[],
                Some(serde_json::json!({ "name": category.name })),
            )
            .await?
        } else {
            self.request(
                store,
                reqwest::Method::POST,
                "categories",
                &[],
                Some(serde_json::json!({ "name": category.name, "slug": category.slug })),
            )
            .await?
        };

        Ok(RemoteCategory {
            external_id: pushed.id,
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
        let variant_bodies: Vec<_> = variants
            .iter()
            .map(|v| Self::variant_body(product, v))
            .collect();
        let body = serde_json::json!({
            "title": product.title,
            "slug": product.slug,
            "description": product.description,
            "price": product.price,
            "currency": product.currency,
            "category_id": category_external_id,
            "variants": variant_bodies,
        });

        let pushed: EasyProduct = if let Some(existing) = existing {
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

        Ok(Self::to_remote_product(&pushed))
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
                "no EasyOrder mapping for order status, skipping"
            );
            return Ok(());
        };

        let _response: serde_json::Value = self
            .request(
                store,
                reqwest::Method::PUT,
                &format!("orders/{external_id}/status"),
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
        let products: Vec<EasyProduct> = self
            .request(
                store,
                reqwest::Method::GET,
                "products",
                &[("slugs", natural_keys.join(","))],
                None,
            )
            .await?;

        Ok(products
            .into_iter()
            .map(|p| RemoteProductDetail {
                external_id: p.id,
                natural_key: p.slug,
                title: p.title.unwrap_or_default(),
                description: p.description,
                price: p.price.unwrap_or(Decimal::ZERO),
                currency: p.currency,
                variants: p
                    .variants
                    .into_iter()
                    .map(|v| RemoteVariantDetail {
                        external_id: v.id,
                        sku: v.sku.filter(|s| !s.trim().is_empty()),
                        attributes: v.attributes,
                        price: v.price,
                        position: v.position,
                    })
                    .collect(),
            })
            .collect())
    }

    fn verify_webhook(
        &self,
        store: &Store,
        _action: WebhookAction,
        headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<bool, ProviderError> {
        let creds: EasyOrderCredentials = parse_credentials(store)?;
        let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
            return Ok(false);
        };
        let expected = creds.webhook_token.expose_secret().as_bytes();
        Ok(token.as_bytes().ct_eq(expected).into())
    }

    fn map_webhook_order_created(
        &self,
        _store: &Store,
        payload: &serde_json::Value,
    ) -> Result<UnifiedOrderPayload, ProviderError> {
        let envelope: EasyOrderWebhook = serde_json::from_value(payload.clone())?;
        let order = envelope.order;

        let line_items = order
            .items
            .iter()
            .map(|item| UnifiedLineItem {
                product_key: item.product_slug.clone(),
                variant_key: item.sku.clone().filter(|s| !s.trim().is_empty()),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();

        Ok(UnifiedOrderPayload {
            external_id: order.id,
            customer: order
                .customer
                .map(|c| CustomerInfo {
                    name: c.name,
                    email: c.email,
                    phone: c.phone,
                })
                .unwrap_or_default(),
            line_items,
            payment_method: order.payment.as_ref().and_then(|p| p.method.clone()),
            payment_status: match order.payment.as_ref().and_then(|p| p.status.as_deref()) {
                Some("paid") => PaymentStatus::Paid,
                Some("authorized") => PaymentStatus::Authorized,
                Some("refunded") => PaymentStatus::Refunded,
                Some("failed") => PaymentStatus::Failed,
                _ => PaymentStatus::Pending,
            },
            shipping_cost: order.shipping_fee.unwrap_or(Decimal::ZERO),
            currency: order.currency.unwrap_or_else(|| "USD".to_string()),
            placed_at: order.placed_at,
        })
    }

    fn map_webhook_order_updated(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Option<StatusTransition>, ProviderError> {
        let envelope: EasyOrderWebhook = serde_json::from_value(payload.clone())?;
        let order = envelope.order;
        let Some(remote_status) = order.status else {
            return Ok(None);
        };

        Ok(Self::local_status(&remote_status).map(|mapped_status| StatusTransition {
            external_id: order.id,
            remote_status,
            mapped_status,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct EasyOrderWebhook {
    order: EasyOrderPayload,
}

#[derive(Debug, Deserialize)]
struct EasyOrderPayload {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    customer: Option<EasyCustomer>,
    #[serde(default)]
    items: Vec<EasyOrderItem>,
    payment: Option<EasyPayment>,
    #[serde(default)]
    shipping_fee: Option<Decimal>,
    #[serde(default)]
    placed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct EasyCustomer {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EasyOrderItem {
    product_slug: String,
    #[serde(default)]
    sku: Option<String>,
    quantity: u32,
    unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct EasyPayment {
    method: Option<String>,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use storebridge_core::{StoreId, SyncStatus, TenantId};

    use crate::config::LimiterConfig;

    use super::*;

    fn adapter() -> EasyOrderAdapter {
        EasyOrderAdapter::new(
            reqwest::Client::new(),
            Arc::new(RequestExecutor::new(LimiterConfig::default())),
        )
    }

    fn store() -> Store {
        Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider: Provider::EasyOrder,
            credentials: SecretString::from(
                r#"{"base_url":"https://api.easyorder.example","api_key":"eo_key","webhook_token":"eo_token"}"#,
            ),
            active: true,
            sync_status: SyncStatus::Synced,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_verify_webhook_shared_secret() {
        let adapter = adapter();
        let store = store();

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "eo_token".parse().expect("header value"));
        assert!(
            adapter
                .verify_webhook(&store, WebhookAction::OrderCreate, &headers, b"{}")
                .expect("verify")
        );

        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "not-the-token".parse().expect("header value"));
        assert!(
            !adapter
                .verify_webhook(&store, WebhookAction::OrderCreate, &headers, b"{}")
                .expect("verify")
        );
    }

    #[test]
    fn test_missing_credentials_is_a_business_error() {
        let adapter = adapter();
        let mut store = store();
        store.credentials = SecretString::from("");

        let err = adapter
            .verify_webhook(&store, WebhookAction::OrderCreate, &HeaderMap::new(), b"{}")
            .unwrap_err();
        assert!(err.is_business_error());
    }

    #[test]
    fn test_map_order_created() {
        let adapter = adapter();
        let payload = serde_json::json!({
            "order": {
                "id": "EO-3001",
                "status": "new",
                "currency": "EUR",
                "customer": { "name": "Kim Idris", "email": "kim@example.com", "phone": null },
                "items": [
                    { "product_slug": "linen-shirt", "sku": "LS-1", "quantity": 3, "unit_price": "29.50" }
                ],
                "payment": { "method": "ideal", "status": "paid" },
                "shipping_fee": "2.95",
                "placed_at": "2026-03-01T12:00:00Z"
            }
        });

        let unified = adapter
            .map_webhook_order_created(&store(), &payload)
            .expect("map");
        assert_eq!(unified.external_id, "EO-3001");
        assert_eq!(unified.line_items[0].product_key, "linen-shirt");
        assert_eq!(unified.payment_status, PaymentStatus::Paid);
        assert_eq!(unified.shipping_cost, Decimal::new(295, 2));
    }

    #[test]
    fn test_status_tables() {
        assert_eq!(
            EasyOrderAdapter::remote_status(OrderStatus::Processing),
            Some("preparing")
        );
        // Refunds have no EasyOrder push equivalent.
        assert_eq!(EasyOrderAdapter::remote_status(OrderStatus::Refunded), None);
        assert_eq!(
            EasyOrderAdapter::local_status("delivered"),
            Some(OrderStatus::Delivered)
        );
        assert_eq!(EasyOrderAdapter::local_status("archived"), None);
    }
}
