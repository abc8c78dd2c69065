//! Shopify adapter (GraphQL Admin API).
//!
//! Speaks hand-written GraphQL with typed serde responses. Categories map to
//! Shopify collections (matched by handle), products/variants to products
//! (matched by handle, variants reconciled by SKU or option signature).
//!
//! # Webhooks
//!
//! Shopify signs webhooks with `X-Shopify-Hmac-Sha256`: base64 HMAC-SHA256
//! over the raw request body, keyed by the store's webhook secret.

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

const HMAC_HEADER: &str = "x-shopify-hmac-sha256";

/// Shopify credential bundle: store domain, Admin API access token, and the
/// per-store webhook signing secret.
#[derive(Deserialize)]
struct ShopifyCredentials {
    shop_domain: String,
    access_token: SecretString,
    webhook_secret: SecretString,
}

/// Adapter for the Shopify GraphQL Admin API.
pub struct ShopifyAdapter {
    http: reqwest::Client,
    executor: Arc<RequestExecutor>,
    api_version: String,
}

// =============================================================================
// GraphQL documents
// =============================================================================

const COLLECTIONS_BY_QUERY: &str = r"
query CollectionsByQuery($query: String!, $first: Int!) {
  collections(first: $first, query: $query) {
    edges { node { id handle } }
  }
}";

const COLLECTION_CREATE: &str = r"
mutation CollectionCreate($input: CollectionInput!) {
  collectionCreate(input: $input) {
    collection { id handle }
    userErrors { field message }
  }
}";

const COLLECTION_UPDATE: &str = r"
mutation CollectionUpdate($input: CollectionInput!) {
  collectionUpdate(input: $input) {
    collection { id handle }
    userErrors { field message }
  }
}";

const PRODUCTS_BY_QUERY: &str = r"
query ProductsByQuery($query: String!, $first: Int!) {
  products(first: $first, query: $query) {
    edges {
      node {
        id
        handle
        variants(first: 100) {
          edges { node { id sku selectedOptions { name value } } }
        }
      }
    }
  }
}";

const PRODUCTS_PULL: &str = r"
query ProductsPull($query: String!, $first: Int!) {
  products(first: $first, query: $query) {
    edges {
      node {
        id
        handle
        title
        descriptionHtml
        variants(first: 100) {
          edges {
            node { id sku price position selectedOptions { name value } }
          }
        }
      }
    }
  }
}";

const PRODUCT_SET: &str = r"
mutation ProductSet($input: ProductSetInput!) {
  productSet(input: $input) {
    product {
      id
      handle
      variants(first: 100) {
        edges { node { id sku selectedOptions { name value } } }
      }
    }
    userErrors { field message }
  }
}";

const ORDER_OPEN: &str = r"
mutation OrderOpen($input: OrderOpenInput!) {
  orderOpen(input: $input) {
    order { id }
    userErrors { field message }
  }
}";

const ORDER_CLOSE: &str = r"
mutation OrderClose($input: OrderCloseInput!) {
  orderClose(input: $input) {
    order { id }
    userErrors { field message }
  }
}";

const ORDER_CANCEL: &str = r"
mutation OrderCancel($orderId: ID!) {
  orderCancel(orderId: $orderId, reason: OTHER, refund: false, restock: true, notifyCustomer: false) {
    job { id }
    userErrors { field message }
  }
}";

// =============================================================================
// Response shapes
// =============================================================================

/// GraphQL response wrapper.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
    #[serde(default)]
    extensions: GraphQLErrorExtensions,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQLErrorExtensions {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct CollectionNode {
    id: String,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct CollectionsData {
    collections: Connection<CollectionNode>,
}

#[derive(Debug, Deserialize)]
struct CollectionCreateData {
    #[serde(rename = "collectionCreate")]
    collection_create: CollectionPayload,
}

#[derive(Debug, Deserialize)]
struct CollectionUpdateData {
    #[serde(rename = "collectionUpdate")]
    collection_update: CollectionPayload,
}

#[derive(Debug, Deserialize)]
struct CollectionPayload {
    collection: Option<CollectionNode>,
    #[serde(rename = "userErrors", default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct SelectedOption {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct VariantNode {
    id: String,
    sku: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    position: Option<i32>,
    #[serde(rename = "selectedOptions", default)]
    selected_options: Vec<SelectedOption>,
}

#[derive(Debug, Deserialize)]
struct ProductNode {
    id: String,
    handle: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "descriptionHtml", default)]
    description_html: Option<String>,
    variants: Connection<VariantNode>,
}

#[derive(Debug, Deserialize)]
struct ProductsData {
    products: Connection<ProductNode>,
}

#[derive(Debug, Deserialize)]
struct ProductSetData {
    #[serde(rename = "productSet")]
    product_set: ProductSetPayload,
}

#[derive(Debug, Deserialize)]
struct ProductSetPayload {
    product: Option<ProductNode>,
    #[serde(rename = "userErrors", default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct OrderMutationData {
    #[serde(alias = "orderOpen", alias = "orderClose", alias = "orderCancel")]
    payload: OrderMutationPayload,
}

#[derive(Debug, Deserialize)]
struct OrderMutationPayload {
    #[serde(rename = "userErrors", default)]
    user_errors: Vec<UserError>,
}

/// What a local order status translates to on Shopify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderAction {
    Open,
    Close,
    Cancel,
}

impl ShopifyAdapter {
    /// Create the adapter.
    #[must_use]
    pub const fn new(
        http: reqwest::Client,
        executor: Arc<RequestExecutor>,
        api_version: String,
    ) -> Self {
        Self {
            http,
            executor,
            api_version,
        }
    }

    /// Execute a GraphQL document through the rate-limited executor.
    async fn graphql<T: DeserializeOwned>(
        &self,
        store: &Store,
        document: &str,
        variables: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let creds: ShopifyCredentials = parse_credentials(store)?;
        let url = format!(
            "https://{}/admin/api/{}/graphql.json",
            creds.shop_domain, self.api_version
        );
        let body = serde_json::json!({ "query": document, "variables": variables });

        self.executor
            .execute(store, || {
                let request = self
                    .http
                    .post(&url)
                    .header("X-Shopify-Access-Token", creds.access_token.expose_secret())
                    .json(&body);
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

                    let envelope: GraphQLResponse<T> = response
                        .json()
                        .await
                        .map_err(ProviderError::from_reqwest)?;

                    if let Some(errors) = envelope.errors {
                        // Shopify signals cost throttling through a GraphQL
                        // error rather than an HTTP status.
                        if errors
                            .iter()
                            .any(|e| e.extensions.code.as_deref() == Some("THROTTLED"))
                        {
                            return Err(ProviderError::RateLimited { retry_after: None });
                        }
                        let joined = errors
                            .iter()
                            .map(|e| e.message.clone())
                            .collect::<Vec<_>>()
                            .join("; ");
                        return Err(ProviderError::GraphQL(joined));
                    }

                    envelope
                        .data
                        .ok_or_else(|| ProviderError::GraphQL("response carried no data".into()))
                }
            })
            .await
    }

    fn handle_query(natural_keys: &[String]) -> String {
        natural_keys
            .iter()
            .map(|k| format!("handle:{k}"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    fn variant_stub(index: usize, node: &VariantNode) -> RemoteVariant {
        RemoteVariant {
            external_id: node.id.clone(),
            natural_key: remote_variant_key(index, node),
        }
    }

    fn to_remote_product(node: &ProductNode) -> RemoteProduct {
        RemoteProduct {
            external_id: node.id.clone(),
            natural_key: node.handle.clone(),
            variants: node
                .variants
                .edges
                .iter()
                .enumerate()
                .map(|(i, e)| Self::variant_stub(i, &e.node))
                .collect(),
        }
    }

    /// Build the `ProductSetInput` for create-or-update.
    fn product_set_input(
        product: &Product,
        variants: &[Variant],
        category_external_id: Option<&str>,
        existing: Option<&RemoteProduct>,
    ) -> serde_json::Value {
        let mut input = serde_json::json!({
            "title": product.title,
            "handle": product.slug,
            "descriptionHtml": product.description.clone().unwrap_or_default(),
        });

        if let Some(id) = existing.map(|e| e.external_id.as_str()) {
            input["id"] = serde_json::Value::from(id);
        }
        if let Some(collection) = category_external_id {
            input["collections"] = serde_json::json!([collection]);
        }

        if !variants.is_empty() {
            // Option names are the union of all variant attribute names, in
            // deterministic order.
            let mut option_names: Vec<&str> = Vec::new();
            for variant in variants {
                for name in variant.attributes.keys() {
                    if !option_names.contains(&name.as_str()) {
                        option_names.push(name);
                    }
                }
            }
            option_names.sort_unstable();

            if !option_names.is_empty() {
                input["productOptions"] = option_names
                    .iter()
                    .map(|name| {
                        let values: Vec<_> = variants
                            .iter()
                            .filter_map(|v| v.attributes.get(*name))
                            .map(|value| serde_json::json!({ "name": value }))
                            .collect();
                        serde_json::json!({ "name": name, "values": values })
                    })
                    .collect::<Vec<_>>()
                    .into();
            }

            input["variants"] = variants
                .iter()
                .map(|variant| {
                    let price = variant.price.unwrap_or(product.price);
                    let option_values: Vec<_> = variant
                        .attributes
                        .iter()
                        .map(|(name, value)| {
                            serde_json::json!({ "optionName": name, "name": value })
                        })
                        .collect();
                    serde_json::json!({
                        "sku": variant.sku,
                        "price": price.to_string(),
                        "optionValues": option_values,
                    })
                })
                .collect::<Vec<_>>()
                .into();
        }

        input
    }

    /// Fixed push table: which order mutation a local status maps to.
    /// `Pending` and `Refunded` have no Shopify-side push equivalent.
    const fn order_action(status: OrderStatus) -> Option<OrderAction> {
        match status {
            OrderStatus::Processing => Some(OrderAction::Open),
            OrderStatus::Shipped | OrderStatus::Delivered => Some(OrderAction::Close),
            OrderStatus::Cancelled => Some(OrderAction::Cancel),
            OrderStatus::Pending | OrderStatus::Refunded => None,
        }
    }
}

fn check_user_errors(context: &str, errors: &[UserError]) -> Result<(), ProviderError> {
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .map(|e| e.message.clone())
        .collect::<Vec<_>>()
        .join("; ");
    Err(ProviderError::Remote {
        status: 422,
        message: format!("{context}: {joined}"),
    })
}

/// Natural key of a remote variant: SKU, else canonical option signature,
/// else a positional placeholder that the reconciler pairs by index.
fn remote_variant_key(index: usize, node: &VariantNode) -> String {
    if let Some(sku) = node.sku.as_deref() {
        if !sku.trim().is_empty() {
            return sku.trim().to_string();
        }
    }
    if !node.selected_options.is_empty() {
        let map: BTreeMap<&str, &str> = node
            .selected_options
            .iter()
            .map(|o| (o.name.as_str(), o.value.as_str()))
            .collect();
        return map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";");
    }
    format!("position-{index}")
}

fn options_to_attributes(options: &[SelectedOption]) -> BTreeMap<String, String> {
    options
        .iter()
        // "Title: Default Title" is Shopify's placeholder for single-variant
        // products, not a real option.
        .filter(|o| o.name != "Title")
        .map(|o| (o.name.clone(), o.value.clone()))
        .collect()
}

#[async_trait]
impl ProviderAdapter for ShopifyAdapter {
    fn provider(&self) -> Provider {
        Provider::Shopify
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
        let data: CollectionsData = self
            .graphql(
                store,
                COLLECTIONS_BY_QUERY,
                serde_json::json!({
                    "query": Self::handle_query(natural_keys),
                    "first": natural_keys.len(),
                }),
            )
            .await?;
        Ok(data
            .collections
            .edges
            .into_iter()
            .map(|e| RemoteCategory {
                external_id: e.node.id,
                natural_key: e.node.handle,
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
        let data: ProductsData = self
            .graphql(
                store,
                PRODUCTS_BY_QUERY,
                serde_json::json!({
                    "query": Self::handle_query(natural_keys),
                    "first": natural_keys.len(),
                }),
            )
            .await?;
        Ok(data
            .products
            .edges
            .iter()
            .map(|e| Self::to_remote_product(&e.node))
            .collect())
    }

    async fn push_category(
        &self,
        store: &Store,
        category: &Category,
        existing: Option<&RemoteCategory>,
    ) -> Result<RemoteCategory, ProviderError> {
        let node = if let Some(existing) = existing {
            let data: CollectionUpdateData = self
                .graphql(
                    store,
                    COLLECTION_UPDATE,
                    serde_json::json!({
                        "input": {
                            "id": existing.external_id,
                            "title": category.name,
                        }
                    }),
                )
                .await?;
            check_user_errors("collectionUpdate", &data.collection_update.user_errors)?;
            data.collection_update.collection
        } else {
            let data: CollectionCreateData = self
                .graphql(
                    store,
                    COLLECTION_CREATE,
                    serde_json::json!({
                        "input": {
                            "title": category.name,
                            "handle": category.slug,
                        }
                    }),
                )
                .await?;
            check_user_errors("collectionCreate", &data.collection_create.user_errors)?;
            data.collection_create.collection
        };

        let node = node.ok_or_else(|| {
            ProviderError::GraphQL("collection mutation returned no collection".into())
        })?;
        Ok(RemoteCategory {
            external_id: node.id,
            natural_key: node.handle,
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
        let input = Self::product_set_input(product, variants, category_external_id, existing);
        let data: ProductSetData = self
            .graphql(store, PRODUCT_SET, serde_json::json!({ "input": input }))
            .await?;
        check_user_errors("productSet", &data.product_set.user_errors)?;

        let node = data
            .product_set
            .product
            .ok_or_else(|| ProviderError::GraphQL("productSet returned no product".into()))?;
        Ok(Self::to_remote_product(&node))
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
        let Some(action) = Self::order_action(order.status) else {
            warn!(
                tenant_id = %store.tenant_id,
                store_id = %store.id,
                order_id = %order.id,
                status = order.status.as_str(),
                "no Shopify mapping for order status, skipping"
            );
            return Ok(());
        };

        let data: OrderMutationData = match action {
            OrderAction::Open => {
                self.graphql(
                    store,
                    ORDER_OPEN,
                    serde_json::json!({ "input": { "id": external_id } }),
                )
                .await?
            }
            OrderAction::Close => {
                self.graphql(
                    store,
                    ORDER_CLOSE,
                    serde_json::json!({ "input": { "id": external_id } }),
                )
                .await?
            }
            OrderAction::Cancel => {
                self.graphql(
                    store,
                    ORDER_CANCEL,
                    serde_json::json!({ "orderId": external_id }),
                )
                .await?
            }
        };
        check_user_errors("order status mutation", &data.payload.user_errors)
    }

    async fn pull_products(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteProductDetail>, ProviderError> {
        if natural_keys.is_empty() {
            return Ok(Vec::new());
        }
        let data: ProductsData = self
            .graphql(
                store,
                PRODUCTS_PULL,
                serde_json::json!({
                    "query": Self::handle_query(natural_keys),
                    "first": natural_keys.len(),
                }),
            )
            .await?;

        Ok(data
            .products
            .edges
            .into_iter()
            .map(|e| {
                let node = e.node;
                let variants: Vec<RemoteVariantDetail> = node
                    .variants
                    .edges
                    .iter()
                    .enumerate()
                    .map(|(i, edge)| RemoteVariantDetail {
                        external_id: edge.node.id.clone(),
                        sku: edge.node.sku.clone().filter(|s| !s.trim().is_empty()),
                        attributes: options_to_attributes(&edge.node.selected_options),
                        price: edge.node.price.as_deref().and_then(|p| p.parse().ok()),
                        position: edge.node.position.unwrap_or_else(|| {
                            i32::try_from(i).unwrap_or(i32::MAX)
                        }),
                    })
                    .collect();
                let price = variants
                    .iter()
                    .filter_map(|v| v.price)
                    .min()
                    .unwrap_or(Decimal::ZERO);
                RemoteProductDetail {
                    external_id: node.id,
                    natural_key: node.handle,
                    title: node.title.unwrap_or_default(),
                    description: node.description_html,
                    price,
                    currency: None,
                    variants,
                }
            })
            .collect())
    }

    fn verify_webhook(
        &self,
        store: &Store,
        _action: WebhookAction,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<bool, ProviderError> {
        let creds: ShopifyCredentials = parse_credentials(store)?;
        let Some(signature) = headers.get(HMAC_HEADER).and_then(|v| v.to_str().ok()) else {
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
        let order: ShopifyOrderWebhook = serde_json::from_value(payload.clone())?;

        let external_id = order
            .admin_graphql_api_id
            .clone()
            .or_else(|| order.id.map(|id| id.to_string()))
            .ok_or_else(|| ProviderError::Mapping("order webhook carried no id".into()))?;

        let name = order.customer.as_ref().map(|c| {
            format!(
                "{} {}",
                c.first_name.as_deref().unwrap_or_default(),
                c.last_name.as_deref().unwrap_or_default()
            )
            .trim()
            .to_string()
        });

        let line_items = order
            .line_items
            .iter()
            .map(|item| {
                let variant_key = item.sku.clone().filter(|s| !s.trim().is_empty());
                // Shopify order webhooks carry no product handle; fall back
                // to the SKU, then a slugified title.
                let product_key = variant_key
                    .clone()
                    .map(|sku| slugify(&sku))
                    .unwrap_or_else(|| slugify(&item.title));
                UnifiedLineItem {
                    product_key,
                    variant_key,
                    quantity: item.quantity,
                    unit_price: item.price.parse().unwrap_or(Decimal::ZERO),
                }
            })
            .collect();

        Ok(UnifiedOrderPayload {
            external_id,
            customer: CustomerInfo {
                name: name.filter(|n| !n.is_empty()),
                email: order.email,
                phone: order.customer.and_then(|c| c.phone),
            },
            line_items,
            payment_method: order.payment_gateway_names.into_iter().next(),
            payment_status: match order.financial_status.as_deref() {
                Some("paid" | "partially_paid") => PaymentStatus::Paid,
                Some("authorized") => PaymentStatus::Authorized,
                Some("refunded" | "partially_refunded") => PaymentStatus::Refunded,
                Some("voided") => PaymentStatus::Failed,
                _ => PaymentStatus::Pending,
            },
            shipping_cost: order
                .total_shipping_price_set
                .map(|s| s.shop_money.amount.parse().unwrap_or(Decimal::ZERO))
                .unwrap_or(Decimal::ZERO),
            currency: order.currency.unwrap_or_else(|| "USD".to_string()),
            placed_at: order.created_at,
        })
    }

    fn map_webhook_order_updated(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Option<StatusTransition>, ProviderError> {
        let order: ShopifyOrderWebhook = serde_json::from_value(payload.clone())?;

        let external_id = order
            .admin_graphql_api_id
            .clone()
            .or_else(|| order.id.map(|id| id.to_string()))
            .ok_or_else(|| ProviderError::Mapping("order webhook carried no id".into()))?;

        // Reverse status table. Cancellation and refund win over fulfillment.
        let (remote_status, mapped_status) = if order.cancelled_at.is_some() {
            ("cancelled", OrderStatus::Cancelled)
        } else if order.financial_status.as_deref() == Some("refunded") {
            ("refunded", OrderStatus::Refunded)
        } else {
            match order.fulfillment_status.as_deref() {
                Some("fulfilled") => ("fulfilled", OrderStatus::Shipped),
                Some("partial") => ("partial", OrderStatus::Processing),
                _ => return Ok(None),
            }
        };

        Ok(Some(StatusTransition {
            external_id,
            remote_status: remote_status.to_string(),
            mapped_status,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ShopifyOrderWebhook {
    id: Option<i64>,
    admin_graphql_api_id: Option<String>,
    email: Option<String>,
    currency: Option<String>,
    #[serde(default)]
    financial_status: Option<String>,
    #[serde(default)]
    fulfillment_status: Option<String>,
    #[serde(default)]
    cancelled_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    customer: Option<ShopifyCustomer>,
    #[serde(default)]
    line_items: Vec<ShopifyLineItem>,
    #[serde(default)]
    payment_gateway_names: Vec<String>,
    total_shipping_price_set: Option<ShopifyPriceSet>,
}

#[derive(Debug, Deserialize)]
struct ShopifyCustomer {
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShopifyLineItem {
    title: String,
    sku: Option<String>,
    quantity: u32,
    price: String,
}

#[derive(Debug, Deserialize)]
struct ShopifyPriceSet {
    shop_money: ShopifyMoney,
}

#[derive(Debug, Deserialize)]
struct ShopifyMoney {
    amount: String,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use storebridge_core::{StoreId, SyncStatus, TenantId};

    use crate::config::LimiterConfig;

    use super::*;

    fn adapter() -> ShopifyAdapter {
        ShopifyAdapter::new(
            reqwest::Client::new(),
            Arc::new(RequestExecutor::new(LimiterConfig::default())),
            "2026-01".to_string(),
        )
    }

    fn store_with_secret(secret: &str) -> Store {
        Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider: Provider::Shopify,
            credentials: SecretString::from(format!(
                "{{\"shop_domain\":\"demo.myshopify.com\",\"access_token\":\"shpat_test\",\"webhook_secret\":\"{secret}\"}}"
            )),
            active: true,
            sync_status: SyncStatus::Synced,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("key");
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_verify_webhook_accepts_valid_hmac() {
        let adapter = adapter();
        let store = store_with_secret("whsec_1");
        let body = br#"{"id":1001}"#;

        let mut headers = HeaderMap::new();
        headers.insert(
            HMAC_HEADER,
            sign("whsec_1", body).parse().expect("header value"),
        );

        assert!(
            adapter
                .verify_webhook(&store, WebhookAction::OrderCreate, &headers, body)
                .expect("verify")
        );
    }

    #[test]
    fn test_verify_webhook_rejects_bad_signature() {
        let adapter = adapter();
        let store = store_with_secret("whsec_1");
        let body = br#"{"id":1001}"#;

        let mut headers = HeaderMap::new();
        headers.insert(
            HMAC_HEADER,
            sign("wrong-secret", body).parse().expect("header value"),
        );

        assert!(
            !adapter
                .verify_webhook(&store, WebhookAction::OrderCreate, &headers, body)
                .expect("verify")
        );

        // Missing header is also a rejection, not an error.
        assert!(
            !adapter
                .verify_webhook(&store, WebhookAction::OrderCreate, &HeaderMap::new(), body)
                .expect("verify")
        );
    }

    #[test]
    fn test_map_order_created() {
        let adapter = adapter();
        let store = store_with_secret("whsec_1");
        let payload = serde_json::json!({
            "id": 5001,
            "admin_graphql_api_id": "gid://shopify/Order/5001",
            "email": "jo@example.com",
            "currency": "EUR",
            "financial_status": "paid",
            "created_at": "2026-03-01T10:00:00Z",
            "customer": { "first_name": "Jo", "last_name": "Bloom", "phone": "+3312345678" },
            "line_items": [
                { "title": "Linen Shirt", "sku": "LS-NAVY-M", "quantity": 2, "price": "39.90" },
                { "title": "Beach Towel", "sku": null, "quantity": 1, "price": "19.00" }
            ],
            "payment_gateway_names": ["shopify_payments"],
            "total_shipping_price_set": { "shop_money": { "amount": "4.99" } }
        });

        let unified = adapter
            .map_webhook_order_created(&store, &payload)
            .expect("map");

        assert_eq!(unified.external_id, "gid://shopify/Order/5001");
        assert_eq!(unified.customer.name.as_deref(), Some("Jo Bloom"));
        assert_eq!(unified.payment_status, PaymentStatus::Paid);
        assert_eq!(unified.shipping_cost, Decimal::new(499, 2));
        assert_eq!(unified.line_items.len(), 2);
        assert_eq!(unified.line_items[0].variant_key.as_deref(), Some("LS-NAVY-M"));
        assert_eq!(unified.line_items[0].product_key, "ls-navy-m");
        // No SKU: fall back to the slugified title.
        assert_eq!(unified.line_items[1].variant_key, None);
        assert_eq!(unified.line_items[1].product_key, "beach-towel");
    }

    #[test]
    fn test_map_order_updated_statuses() {
        let adapter = adapter();

        let fulfilled = serde_json::json!({
            "id": 5001,
            "fulfillment_status": "fulfilled"
        });
        let transition = adapter
            .map_webhook_order_updated(&fulfilled)
            .expect("map")
            .expect("mapped");
        assert_eq!(transition.mapped_status, OrderStatus::Shipped);
        assert_eq!(transition.remote_status, "fulfilled");
        assert_eq!(transition.external_id, "5001");

        let cancelled = serde_json::json!({
            "id": 5001,
            "cancelled_at": "2026-03-02T08:00:00Z",
            "fulfillment_status": "fulfilled"
        });
        let transition = adapter
            .map_webhook_order_updated(&cancelled)
            .expect("map")
            .expect("mapped");
        assert_eq!(transition.mapped_status, OrderStatus::Cancelled);

        // A status with no local equivalent maps to None.
        let unknown = serde_json::json!({ "id": 5001, "fulfillment_status": "restocked" });
        assert!(adapter.map_webhook_order_updated(&unknown).expect("map").is_none());
    }

    #[test]
    fn test_order_action_table() {
        assert_eq!(
            ShopifyAdapter::order_action(OrderStatus::Cancelled),
            Some(OrderAction::Cancel)
        );
        assert_eq!(
            ShopifyAdapter::order_action(OrderStatus::Shipped),
            Some(OrderAction::Close)
        );
        assert_eq!(ShopifyAdapter::order_action(OrderStatus::Pending), None);
        assert_eq!(ShopifyAdapter::order_action(OrderStatus::Refunded), None);
    }

    #[test]
    fn test_remote_variant_key_derivation() {
        let with_sku = VariantNode {
            id: "gid://shopify/ProductVariant/1".into(),
            sku: Some("SKU-1".into()),
            price: None,
            position: None,
            selected_options: vec![],
        };
        assert_eq!(remote_variant_key(0, &with_sku), "SKU-1");

        let with_options = VariantNode {
            id: "gid://shopify/ProductVariant/2".into(),
            sku: None,
            price: None,
            position: None,
            selected_options: vec![
                SelectedOption { name: "size".into(), value: "M".into() },
                SelectedOption { name: "color".into(), value: "blue".into() },
            ],
        };
        assert_eq!(remote_variant_key(0, &with_options), "color=blue;size=M");

        let bare = VariantNode {
            id: "gid://shopify/ProductVariant/3".into(),
            sku: None,
            price: None,
            position: None,
            selected_options: vec![],
        };
        assert_eq!(remote_variant_key(4, &bare), "position-4");
    }

    #[test]
    fn test_product_set_input_includes_id_only_on_update() {
        let product = Product {
            id: storebridge_core::ProductId::new(1),
            tenant_id: TenantId::generate(),
            title: "Linen Shirt".into(),
            slug: "linen-shirt".into(),
            description: None,
            price: Decimal::new(3990, 2),
            currency: "EUR".into(),
            category_id: None,
            active: true,
            external_ids: crate::models::ExternalIds::new(),
        };

        let create = ShopifyAdapter::product_set_input(&product, &[], None, None);
        assert!(create.get("id").is_none());

        let existing = RemoteProduct {
            external_id: "gid://shopify/Product/9".into(),
            natural_key: "linen-shirt".into(),
            variants: vec![],
        };
        let update = ShopifyAdapter::product_set_input(&product, &[], None, Some(&existing));
        assert_eq!(update["id"], "gid://shopify/Product/9");
    }
}
