//! `PostgreSQL` repository implementations.
//!
//! Queries use the runtime API with manual row mapping; JSONB columns
//! (external ids, variant attributes, order line items) are decoded through
//! serde.

use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use storebridge_core::{
    CategoryId, CustomerInfo, OrderId, ProductId, Provider, StatusTransition, StoreId, SyncStatus,
    TenantId, UnifiedOrderPayload, VariantId,
};

use crate::models::{Category, Order, Product, Store, Variant};
use crate::providers::RemoteProductDetail;

use super::{CatalogRepository, OrderRepository, RepositoryError, StoreRepository};

// Re-exported through db::mod; the three repositories share one pool.

/// Store repository over `stores`.
#[derive(Clone)]
pub struct PgStoreRepository {
    pool: PgPool,
}

/// Catalog repository over `categories`/`products`/`variants`.
#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: PgPool,
}

/// Order repository over `orders`.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgStoreRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PgCatalogRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PgOrderRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const STORE_COLUMNS: &str = "id, tenant_id, provider, credentials, active, sync_status, \
                             last_sync_attempt_at, auto_sync, created_at, updated_at";

fn map_store(row: &PgRow) -> Result<Store, RepositoryError> {
    let id: Uuid = row.try_get("id")?;
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let credentials: String = row.try_get("credentials")?;
    Ok(Store {
        id: StoreId::new(id),
        tenant_id: TenantId::new(tenant_id),
        provider: row.try_get("provider")?,
        credentials: SecretString::from(credentials),
        active: row.try_get("active")?,
        sync_status: row.try_get("sync_status")?,
        last_sync_attempt_at: row.try_get("last_sync_attempt_at")?,
        auto_sync: row.try_get("auto_sync")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    what: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_value(value)
        .map_err(|e| RepositoryError::DataCorruption(format!("{what}: {e}")))
}

fn map_category(row: &PgRow) -> Result<Category, RepositoryError> {
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let parent_id: Option<i64> = row.try_get("parent_id")?;
    let external_ids: serde_json::Value = row.try_get("external_ids")?;
    Ok(Category {
        id: CategoryId::new(row.try_get("id")?),
        tenant_id: TenantId::new(tenant_id),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        parent_id: parent_id.map(CategoryId::new),
        external_ids: decode_json(external_ids, "category external_ids")?,
    })
}

fn map_product(row: &PgRow) -> Result<Product, RepositoryError> {
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let category_id: Option<i64> = row.try_get("category_id")?;
    let external_ids: serde_json::Value = row.try_get("external_ids")?;
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        tenant_id: TenantId::new(tenant_id),
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        category_id: category_id.map(CategoryId::new),
        active: row.try_get("active")?,
        external_ids: decode_json(external_ids, "product external_ids")?,
    })
}

fn map_variant(row: &PgRow) -> Result<Variant, RepositoryError> {
    let attributes: serde_json::Value = row.try_get("attributes")?;
    let external_ids: serde_json::Value = row.try_get("external_ids")?;
    Ok(Variant {
        id: VariantId::new(row.try_get("id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        sku: row.try_get("sku")?,
        attributes: decode_json(attributes, "variant attributes")?,
        price: row.try_get("price")?,
        position: row.try_get("position")?,
        external_ids: decode_json(external_ids, "variant external_ids")?,
    })
}

fn map_order(row: &PgRow) -> Result<Order, RepositoryError> {
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let store_id: Uuid = row.try_get("store_id")?;
    let line_items: serde_json::Value = row.try_get("line_items")?;
    let payment_status: String = row.try_get("payment_status")?;
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        tenant_id: TenantId::new(tenant_id),
        store_id: StoreId::new(store_id),
        external_id: row.try_get("external_id")?,
        status: row.try_get("status")?,
        remote_status: row.try_get("remote_status")?,
        customer: CustomerInfo {
            name: row.try_get("customer_name")?,
            email: row.try_get("customer_email")?,
            phone: row.try_get("customer_phone")?,
        },
        line_items: decode_json(line_items, "order line_items")?,
        payment_method: row.try_get("payment_method")?,
        payment_status: payment_status.parse().map_err(|()| {
            RepositoryError::DataCorruption(format!("unknown payment status: {payment_status}"))
        })?,
        shipping_cost: row.try_get("shipping_cost")?,
        currency: row.try_get("currency")?,
        placed_at: row.try_get("placed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl StoreRepository for PgStoreRepository {
    async fn get(&self, id: StoreId) -> Result<Option<Store>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_store).transpose()
    }

    async fn find_active(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> Result<Option<Store>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {STORE_COLUMNS} FROM stores \
             WHERE tenant_id = $1 AND provider = $2 AND active"
        ))
        .bind(tenant_id.as_uuid())
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_store).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Store>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STORE_COLUMNS} FROM stores ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_store).collect()
    }

    async fn begin_sync(&self, id: StoreId) -> Result<Option<Store>, RepositoryError> {
        // The guard and the transition are one atomic statement: a store
        // that is inactive or already syncing is left untouched.
        let row = sqlx::query(&format!(
            "UPDATE stores \
             SET sync_status = 'syncing', last_sync_attempt_at = now(), updated_at = now() \
             WHERE id = $1 AND active AND sync_status <> 'syncing' \
             RETURNING {STORE_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_store).transpose()
    }

    async fn finish_sync(&self, id: StoreId, status: SyncStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE stores SET sync_status = $2, updated_at = now() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recover_interrupted(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE stores SET sync_status = 'failed', updated_at = now() \
             WHERE sync_status = 'syncing'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn set_external_id(
    pool: &PgPool,
    table: &str,
    id: i64,
    provider: Provider,
    external_id: &str,
) -> Result<(), RepositoryError> {
    let sql = format!(
        "UPDATE {table} \
         SET external_ids = jsonb_set(coalesce(external_ids, '{{}}'::jsonb), array[$2], to_jsonb($3::text)) \
         WHERE id = $1"
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(provider.as_str())
        .bind(external_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, slug, parent_id, external_ids \
             FROM categories WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_category).transpose()
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, title, slug, description, price, currency, \
                    category_id, active, external_ids \
             FROM products WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_product).transpose()
    }

    async fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, product_id, sku, attributes, price, position, external_ids \
             FROM variants WHERE product_id = $1 ORDER BY position, id",
        )
        .bind(product_id.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_variant).collect()
    }

    async fn categories_page(
        &self,
        tenant_id: TenantId,
        after: Option<CategoryId>,
        limit: i64,
    ) -> Result<Vec<Category>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, slug, parent_id, external_ids \
             FROM categories \
             WHERE tenant_id = $1 AND id > $2 \
             ORDER BY id \
             LIMIT $3",
        )
        .bind(tenant_id.as_uuid())
        .bind(after.map_or(0, |c| c.as_i64()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_category).collect()
    }

    async fn products_page(
        &self,
        tenant_id: TenantId,
        after: Option<ProductId>,
        limit: i64,
    ) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, title, slug, description, price, currency, \
                    category_id, active, external_ids \
             FROM products \
             WHERE tenant_id = $1 AND id > $2 \
             ORDER BY id \
             LIMIT $3",
        )
        .bind(tenant_id.as_uuid())
        .bind(after.map_or(0, |p| p.as_i64()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_product).collect()
    }

    async fn set_category_external_id(
        &self,
        id: CategoryId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError> {
        set_external_id(&self.pool, "categories", id.as_i64(), provider, external_id).await
    }

    async fn set_product_external_id(
        &self,
        id: ProductId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError> {
        set_external_id(&self.pool, "products", id.as_i64(), provider, external_id).await
    }

    async fn set_variant_external_id(
        &self,
        id: VariantId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError> {
        set_external_id(&self.pool, "variants", id.as_i64(), provider, external_id).await
    }

    async fn upsert_imported_product(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        remote: &RemoteProductDetail,
    ) -> Result<ProductId, RepositoryError> {
        // Products are matched by their natural key (tenant, slug).
        let product_id: i64 = sqlx::query_scalar(
            "INSERT INTO products (tenant_id, title, slug, description, price, currency, active) \
             VALUES ($1, $2, $3, $4, $5, $6, true) \
             ON CONFLICT (tenant_id, slug) DO UPDATE SET \
                 title = EXCLUDED.title, \
                 description = EXCLUDED.description, \
                 price = EXCLUDED.price \
             RETURNING id",
        )
        .bind(tenant_id.as_uuid())
        .bind(&remote.title)
        .bind(&remote.natural_key)
        .bind(&remote.description)
        .bind(remote.price)
        .bind(remote.currency.as_deref().unwrap_or("USD"))
        .fetch_one(&self.pool)
        .await?;

        set_external_id(&self.pool, "products", product_id, provider, &remote.external_id).await?;

        let existing = self.variants_of(ProductId::new(product_id)).await?;
        for remote_variant in &remote.variants {
            // Match by SKU when both sides have one, else by position.
            let matched = existing
                .iter()
                .find(|v| {
                    remote_variant.sku.is_some()
                        && v.sku.as_deref() == remote_variant.sku.as_deref()
                })
                .or_else(|| {
                    remote_variant
                        .sku
                        .is_none()
                        .then(|| existing.iter().find(|v| v.position == remote_variant.position))
                        .flatten()
                });

            let attributes = serde_json::to_value(&remote_variant.attributes)
                .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;

            let variant_id: i64 = if let Some(variant) = matched {
                sqlx::query_scalar(
                    "UPDATE variants \
                     SET sku = $2, attributes = $3, price = $4, position = $5 \
                     WHERE id = $1 RETURNING id",
                )
                .bind(variant.id.as_i64())
                .bind(&remote_variant.sku)
                .bind(&attributes)
                .bind(remote_variant.price)
                .bind(remote_variant.position)
                .fetch_one(&self.pool)
                .await?
            } else {
                sqlx::query_scalar(
                    "INSERT INTO variants (product_id, sku, attributes, price, position) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING id",
                )
                .bind(product_id)
                .bind(&remote_variant.sku)
                .bind(&attributes)
                .bind(remote_variant.price)
                .bind(remote_variant.position)
                .fetch_one(&self.pool)
                .await?
            };

            set_external_id(
                &self.pool,
                "variants",
                variant_id,
                provider,
                &remote_variant.external_id,
            )
            .await?;
        }

        Ok(ProductId::new(product_id))
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, store_id, external_id, status, remote_status, \
                    customer_name, customer_email, customer_phone, line_items, \
                    payment_method, payment_status, shipping_cost, currency, placed_at, \
                    created_at, updated_at \
             FROM orders WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_order).transpose()
    }

    async fn upsert_from_webhook(
        &self,
        store: &Store,
        payload: &UnifiedOrderPayload,
    ) -> Result<OrderId, RepositoryError> {
        let line_items = serde_json::to_value(&payload.line_items)
            .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO orders \
                 (tenant_id, store_id, external_id, status, customer_name, customer_email, \
                  customer_phone, line_items, payment_method, payment_status, shipping_cost, \
                  currency, placed_at) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (store_id, external_id) DO UPDATE SET \
                 customer_name = EXCLUDED.customer_name, \
                 customer_email = EXCLUDED.customer_email, \
                 customer_phone = EXCLUDED.customer_phone, \
                 line_items = EXCLUDED.line_items, \
                 payment_method = EXCLUDED.payment_method, \
                 payment_status = EXCLUDED.payment_status, \
                 shipping_cost = EXCLUDED.shipping_cost, \
                 updated_at = now() \
             RETURNING id",
        )
        .bind(store.tenant_id.as_uuid())
        .bind(store.id.as_uuid())
        .bind(&payload.external_id)
        .bind(&payload.customer.name)
        .bind(&payload.customer.email)
        .bind(&payload.customer.phone)
        .bind(&line_items)
        .bind(&payload.payment_method)
        .bind(payload.payment_status.as_str())
        .bind(payload.shipping_cost)
        .bind(&payload.currency)
        .bind(payload.placed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderId::new(id))
    }

    async fn apply_status_transition(
        &self,
        store: &Store,
        transition: &StatusTransition,
    ) -> Result<bool, RepositoryError> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE orders \
             SET status = $3, remote_status = $4, updated_at = now() \
             WHERE store_id = $1 AND external_id = $2 \
             RETURNING id",
        )
        .bind(store.id.as_uuid())
        .bind(&transition.external_id)
        .bind(transition.mapped_status)
        .bind(&transition.remote_status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated.is_some())
    }
}
