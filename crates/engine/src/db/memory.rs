//! In-memory repository implementations.
//!
//! Same observable semantics as the Postgres repositories, backed by maps
//! under a mutex. Used by tests and local development; the inherent
//! `insert_*` helpers stand in for the CRUD layer that owns these tables in
//! production.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use storebridge_core::{
    CategoryId, OrderId, OrderStatus, PaymentStatus, ProductId, Provider, StatusTransition,
    StoreId, SyncStatus, TenantId, UnifiedOrderPayload, VariantId,
};

use crate::models::{Category, ExternalIds, Order, Product, Store, Variant};
use crate::providers::RemoteProductDetail;

use super::{CatalogRepository, OrderRepository, RepositoryError, StoreRepository};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store repository.
#[derive(Default)]
pub struct MemoryStores {
    inner: Mutex<BTreeMap<StoreId, Store>>,
}

impl MemoryStores {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store.
    pub fn insert(&self, store: Store) {
        lock(&self.inner).insert(store.id, store);
    }
}

#[async_trait]
impl StoreRepository for MemoryStores {
    async fn get(&self, id: StoreId) -> Result<Option<Store>, RepositoryError> {
        Ok(lock(&self.inner).get(&id).cloned())
    }

    async fn find_active(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> Result<Option<Store>, RepositoryError> {
        Ok(lock(&self.inner)
            .values()
            .find(|s| s.tenant_id == tenant_id && s.provider == provider && s.active)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Store>, RepositoryError> {
        Ok(lock(&self.inner).values().cloned().collect())
    }

    async fn begin_sync(&self, id: StoreId) -> Result<Option<Store>, RepositoryError> {
        let mut stores = lock(&self.inner);
        let Some(store) = stores.get_mut(&id) else {
            return Ok(None);
        };
        if !store.active || store.sync_status == SyncStatus::Syncing {
            return Ok(None);
        }
        store.sync_status = SyncStatus::Syncing;
        store.last_sync_attempt_at = Some(Utc::now());
        store.updated_at = Utc::now();
        Ok(Some(store.clone()))
    }

    async fn finish_sync(&self, id: StoreId, status: SyncStatus) -> Result<(), RepositoryError> {
        let mut stores = lock(&self.inner);
        if let Some(store) = stores.get_mut(&id) {
            store.sync_status = status;
            store.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn recover_interrupted(&self) -> Result<u64, RepositoryError> {
        let mut stores = lock(&self.inner);
        let mut repaired = 0;
        for store in stores.values_mut() {
            if store.sync_status == SyncStatus::Syncing {
                store.sync_status = SyncStatus::Failed;
                store.updated_at = Utc::now();
                repaired += 1;
            }
        }
        Ok(repaired)
    }
}

/// In-memory catalog repository.
#[derive(Default)]
pub struct MemoryCatalog {
    inner: Mutex<CatalogInner>,
}

#[derive(Default)]
struct CatalogInner {
    categories: BTreeMap<i64, Category>,
    products: BTreeMap<i64, Product>,
    variants: BTreeMap<i64, Variant>,
    next_id: i64,
}

impl CatalogInner {
    fn next(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryCatalog {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a category.
    pub fn insert_category(&self, tenant_id: TenantId, name: &str, slug: &str) -> CategoryId {
        let mut inner = lock(&self.inner);
        let id = inner.next();
        inner.categories.insert(
            id,
            Category {
                id: CategoryId::new(id),
                tenant_id,
                name: name.to_string(),
                slug: slug.to_string(),
                parent_id: None,
                external_ids: ExternalIds::new(),
            },
        );
        CategoryId::new(id)
    }

    /// Seed a product.
    pub fn insert_product(
        &self,
        tenant_id: TenantId,
        title: &str,
        slug: &str,
        price: Decimal,
        category_id: Option<CategoryId>,
    ) -> ProductId {
        let mut inner = lock(&self.inner);
        let id = inner.next();
        inner.products.insert(
            id,
            Product {
                id: ProductId::new(id),
                tenant_id,
                title: title.to_string(),
                slug: slug.to_string(),
                description: None,
                price,
                currency: "USD".to_string(),
                category_id,
                active: true,
                external_ids: ExternalIds::new(),
            },
        );
        ProductId::new(id)
    }

    /// Seed a variant.
    pub fn insert_variant(
        &self,
        product_id: ProductId,
        sku: Option<&str>,
        attributes: BTreeMap<String, String>,
        position: i32,
    ) -> VariantId {
        let mut inner = lock(&self.inner);
        let id = inner.next();
        inner.variants.insert(
            id,
            Variant {
                id: VariantId::new(id),
                product_id,
                sku: sku.map(str::to_string),
                attributes,
                price: None,
                position,
                external_ids: ExternalIds::new(),
            },
        );
        VariantId::new(id)
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RepositoryError> {
        Ok(lock(&self.inner).categories.get(&id.as_i64()).cloned())
    }

    async fn product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(lock(&self.inner).products.get(&id.as_i64()).cloned())
    }

    async fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, RepositoryError> {
        let mut variants: Vec<Variant> = lock(&self.inner)
            .variants
            .values()
            .filter(|v| v.product_id == product_id)
            .cloned()
            .collect();
        variants.sort_by_key(|v| (v.position, v.id));
        Ok(variants)
    }

    async fn categories_page(
        &self,
        tenant_id: TenantId,
        after: Option<CategoryId>,
        limit: i64,
    ) -> Result<Vec<Category>, RepositoryError> {
        let cursor = after.map_or(0, |c| c.as_i64());
        Ok(lock(&self.inner)
            .categories
            .range(cursor + 1..)
            .filter(|(_, c)| c.tenant_id == tenant_id)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn products_page(
        &self,
        tenant_id: TenantId,
        after: Option<ProductId>,
        limit: i64,
    ) -> Result<Vec<Product>, RepositoryError> {
        let cursor = after.map_or(0, |p| p.as_i64());
        Ok(lock(&self.inner)
            .products
            .range(cursor + 1..)
            .filter(|(_, p)| p.tenant_id == tenant_id)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn set_category_external_id(
        &self,
        id: CategoryId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut inner = lock(&self.inner);
        let category = inner
            .categories
            .get_mut(&id.as_i64())
            .ok_or(RepositoryError::NotFound)?;
        category.external_ids.set(provider, external_id);
        Ok(())
    }

    async fn set_product_external_id(
        &self,
        id: ProductId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut inner = lock(&self.inner);
        let product = inner
            .products
            .get_mut(&id.as_i64())
            .ok_or(RepositoryError::NotFound)?;
        product.external_ids.set(provider, external_id);
        Ok(())
    }

    async fn set_variant_external_id(
        &self,
        id: VariantId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut inner = lock(&self.inner);
        let variant = inner
            .variants
            .get_mut(&id.as_i64())
            .ok_or(RepositoryError::NotFound)?;
        variant.external_ids.set(provider, external_id);
        Ok(())
    }

    async fn upsert_imported_product(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        remote: &RemoteProductDetail,
    ) -> Result<ProductId, RepositoryError> {
        let mut inner = lock(&self.inner);

        let existing_id = inner
            .products
            .values()
            .find(|p| p.tenant_id == tenant_id && p.slug == remote.natural_key)
            .map(|p| p.id.as_i64());

        let product_id = match existing_id {
            Some(id) => {
                let product = inner
                    .products
                    .get_mut(&id)
                    .ok_or(RepositoryError::NotFound)?;
                product.title.clone_from(&remote.title);
                product.description.clone_from(&remote.description);
                product.price = remote.price;
                product.external_ids.set(provider, &remote.external_id);
                id
            }
            None => {
                let id = inner.next();
                let mut external_ids = ExternalIds::new();
                external_ids.set(provider, &remote.external_id);
                inner.products.insert(
                    id,
                    Product {
                        id: ProductId::new(id),
                        tenant_id,
                        title: remote.title.clone(),
                        slug: remote.natural_key.clone(),
                        description: remote.description.clone(),
                        price: remote.price,
                        currency: remote.currency.clone().unwrap_or_else(|| "USD".to_string()),
                        category_id: None,
                        active: true,
                        external_ids,
                    },
                );
                id
            }
        };

        for remote_variant in &remote.variants {
            let matched = inner
                .variants
                .values()
                .filter(|v| v.product_id.as_i64() == product_id)
                .find(|v| {
                    if remote_variant.sku.is_some() {
                        v.sku.as_deref() == remote_variant.sku.as_deref()
                    } else {
                        v.position == remote_variant.position
                    }
                })
                .map(|v| v.id.as_i64());

            match matched {
                Some(id) => {
                    let variant = inner
                        .variants
                        .get_mut(&id)
                        .ok_or(RepositoryError::NotFound)?;
                    variant.sku.clone_from(&remote_variant.sku);
                    variant.attributes.clone_from(&remote_variant.attributes);
                    variant.price = remote_variant.price;
                    variant.position = remote_variant.position;
                    variant.external_ids.set(provider, &remote_variant.external_id);
                }
                None => {
                    let id = inner.next();
                    let mut external_ids = ExternalIds::new();
                    external_ids.set(provider, &remote_variant.external_id);
                    inner.variants.insert(
                        id,
                        Variant {
                            id: VariantId::new(id),
                            product_id: ProductId::new(product_id),
                            sku: remote_variant.sku.clone(),
                            attributes: remote_variant.attributes.clone(),
                            price: remote_variant.price,
                            position: remote_variant.position,
                            external_ids,
                        },
                    );
                }
            }
        }

        Ok(ProductId::new(product_id))
    }
}

/// In-memory order repository.
#[derive(Default)]
pub struct MemoryOrders {
    inner: Mutex<OrdersInner>,
}

#[derive(Default)]
struct OrdersInner {
    orders: BTreeMap<i64, Order>,
    next_id: i64,
}

impl MemoryOrders {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order.
    pub fn insert_order(
        &self,
        tenant_id: TenantId,
        store_id: StoreId,
        external_id: Option<&str>,
        status: OrderStatus,
    ) -> OrderId {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        let now = Utc::now();
        inner.orders.insert(
            id,
            Order {
                id: OrderId::new(id),
                tenant_id,
                store_id,
                external_id: external_id.map(str::to_string),
                status,
                remote_status: None,
                customer: storebridge_core::CustomerInfo::default(),
                line_items: Vec::new(),
                payment_method: None,
                payment_status: PaymentStatus::Pending,
                shipping_cost: Decimal::ZERO,
                currency: "USD".to_string(),
                placed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        OrderId::new(id)
    }
}

#[async_trait]
impl OrderRepository for MemoryOrders {
    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(lock(&self.inner).orders.get(&id.as_i64()).cloned())
    }

    async fn upsert_from_webhook(
        &self,
        store: &Store,
        payload: &UnifiedOrderPayload,
    ) -> Result<OrderId, RepositoryError> {
        let mut inner = lock(&self.inner);
        let now = Utc::now();

        if let Some(order) = inner
            .orders
            .values_mut()
            .find(|o| o.store_id == store.id && o.external_id.as_deref() == Some(&payload.external_id))
        {
            order.customer = payload.customer.clone();
            order.line_items.clone_from(&payload.line_items);
            order.payment_method.clone_from(&payload.payment_method);
            order.payment_status = payload.payment_status;
            order.shipping_cost = payload.shipping_cost;
            order.updated_at = now;
            return Ok(order.id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.orders.insert(
            id,
            Order {
                id: OrderId::new(id),
                tenant_id: store.tenant_id,
                store_id: store.id,
                external_id: Some(payload.external_id.clone()),
                status: OrderStatus::Pending,
                remote_status: None,
                customer: payload.customer.clone(),
                line_items: payload.line_items.clone(),
                payment_method: payload.payment_method.clone(),
                payment_status: payload.payment_status,
                shipping_cost: payload.shipping_cost,
                currency: payload.currency.clone(),
                placed_at: payload.placed_at,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(OrderId::new(id))
    }

    async fn apply_status_transition(
        &self,
        store: &Store,
        transition: &StatusTransition,
    ) -> Result<bool, RepositoryError> {
        let mut inner = lock(&self.inner);
        let Some(order) = inner.orders.values_mut().find(|o| {
            o.store_id == store.id && o.external_id.as_deref() == Some(&transition.external_id)
        }) else {
            return Ok(false);
        };
        order.status = transition.mapped_status;
        order.remote_status = Some(transition.remote_status.clone());
        order.updated_at = Utc::now();
        Ok(true)
    }
}
