//! Persistence seams for the sync engine.
//!
//! The engine reads stores, catalog rows, and orders through the repository
//! traits below and writes back only external ids, sync status, and inbound
//! order data. The Postgres implementations live in [`postgres`]; in-memory
//! implementations with identical semantics (used by tests and local
//! development) live in [`memory`].
//!
//! # Migrations
//!
//! Migrations are stored in `crates/engine/migrations/` and run via:
//! ```bash
//! cargo run -p storebridge-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use storebridge_core::{
    CategoryId, OrderId, ProductId, Provider, StatusTransition, StoreId, SyncStatus, TenantId,
    UnifiedOrderPayload, VariantId,
};

use crate::models::{Category, Order, Product, Store, Variant};
use crate::providers::RemoteProductDetail;

pub use memory::{MemoryCatalog, MemoryOrders, MemoryStores};
pub use postgres::{PgCatalogRepository, PgOrderRepository, PgStoreRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns error if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url.expose_secret())
        .await?;
    Ok(pool)
}

/// Store access plus the guarded sync-status transitions.
///
/// `sync_status` is only ever written through `begin_sync`, `finish_sync`,
/// and `recover_interrupted` so the lifecycle invariants hold everywhere.
#[async_trait]
pub trait StoreRepository: Send + Sync {
    /// Fetch a store by id.
    async fn get(&self, id: StoreId) -> Result<Option<Store>, RepositoryError>;

    /// The active store for a (tenant, provider) pair, if any.
    async fn find_active(
        &self,
        tenant_id: TenantId,
        provider: Provider,
    ) -> Result<Option<Store>, RepositoryError>;

    /// All stores, for management tooling.
    async fn list_all(&self) -> Result<Vec<Store>, RepositoryError>;

    /// Atomically enter `syncing` and stamp the attempt, returning the
    /// updated store. Returns `None` (a no-op) when the store is inactive
    /// or a sync is already running.
    async fn begin_sync(&self, id: StoreId) -> Result<Option<Store>, RepositoryError>;

    /// Leave `syncing` into a terminal status (`synced` or `failed`).
    async fn finish_sync(&self, id: StoreId, status: SyncStatus) -> Result<(), RepositoryError>;

    /// Force every store stuck in `syncing` (a crashed process) to
    /// `failed`. Returns how many stores were repaired.
    async fn recover_interrupted(&self) -> Result<u64, RepositoryError>;
}

/// Catalog reads plus external-id writeback.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Fetch a category by id.
    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RepositoryError>;

    /// Fetch a product by id.
    async fn product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// A product's variants ordered by position.
    async fn variants_of(&self, product_id: ProductId) -> Result<Vec<Variant>, RepositoryError>;

    /// One page of a tenant's categories, primary key ascending, starting
    /// after the cursor.
    async fn categories_page(
        &self,
        tenant_id: TenantId,
        after: Option<CategoryId>,
        limit: i64,
    ) -> Result<Vec<Category>, RepositoryError>;

    /// One page of a tenant's products, primary key ascending, starting
    /// after the cursor.
    async fn products_page(
        &self,
        tenant_id: TenantId,
        after: Option<ProductId>,
        limit: i64,
    ) -> Result<Vec<Product>, RepositoryError>;

    /// Record a category's external id for a provider.
    async fn set_category_external_id(
        &self,
        id: CategoryId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Record a product's external id for a provider.
    async fn set_product_external_id(
        &self,
        id: ProductId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Record a variant's external id for a provider.
    async fn set_variant_external_id(
        &self,
        id: VariantId,
        provider: Provider,
        external_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Upsert a product pulled from a platform (matched by slug), including
    /// its variants and external ids. Returns the local product id.
    async fn upsert_imported_product(
        &self,
        tenant_id: TenantId,
        provider: Provider,
        remote: &RemoteProductDetail,
    ) -> Result<ProductId, RepositoryError>;
}

/// Order reads plus inbound webhook writes.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fetch an order by id.
    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Insert or refresh an order from an "order created" webhook, matched
    /// by (store, external id). Returns the local order id.
    async fn upsert_from_webhook(
        &self,
        store: &Store,
        payload: &UnifiedOrderPayload,
    ) -> Result<OrderId, RepositoryError>;

    /// Apply an inbound status transition to the order with the given
    /// external id. Returns `false` when no such order exists locally.
    async fn apply_status_transition(
        &self,
        store: &Store,
        transition: &StatusTransition,
    ) -> Result<bool, RepositoryError>;
}
