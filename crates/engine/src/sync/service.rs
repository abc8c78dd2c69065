//! The sync service: every job the worker pool dispatches, the full-store
//! orchestration, reverse import, and inbound webhook ingestion.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use storebridge_core::{CategoryId, OrderId, ProductId, StoreId};

use crate::db::{CatalogRepository, OrderRepository, StoreRepository};
use crate::error::SyncError;
use crate::models::{Category, Product, Store, Variant};
use crate::providers::{AdapterRegistry, ProviderAdapter, RemoteVariant};
use crate::queue::{Job, SyncTask};

use super::reconcile::{CATEGORY_PAGE_SIZE, PRODUCT_PAGE_SIZE, match_variants};
use super::status::SyncLifecycle;

/// Row counts from one full-store sync. Failed rows were logged and skipped;
/// they never stall the batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FullSyncOutcome {
    pub categories_synced: usize,
    pub categories_failed: usize,
    pub products_synced: usize,
    pub products_failed: usize,
}

/// Orchestrates sync work across repositories and provider adapters.
#[derive(Clone)]
pub struct SyncService {
    stores: Arc<dyn StoreRepository>,
    catalog: Arc<dyn CatalogRepository>,
    orders: Arc<dyn OrderRepository>,
    adapters: AdapterRegistry,
    lifecycle: SyncLifecycle,
}

impl SyncService {
    /// Wire the service.
    #[must_use]
    pub fn new(
        stores: Arc<dyn StoreRepository>,
        catalog: Arc<dyn CatalogRepository>,
        orders: Arc<dyn OrderRepository>,
        adapters: AdapterRegistry,
        lifecycle: SyncLifecycle,
    ) -> Self {
        Self {
            stores,
            catalog,
            orders,
            adapters,
            lifecycle,
        }
    }

    /// The lifecycle handle (for boot recovery and status subscriptions).
    #[must_use]
    pub const fn lifecycle(&self) -> &SyncLifecycle {
        &self.lifecycle
    }

    /// Execute one claimed job.
    ///
    /// # Errors
    ///
    /// Propagates every failure to the worker pool, which logs it and drops
    /// the job.
    pub async fn execute(&self, job: &Job) -> Result<(), SyncError> {
        match job.task {
            SyncTask::Category {
                category_id,
                store_id,
            } => self.sync_category(category_id, store_id).await,
            SyncTask::Product {
                product_id,
                store_id,
            } => self.sync_product(product_id, store_id).await,
            SyncTask::OrderStatus { order_id, store_id } => {
                self.sync_order_status(order_id, store_id).await
            }
            SyncTask::FullStore { store_id } => {
                self.sync_full_store(store_id).await.map(|_| ())
            }
        }
    }

    async fn load_store(
        &self,
        store_id: StoreId,
    ) -> Result<(Store, Arc<dyn ProviderAdapter>), SyncError> {
        let store = self
            .stores
            .get(store_id)
            .await?
            .filter(|s| s.active)
            .ok_or(SyncError::StoreUnavailable(store_id))?;
        let adapter = self
            .adapters
            .get(store.provider)
            .ok_or_else(|| SyncError::UnknownProvider(store.provider.to_string()))?;
        Ok((store, adapter))
    }

    /// Sync one category: remote find-update-or-create, then write back the
    /// external id (at most one local write, skipped when unchanged).
    #[instrument(skip(self), fields(category_id = %category_id, store_id = %store_id))]
    pub async fn sync_category(
        &self,
        category_id: CategoryId,
        store_id: StoreId,
    ) -> Result<(), SyncError> {
        let (store, adapter) = self.load_store(store_id).await?;
        let category = self
            .catalog
            .category(category_id)
            .await?
            .ok_or_else(|| SyncError::MissingEntity {
                kind: "category",
                id: category_id.to_string(),
            })?;

        let remote = adapter.sync_category(&store, &category).await?;
        self.persist_category_id(&store, &category, &remote.external_id)
            .await?;
        Ok(())
    }

    /// Sync one product with its variants, resolving the category first.
    #[instrument(skip(self), fields(product_id = %product_id, store_id = %store_id))]
    pub async fn sync_product(
        &self,
        product_id: ProductId,
        store_id: StoreId,
    ) -> Result<(), SyncError> {
        let (store, adapter) = self.load_store(store_id).await?;
        let product = self
            .catalog
            .product(product_id)
            .await?
            .ok_or_else(|| SyncError::MissingEntity {
                kind: "product",
                id: product_id.to_string(),
            })?;
        let variants = self.catalog.variants_of(product.id).await?;

        let category_external_id = self
            .resolve_category(&store, adapter.as_ref(), product.category_id)
            .await?;
        let remote = adapter
            .sync_product(&store, &product, &variants, category_external_id.as_deref())
            .await?;

        self.persist_product_id(&store, &product, &remote.external_id)
            .await?;
        self.persist_variant_ids(&store, &variants, &remote.variants)
            .await?;
        Ok(())
    }

    /// Push an order's status. Missing mappings and missing external ids
    /// no-op inside the adapter.
    #[instrument(skip(self), fields(order_id = %order_id, store_id = %store_id))]
    pub async fn sync_order_status(
        &self,
        order_id: OrderId,
        store_id: StoreId,
    ) -> Result<(), SyncError> {
        let (store, adapter) = self.load_store(store_id).await?;
        let order = self
            .orders
            .order(order_id)
            .await?
            .ok_or_else(|| SyncError::MissingEntity {
                kind: "order",
                id: order_id.to_string(),
            })?;
        adapter.sync_order_status(&store, &order).await?;
        Ok(())
    }

    /// Full two-phase catalog push, guarded by the sync lifecycle.
    ///
    /// Returns `Ok(None)` when the request was a no-op (store inactive or
    /// already syncing). Any uncaught error forces the store to `failed`
    /// before propagating.
    ///
    /// # Errors
    ///
    /// Propagates repository and non-row-level provider failures.
    #[instrument(skip(self), fields(store_id = %store_id))]
    pub async fn sync_full_store(
        &self,
        store_id: StoreId,
    ) -> Result<Option<FullSyncOutcome>, SyncError> {
        // Resolve the adapter before flipping any state so a configuration
        // problem cannot strand the store in `syncing`.
        let probe = self
            .stores
            .get(store_id)
            .await?
            .ok_or(SyncError::StoreUnavailable(store_id))?;
        let adapter = self
            .adapters
            .get(probe.provider)
            .ok_or_else(|| SyncError::UnknownProvider(probe.provider.to_string()))?;

        let Some(store) = self.lifecycle.begin(store_id).await? else {
            return Ok(None);
        };

        match self.run_full_sync(&store, adapter.as_ref()).await {
            Ok(outcome) => {
                self.lifecycle.complete(&store).await?;
                info!(
                    tenant_id = %store.tenant_id,
                    store_id = %store.id,
                    categories = outcome.categories_synced,
                    products = outcome.products_synced,
                    "full store sync complete"
                );
                Ok(Some(outcome))
            }
            Err(err) => {
                self.lifecycle.fail(&store, &err).await?;
                Err(err)
            }
        }
    }

    async fn run_full_sync(
        &self,
        store: &Store,
        adapter: &dyn ProviderAdapter,
    ) -> Result<FullSyncOutcome, SyncError> {
        let mut outcome = FullSyncOutcome::default();

        // Phase 1: categories, pages of CATEGORY_PAGE_SIZE by ascending id.
        let mut cursor: Option<CategoryId> = None;
        loop {
            let page = self
                .catalog
                .categories_page(store.tenant_id, cursor, CATEGORY_PAGE_SIZE)
                .await?;
            let Some(last) = page.last() else { break };
            let last_id = last.id;

            let keys: Vec<String> = page.iter().map(|c| c.slug.clone()).collect();
            let remotes = adapter.find_categories_by_keys(store, &keys).await?;
            let by_key: HashMap<&str, _> = remotes
                .iter()
                .map(|r| (r.natural_key.as_str(), r))
                .collect();

            for category in &page {
                let existing = by_key.get(category.slug.as_str()).copied();
                match adapter.push_category(store, category, existing).await {
                    Ok(remote) => {
                        self.persist_category_id(store, category, &remote.external_id)
                            .await?;
                        outcome.categories_synced += 1;
                    }
                    Err(err) => {
                        // One bad row never stalls the batch.
                        warn!(
                            tenant_id = %store.tenant_id,
                            store_id = %store.id,
                            category_id = %category.id,
                            error = %err,
                            "category sync failed, continuing batch"
                        );
                        outcome.categories_failed += 1;
                    }
                }
            }

            // The cursor advances past failures too.
            cursor = Some(last_id);
            if (page.len() as i64) < CATEGORY_PAGE_SIZE {
                break;
            }
        }

        // Phase 2: products with variants, pages of PRODUCT_PAGE_SIZE.
        let mut cursor: Option<ProductId> = None;
        loop {
            let page = self
                .catalog
                .products_page(store.tenant_id, cursor, PRODUCT_PAGE_SIZE)
                .await?;
            let Some(last) = page.last() else { break };
            let last_id = last.id;

            let keys: Vec<String> = page.iter().map(|p| p.slug.clone()).collect();
            let remotes = adapter.find_products_by_keys(store, &keys).await?;
            let by_key: HashMap<&str, _> = remotes
                .iter()
                .map(|r| (r.natural_key.as_str(), r))
                .collect();

            for product in &page {
                match self
                    .sync_product_row(store, adapter, product, by_key.get(product.slug.as_str()).copied())
                    .await
                {
                    Ok(()) => outcome.products_synced += 1,
                    Err(err) => {
                        warn!(
                            tenant_id = %store.tenant_id,
                            store_id = %store.id,
                            product_id = %product.id,
                            error = %err,
                            "product sync failed, continuing batch"
                        );
                        outcome.products_failed += 1;
                    }
                }
            }

            cursor = Some(last_id);
            if (page.len() as i64) < PRODUCT_PAGE_SIZE {
                break;
            }
        }

        Ok(outcome)
    }

    async fn sync_product_row(
        &self,
        store: &Store,
        adapter: &dyn ProviderAdapter,
        product: &Product,
        existing: Option<&crate::providers::RemoteProduct>,
    ) -> Result<(), SyncError> {
        let variants = self.catalog.variants_of(product.id).await?;
        let category_external_id = self
            .resolve_category(store, adapter, product.category_id)
            .await?;
        let remote = adapter
            .push_product(
                store,
                product,
                &variants,
                category_external_id.as_deref(),
                existing,
            )
            .await?;
        self.persist_product_id(store, product, &remote.external_id)
            .await?;
        self.persist_variant_ids(store, &variants, &remote.variants)
            .await?;
        Ok(())
    }

    /// The external id of a product's category, syncing the category first
    /// when it has never been pushed to this provider.
    async fn resolve_category(
        &self,
        store: &Store,
        adapter: &dyn ProviderAdapter,
        category_id: Option<CategoryId>,
    ) -> Result<Option<String>, SyncError> {
        let Some(category_id) = category_id else {
            return Ok(None);
        };
        let Some(category) = self.catalog.category(category_id).await? else {
            warn!(
                tenant_id = %store.tenant_id,
                store_id = %store.id,
                category_id = %category_id,
                "product references a missing category"
            );
            return Ok(None);
        };

        if let Some(external_id) = category.external_ids.get(store.provider) {
            return Ok(Some(external_id.to_string()));
        }

        let remote = adapter.sync_category(store, &category).await?;
        self.catalog
            .set_category_external_id(category.id, store.provider, &remote.external_id)
            .await?;
        Ok(Some(remote.external_id))
    }

    /// Reverse direction: pull remote products by natural key and upsert
    /// them locally.
    ///
    /// # Errors
    ///
    /// Propagates provider and repository failures.
    #[instrument(skip(self, natural_keys), fields(store_id = %store_id, keys = natural_keys.len()))]
    pub async fn import_products(
        &self,
        store_id: StoreId,
        natural_keys: &[String],
    ) -> Result<Vec<ProductId>, SyncError> {
        let (store, adapter) = self.load_store(store_id).await?;
        let details = adapter.pull_products(&store, natural_keys).await?;

        let mut imported = Vec::with_capacity(details.len());
        for detail in &details {
            let product_id = self
                .catalog
                .upsert_imported_product(store.tenant_id, store.provider, detail)
                .await?;
            imported.push(product_id);
        }
        info!(
            tenant_id = %store.tenant_id,
            store_id = %store.id,
            imported = imported.len(),
            "imported products from provider"
        );
        Ok(imported)
    }

    /// Check an inbound webhook's authenticity against the store's
    /// credentials. Runs before any parsing or side effect.
    ///
    /// # Errors
    ///
    /// Returns error only when the store's credentials are unusable; a bad
    /// signature is `Ok(false)`.
    pub fn verify_webhook(
        &self,
        store: &Store,
        action: crate::providers::WebhookAction,
        headers: &axum::http::HeaderMap,
        body: &[u8],
    ) -> Result<bool, SyncError> {
        let adapter = self
            .adapters
            .get(store.provider)
            .ok_or_else(|| SyncError::UnknownProvider(store.provider.to_string()))?;
        Ok(adapter.verify_webhook(store, action, headers, body)?)
    }

    /// Ingest a verified "order created" webhook.
    ///
    /// # Errors
    ///
    /// Propagates mapping and repository failures.
    pub async fn ingest_order_created(
        &self,
        store: &Store,
        payload: &serde_json::Value,
    ) -> Result<OrderId, SyncError> {
        let adapter = self
            .adapters
            .get(store.provider)
            .ok_or_else(|| SyncError::UnknownProvider(store.provider.to_string()))?;
        let unified = adapter.map_webhook_order_created(store, payload)?;
        let order_id = self.orders.upsert_from_webhook(store, &unified).await?;
        info!(
            tenant_id = %store.tenant_id,
            store_id = %store.id,
            order_id = %order_id,
            external_id = %unified.external_id,
            "order ingested from webhook"
        );
        Ok(order_id)
    }

    /// Ingest a verified "order status" webhook. Returns whether a local
    /// order was updated; unmapped remote statuses are silently ignored.
    ///
    /// # Errors
    ///
    /// Propagates mapping and repository failures.
    pub async fn ingest_order_status(
        &self,
        store: &Store,
        payload: &serde_json::Value,
    ) -> Result<bool, SyncError> {
        let adapter = self
            .adapters
            .get(store.provider)
            .ok_or_else(|| SyncError::UnknownProvider(store.provider.to_string()))?;
        let Some(transition) = adapter.map_webhook_order_updated(payload)? else {
            debug!(
                store_id = %store.id,
                "status webhook has no local equivalent, ignoring"
            );
            return Ok(false);
        };

        let applied = self.orders.apply_status_transition(store, &transition).await?;
        if !applied {
            warn!(
                tenant_id = %store.tenant_id,
                store_id = %store.id,
                external_id = %transition.external_id,
                "status webhook for an order we do not have locally"
            );
        }
        Ok(applied)
    }

    async fn persist_category_id(
        &self,
        store: &Store,
        category: &Category,
        external_id: &str,
    ) -> Result<(), SyncError> {
        if category.external_ids.get(store.provider) != Some(external_id) {
            self.catalog
                .set_category_external_id(category.id, store.provider, external_id)
                .await?;
        }
        Ok(())
    }

    async fn persist_product_id(
        &self,
        store: &Store,
        product: &Product,
        external_id: &str,
    ) -> Result<(), SyncError> {
        if product.external_ids.get(store.provider) != Some(external_id) {
            self.catalog
                .set_product_external_id(product.id, store.provider, external_id)
                .await?;
        }
        Ok(())
    }

    async fn persist_variant_ids(
        &self,
        store: &Store,
        locals: &[Variant],
        remotes: &[RemoteVariant],
    ) -> Result<(), SyncError> {
        for (variant, matched) in match_variants(locals, remotes) {
            match matched {
                Some(remote) => {
                    if variant.external_ids.get(store.provider) != Some(remote.external_id.as_str())
                    {
                        self.catalog
                            .set_variant_external_id(
                                variant.id,
                                store.provider,
                                &remote.external_id,
                            )
                            .await?;
                    }
                }
                None => {
                    // A data problem, not an infrastructure one: log and
                    // keep going, retrying would not help.
                    warn!(
                        tenant_id = %store.tenant_id,
                        store_id = %store.id,
                        variant_id = %variant.id,
                        natural_key = %variant.natural_key(),
                        "variant has no remote counterpart after push"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::HeaderMap;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use storebridge_core::{
        Provider, StatusTransition, SyncStatus, TenantId, UnifiedOrderPayload,
    };

    use crate::db::{MemoryCatalog, MemoryOrders, MemoryStores};
    use crate::models::Order;
    use crate::providers::{
        ProviderError, RemoteCategory, RemoteProduct, RemoteProductDetail, WebhookAction,
    };

    use super::*;

    /// Scripted in-memory platform: remembers pushed entities and counts
    /// calls so tests can assert batch behavior.
    #[derive(Default)]
    struct FakePlatform {
        categories: Mutex<BTreeMap<String, String>>,
        products: Mutex<BTreeMap<String, String>>,
        bulk_category_lookups: Mutex<Vec<usize>>,
        bulk_product_lookups: Mutex<Vec<usize>>,
        category_creates: AtomicUsize,
        category_updates: AtomicUsize,
        product_creates: AtomicUsize,
        fail_category_slug: Mutex<Option<String>>,
        fail_bulk_lookups: AtomicUsize,
        next_id: AtomicUsize,
    }

    impl FakePlatform {
        fn assign_id(&self, prefix: &str) -> String {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{prefix}-{n}")
        }
    }

    struct FakeAdapter {
        platform: Arc<FakePlatform>,
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider(&self) -> Provider {
            Provider::EasyOrder
        }

        async fn find_category(
            &self,
            store: &Store,
            natural_key: &str,
        ) -> Result<Option<RemoteCategory>, ProviderError> {
            Ok(self
                .find_categories_by_keys(store, &[natural_key.to_string()])
                .await?
                .into_iter()
                .next())
        }

        async fn find_categories_by_keys(
            &self,
            _store: &Store,
            natural_keys: &[String],
        ) -> Result<Vec<RemoteCategory>, ProviderError> {
            if self.platform.fail_bulk_lookups.load(Ordering::SeqCst) > 0 {
                self.platform.fail_bulk_lookups.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Remote {
                    status: 500,
                    message: "platform exploded".to_string(),
                });
            }
            self.platform
                .bulk_category_lookups
                .lock()
                .expect("lock")
                .push(natural_keys.len());
            let categories = self.platform.categories.lock().expect("lock");
            Ok(natural_keys
                .iter()
                .filter_map(|key| {
                    categories.get(key).map(|id| RemoteCategory {
                        external_id: id.clone(),
                        natural_key: key.clone(),
                    })
                })
                .collect())
        }

        async fn find_product(
            &self,
            store: &Store,
            natural_key: &str,
        ) -> Result<Option<RemoteProduct>, ProviderError> {
            Ok(self
                .find_products_by_keys(store, &[natural_key.to_string()])
                .await?
                .into_iter()
                .next())
        }

        async fn find_products_by_keys(
            &self,
            _store: &Store,
            natural_keys: &[String],
        ) -> Result<Vec<RemoteProduct>, ProviderError> {
            self.platform
                .bulk_product_lookups
                .lock()
                .expect("lock")
                .push(natural_keys.len());
            let products = self.platform.products.lock().expect("lock");
            Ok(natural_keys
                .iter()
                .filter_map(|key| {
                    products.get(key).map(|id| RemoteProduct {
                        external_id: id.clone(),
                        natural_key: key.clone(),
                        variants: Vec::new(),
                    })
                })
                .collect())
        }

        async fn push_category(
            &self,
            _store: &Store,
            category: &Category,
            existing: Option<&RemoteCategory>,
        ) -> Result<RemoteCategory, ProviderError> {
            if self.platform.fail_category_slug.lock().expect("lock").as_deref()
                == Some(category.slug.as_str())
            {
                return Err(ProviderError::Remote {
                    status: 422,
                    message: "rejected".to_string(),
                });
            }
            let external_id = if let Some(existing) = existing {
                self.platform.category_updates.fetch_add(1, Ordering::SeqCst);
                existing.external_id.clone()
            } else {
                self.platform.category_creates.fetch_add(1, Ordering::SeqCst);
                let id = self.platform.assign_id("cat");
                self.platform
                    .categories
                    .lock()
                    .expect("lock")
                    .insert(category.slug.clone(), id.clone());
                id
            };
            Ok(RemoteCategory {
                external_id,
                natural_key: category.slug.clone(),
            })
        }

        async fn push_product(
            &self,
            _store: &Store,
            product: &Product,
            variants: &[Variant],
            _category_external_id: Option<&str>,
            existing: Option<&RemoteProduct>,
        ) -> Result<RemoteProduct, ProviderError> {
            let external_id = if let Some(existing) = existing {
                existing.external_id.clone()
            } else {
                self.platform.product_creates.fetch_add(1, Ordering::SeqCst);
                let id = self.platform.assign_id("prod");
                self.platform
                    .products
                    .lock()
                    .expect("lock")
                    .insert(product.slug.clone(), id.clone());
                id
            };
            let remote_variants = variants
                .iter()
                .map(|v| RemoteVariant {
                    external_id: format!("{external_id}-{}", v.natural_key()),
                    natural_key: v.natural_key(),
                })
                .collect();
            Ok(RemoteProduct {
                external_id,
                natural_key: product.slug.clone(),
                variants: remote_variants,
            })
        }

        async fn sync_order_status(
            &self,
            _store: &Store,
            _order: &Order,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn pull_products(
            &self,
            _store: &Store,
            natural_keys: &[String],
        ) -> Result<Vec<RemoteProductDetail>, ProviderError> {
            Ok(natural_keys
                .iter()
                .map(|key| RemoteProductDetail {
                    external_id: format!("remote-{key}"),
                    natural_key: key.clone(),
                    title: key.to_uppercase(),
                    description: None,
                    price: Decimal::new(1000, 2),
                    currency: Some("EUR".to_string()),
                    variants: Vec::new(),
                })
                .collect())
        }

        fn verify_webhook(
            &self,
            _store: &Store,
            _action: WebhookAction,
            _headers: &HeaderMap,
            _body: &[u8],
        ) -> Result<bool, ProviderError> {
            Ok(true)
        }

        fn map_webhook_order_created(
            &self,
            _store: &Store,
            _payload: &serde_json::Value,
        ) -> Result<UnifiedOrderPayload, ProviderError> {
            Err(ProviderError::Mapping("not scripted".to_string()))
        }

        fn map_webhook_order_updated(
            &self,
            _payload: &serde_json::Value,
        ) -> Result<Option<StatusTransition>, ProviderError> {
            Ok(None)
        }
    }

    struct Harness {
        stores: Arc<MemoryStores>,
        catalog: Arc<MemoryCatalog>,
        platform: Arc<FakePlatform>,
        service: SyncService,
        store_id: StoreId,
        tenant_id: TenantId,
    }

    fn harness() -> Harness {
        let stores = Arc::new(MemoryStores::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let orders = Arc::new(MemoryOrders::new());
        let platform = Arc::new(FakePlatform::default());

        let mut adapters = AdapterRegistry::new();
        adapters.insert(Arc::new(FakeAdapter {
            platform: Arc::clone(&platform),
        }));

        let tenant_id = TenantId::generate();
        let store = Store {
            id: StoreId::generate(),
            tenant_id,
            provider: Provider::EasyOrder,
            credentials: SecretString::from("{\"k\":\"v\"}"),
            active: true,
            sync_status: SyncStatus::Pending,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let store_id = store.id;
        stores.insert(store);

        let lifecycle = SyncLifecycle::new(stores.clone());
        let service = SyncService::new(
            stores.clone(),
            catalog.clone(),
            orders,
            adapters,
            lifecycle,
        );

        Harness {
            stores,
            catalog,
            platform,
            service,
            store_id,
            tenant_id,
        }
    }

    #[tokio::test]
    async fn test_full_sync_pages_categories_in_batches_of_thirty() {
        let h = harness();
        for i in 0..45 {
            h.catalog
                .insert_category(h.tenant_id, &format!("Category {i}"), &format!("category-{i}"));
        }

        let outcome = h
            .service
            .sync_full_store(h.store_id)
            .await
            .expect("sync")
            .expect("ran");

        assert_eq!(outcome.categories_synced, 45);
        // Exactly two bulk lookups: a full page of 30 and the remaining 15.
        let lookups = h.platform.bulk_category_lookups.lock().expect("lock").clone();
        assert_eq!(lookups, vec![30, 15]);
        assert_eq!(h.platform.category_creates.load(Ordering::SeqCst), 45);

        let store = h.stores.get(h.store_id).await.expect("get").expect("store");
        assert_eq!(store.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_full_sync_is_idempotent() {
        let h = harness();
        let category_id = h.catalog.insert_category(h.tenant_id, "Shoes", "shoes");
        let product_id = h.catalog.insert_product(
            h.tenant_id,
            "Runner",
            "runner",
            Decimal::new(9900, 2),
            Some(category_id),
        );
        h.catalog
            .insert_variant(product_id, Some("RUN-42"), BTreeMap::new(), 0);

        h.service.sync_full_store(h.store_id).await.expect("sync");
        let first_creates = h.platform.category_creates.load(Ordering::SeqCst)
            + h.platform.product_creates.load(Ordering::SeqCst);

        let category = h.catalog.category(category_id).await.expect("get").expect("row");
        let first_external = category
            .external_ids
            .get(Provider::EasyOrder)
            .expect("external id")
            .to_string();

        // Second run with no local changes: updates only, same external id.
        h.service.sync_full_store(h.store_id).await.expect("sync");
        let second_creates = h.platform.category_creates.load(Ordering::SeqCst)
            + h.platform.product_creates.load(Ordering::SeqCst);
        assert_eq!(first_creates, second_creates);

        let category = h.catalog.category(category_id).await.expect("get").expect("row");
        assert_eq!(
            category.external_ids.get(Provider::EasyOrder),
            Some(first_external.as_str())
        );
    }

    #[tokio::test]
    async fn test_full_sync_skips_bad_rows_and_continues() {
        let h = harness();
        for i in 0..3 {
            h.catalog
                .insert_category(h.tenant_id, &format!("C{i}"), &format!("c-{i}"));
        }
        *h.platform.fail_category_slug.lock().expect("lock") = Some("c-1".to_string());

        let outcome = h
            .service
            .sync_full_store(h.store_id)
            .await
            .expect("sync")
            .expect("ran");

        assert_eq!(outcome.categories_synced, 2);
        assert_eq!(outcome.categories_failed, 1);
        // A row failure does not fail the store.
        let store = h.stores.get(h.store_id).await.expect("get").expect("store");
        assert_eq!(store.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_full_sync_failure_marks_store_failed() {
        let h = harness();
        h.catalog.insert_category(h.tenant_id, "Shoes", "shoes");
        h.platform.fail_bulk_lookups.store(1, Ordering::SeqCst);

        let err = h.service.sync_full_store(h.store_id).await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(_)));

        let store = h.stores.get(h.store_id).await.expect("get").expect("store");
        assert_eq!(store.sync_status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_product_sync_resolves_category_first() {
        let h = harness();
        let category_id = h.catalog.insert_category(h.tenant_id, "Shoes", "shoes");
        let product_id = h.catalog.insert_product(
            h.tenant_id,
            "Runner",
            "runner",
            Decimal::new(9900, 2),
            Some(category_id),
        );
        h.catalog
            .insert_variant(product_id, Some("RUN-42"), BTreeMap::new(), 0);

        h.service
            .sync_product(product_id, h.store_id)
            .await
            .expect("sync");

        // The category was pushed on demand and its id persisted.
        let category = h.catalog.category(category_id).await.expect("get").expect("row");
        assert!(category.external_ids.get(Provider::EasyOrder).is_some());
        assert_eq!(h.platform.category_creates.load(Ordering::SeqCst), 1);

        // Product and variant external ids landed too.
        let product = h.catalog.product(product_id).await.expect("get").expect("row");
        assert!(product.external_ids.get(Provider::EasyOrder).is_some());
        let variants = h.catalog.variants_of(product_id).await.expect("variants");
        assert!(variants[0].external_ids.get(Provider::EasyOrder).is_some());
    }

    #[tokio::test]
    async fn test_import_products_upserts_locally() {
        let h = harness();

        let imported = h
            .service
            .import_products(h.store_id, &["imported-shirt".to_string()])
            .await
            .expect("import");
        assert_eq!(imported.len(), 1);

        let product = h
            .catalog
            .product(imported[0])
            .await
            .expect("get")
            .expect("row");
        assert_eq!(product.slug, "imported-shirt");
        assert_eq!(
            product.external_ids.get(Provider::EasyOrder),
            Some("remote-imported-shirt")
        );

        // Importing again reuses the same local row.
        let again = h
            .service
            .import_products(h.store_id, &["imported-shirt".to_string()])
            .await
            .expect("import");
        assert_eq!(again, imported);
    }

    #[tokio::test]
    async fn test_missing_entity_is_a_business_error() {
        let h = harness();
        let err = h
            .service
            .sync_product(ProductId::new(999), h.store_id)
            .await
            .unwrap_err();
        assert!(err.is_business_error());
    }
}
