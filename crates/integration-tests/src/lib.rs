//! Shared test harness: in-memory backends plus a scripted provider
//! adapter that records concurrency and batch behavior.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use storebridge_core::{
    Provider, StatusTransition, StoreId, SyncStatus, TenantId, UnifiedOrderPayload,
};
use storebridge_engine::config::WorkerConfig;
use storebridge_engine::db::{MemoryCatalog, MemoryOrders, MemoryStores};
use storebridge_engine::enqueue::SyncDispatcher;
use storebridge_engine::models::{Category, Order, Product, Store, Variant};
use storebridge_engine::providers::{
    AdapterRegistry, ProviderAdapter, ProviderError, RemoteCategory, RemoteProduct,
    RemoteProductDetail, RemoteVariant, WebhookAction,
};
use storebridge_engine::queue::{JobQueue, MemoryJobQueue};
use storebridge_engine::sync::{SyncLifecycle, SyncService};
use storebridge_engine::worker::WorkerPool;

/// Scripted remote platform shared by all [`ScriptedAdapter`] instances.
#[derive(Default)]
pub struct ScriptedPlatform {
    /// How long each push "takes" on the remote side.
    pub delay_ms: AtomicUsize,
    /// Tenants whose pushes fail with a remote error.
    pub failing_tenants: Mutex<HashSet<TenantId>>,
    /// Tenants whose bulk lookups fail outright (store-level failure).
    pub failing_bulk_tenants: Mutex<HashSet<TenantId>>,
    /// Remote categories by (tenant, slug).
    categories: Mutex<BTreeMap<(TenantId, String), String>>,
    /// Remote products by (tenant, slug).
    products: Mutex<BTreeMap<(TenantId, String), String>>,
    /// Sizes of every bulk category lookup, in call order.
    pub bulk_category_lookups: Mutex<Vec<usize>>,
    /// Per-tenant currently-executing sync count.
    active: Mutex<HashMap<TenantId, usize>>,
    /// Per-tenant high-water mark of concurrent syncs.
    pub max_active_per_tenant: Mutex<HashMap<TenantId, usize>>,
    /// Global high-water mark of concurrent syncs across tenants.
    pub max_active_global: AtomicUsize,
    global_active: AtomicUsize,
    /// Completed sync operations.
    pub completed: AtomicUsize,
    next_id: AtomicUsize,
}

impl ScriptedPlatform {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn assign_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }

    fn enter(&self, tenant: TenantId) {
        let mut active = self.active.lock().expect("lock");
        let count = active.entry(tenant).or_insert(0);
        *count += 1;
        let mut max = self.max_active_per_tenant.lock().expect("lock");
        let entry = max.entry(tenant).or_insert(0);
        *entry = (*entry).max(*count);

        let global = self.global_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_global.fetch_max(global, Ordering::SeqCst);
    }

    fn exit(&self, tenant: TenantId) {
        if let Some(count) = self.active.lock().expect("lock").get_mut(&tenant) {
            *count = count.saturating_sub(1);
        }
        self.global_active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn should_fail(&self, tenant: TenantId) -> bool {
        self.failing_tenants.lock().expect("lock").contains(&tenant)
    }

    async fn simulate_work(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
    }
}

/// A provider adapter scripted against [`ScriptedPlatform`].
pub struct ScriptedAdapter {
    platform: Arc<ScriptedPlatform>,
    provider: Provider,
}

impl ScriptedAdapter {
    #[must_use]
    pub const fn new(platform: Arc<ScriptedPlatform>, provider: Provider) -> Self {
        Self { platform, provider }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn find_category(
        &self,
        store: &Store,
        natural_key: &str,
    ) -> Result<Option<RemoteCategory>, ProviderError> {
        let categories = self.platform.categories.lock().expect("lock");
        Ok(categories
            .get(&(store.tenant_id, natural_key.to_string()))
            .map(|id| RemoteCategory {
                external_id: id.clone(),
                natural_key: natural_key.to_string(),
            }))
    }

    async fn find_categories_by_keys(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteCategory>, ProviderError> {
        if self
            .platform
            .failing_bulk_tenants
            .lock()
            .expect("lock")
            .contains(&store.tenant_id)
        {
            return Err(ProviderError::Remote {
                status: 503,
                message: "scripted outage".to_string(),
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
                categories
                    .get(&(store.tenant_id, key.clone()))
                    .map(|id| RemoteCategory {
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
        let products = self.platform.products.lock().expect("lock");
        Ok(products
            .get(&(store.tenant_id, natural_key.to_string()))
            .map(|id| RemoteProduct {
                external_id: id.clone(),
                natural_key: natural_key.to_string(),
                variants: Vec::new(),
            }))
    }

    async fn find_products_by_keys(
        &self,
        store: &Store,
        natural_keys: &[String],
    ) -> Result<Vec<RemoteProduct>, ProviderError> {
        let products = self.platform.products.lock().expect("lock");
        Ok(natural_keys
            .iter()
            .filter_map(|key| {
                products
                    .get(&(store.tenant_id, key.clone()))
                    .map(|id| RemoteProduct {
                        external_id: id.clone(),
                        natural_key: key.clone(),
                        variants: Vec::new(),
                    })
            })
            .collect())
    }

    async fn push_category(
        &self,
        store: &Store,
        category: &Category,
        existing: Option<&RemoteCategory>,
    ) -> Result<RemoteCategory, ProviderError> {
        self.platform.enter(store.tenant_id);
        self.platform.simulate_work().await;

        let result = if self.platform.should_fail(store.tenant_id) {
            Err(ProviderError::Remote {
                status: 500,
                message: "scripted failure".to_string(),
            })
        } else {
            let external_id = existing.map_or_else(
                || {
                    let id = self.platform.assign_id("cat");
                    self.platform
                        .categories
                        .lock()
                        .expect("lock")
                        .insert((store.tenant_id, category.slug.clone()), id.clone());
                    id
                },
                |existing| existing.external_id.clone(),
            );
            Ok(RemoteCategory {
                external_id,
                natural_key: category.slug.clone(),
            })
        };

        self.platform.exit(store.tenant_id);
        result
    }

    async fn push_product(
        &self,
        store: &Store,
        product: &Product,
        variants: &[Variant],
        _category_external_id: Option<&str>,
        existing: Option<&RemoteProduct>,
    ) -> Result<RemoteProduct, ProviderError> {
        self.platform.enter(store.tenant_id);
        self.platform.simulate_work().await;

        let result = if self.platform.should_fail(store.tenant_id) {
            Err(ProviderError::Remote {
                status: 500,
                message: "scripted failure".to_string(),
            })
        } else {
            let external_id = existing.map_or_else(
                || {
                    let id = self.platform.assign_id("prod");
                    self.platform
                        .products
                        .lock()
                        .expect("lock")
                        .insert((store.tenant_id, product.slug.clone()), id.clone());
                    id
                },
                |existing| existing.external_id.clone(),
            );
            Ok(RemoteProduct {
                external_id: external_id.clone(),
                natural_key: product.slug.clone(),
                variants: variants
                    .iter()
                    .map(|v| RemoteVariant {
                        external_id: format!("{external_id}/{}", v.natural_key()),
                        natural_key: v.natural_key(),
                    })
                    .collect(),
            })
        };

        self.platform.exit(store.tenant_id);
        result
    }

    async fn sync_order_status(&self, store: &Store, _order: &Order) -> Result<(), ProviderError> {
        self.platform.enter(store.tenant_id);
        self.platform.simulate_work().await;
        let result = if self.platform.should_fail(store.tenant_id) {
            Err(ProviderError::Remote {
                status: 500,
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        };
        self.platform.exit(store.tenant_id);
        result
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
                title: key.clone(),
                description: None,
                price: Decimal::new(500, 2),
                currency: None,
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

/// Everything a test needs, wired over in-memory backends.
pub struct TestHarness {
    pub queue: Arc<MemoryJobQueue>,
    pub stores: Arc<MemoryStores>,
    pub catalog: Arc<MemoryCatalog>,
    pub orders: Arc<MemoryOrders>,
    pub platform: Arc<ScriptedPlatform>,
    pub service: Arc<SyncService>,
    pub dispatcher: SyncDispatcher,
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        let queue = Arc::new(MemoryJobQueue::new());
        let stores = Arc::new(MemoryStores::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let orders = Arc::new(MemoryOrders::new());
        let platform = ScriptedPlatform::new();

        let mut adapters = AdapterRegistry::new();
        for provider in Provider::ALL {
            adapters.insert(Arc::new(ScriptedAdapter::new(
                Arc::clone(&platform),
                provider,
            )));
        }

        let lifecycle = SyncLifecycle::new(stores.clone());
        let service = Arc::new(SyncService::new(
            stores.clone(),
            catalog.clone(),
            orders.clone(),
            adapters,
            lifecycle,
        ));
        let dispatcher = SyncDispatcher::new(
            queue.clone(),
            stores.clone(),
            Duration::from_millis(0),
        );

        Self {
            queue,
            stores,
            catalog,
            orders,
            platform,
            service,
            dispatcher,
        }
    }

    /// Seed an active store for a fresh tenant.
    pub fn add_store(&self, provider: Provider) -> Store {
        let store = Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider,
            credentials: SecretString::from("{\"scripted\":true}"),
            active: true,
            sync_status: SyncStatus::Pending,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.stores.insert(store.clone());
        store
    }

    /// Start a worker pool; returns the shutdown token and the join handle.
    #[must_use]
    pub fn spawn_pool(
        &self,
        concurrency: usize,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let shutdown = CancellationToken::new();
        let queue: Arc<dyn JobQueue> = self.queue.clone();
        let pool = WorkerPool::new(
            queue,
            Arc::clone(&self.service),
            &WorkerConfig {
                concurrency,
                poll_interval: Duration::from_millis(10),
                product_debounce: Duration::from_millis(0),
            },
            shutdown.clone(),
        );
        (shutdown, tokio::spawn(pool.run()))
    }

    /// Poll until `condition` holds or the timeout elapses.
    ///
    /// # Panics
    ///
    /// Panics when the timeout elapses first.
    pub async fn wait_until<F: AsyncFn() -> bool>(&self, what: &str, condition: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition().await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
