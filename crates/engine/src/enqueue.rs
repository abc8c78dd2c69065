//! The fire-and-forget enqueue API consumed by the CRUD write path.
//!
//! The surrounding application calls these methods after catalog/order
//! mutations instead of relying on ORM lifecycle hooks; the caller gets a
//! job id back but no confirmation of remote success. Jobs carry entity ids
//! only. De-duplication keys collapse rapid successive edits of the same
//! entity into one pending job, and product syncs are debounced with a
//! short delay for the same reason.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use storebridge_core::{CategoryId, JobId, OrderId, ProductId, StoreId, TenantId};

use crate::db::StoreRepository;
use crate::error::SyncError;
use crate::models::Store;
use crate::queue::{JobQueue, NewJob, SyncTask};

/// Entry point for enqueueing sync work.
#[derive(Clone)]
pub struct SyncDispatcher {
    queue: Arc<dyn JobQueue>,
    stores: Arc<dyn StoreRepository>,
    product_debounce: Duration,
}

impl SyncDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        stores: Arc<dyn StoreRepository>,
        product_debounce: Duration,
    ) -> Self {
        Self {
            queue,
            stores,
            product_debounce,
        }
    }

    async fn store(&self, store_id: StoreId) -> Result<Store, SyncError> {
        self.stores
            .get(store_id)
            .await?
            .filter(|s| s.active)
            .ok_or(SyncError::StoreUnavailable(store_id))
    }

    /// Enqueue a single-category sync.
    ///
    /// # Errors
    ///
    /// Returns error when the store is unavailable or the enqueue fails.
    #[instrument(skip(self))]
    pub async fn enqueue_category_sync(
        &self,
        category_id: CategoryId,
        store_id: StoreId,
    ) -> Result<JobId, SyncError> {
        let store = self.store(store_id).await?;
        let job = NewJob::new(
            SyncTask::Category {
                category_id,
                store_id,
            },
            store.tenant_id,
            store.provider,
        )
        .with_dedup_key(format!("sync-category:{store_id}:{category_id}"));
        Ok(self.queue.enqueue(job).await?)
    }

    /// Enqueue a single-product sync, debounced so a burst of edits to the
    /// same product collapses into one job.
    ///
    /// # Errors
    ///
    /// Returns error when the store is unavailable or the enqueue fails.
    #[instrument(skip(self))]
    pub async fn enqueue_product_sync(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
        store_id: StoreId,
        delay: Option<Duration>,
    ) -> Result<JobId, SyncError> {
        let store = self.store(store_id).await?;
        debug_assert_eq!(store.tenant_id, tenant_id);
        let job = NewJob::new(
            SyncTask::Product {
                product_id,
                store_id,
            },
            store.tenant_id,
            store.provider,
        )
        .with_dedup_key(format!("sync-product:{store_id}:{product_id}"))
        .with_delay(delay.unwrap_or(self.product_debounce));
        Ok(self.queue.enqueue(job).await?)
    }

    /// Enqueue an order status push.
    ///
    /// # Errors
    ///
    /// Returns error when the store is unavailable or the enqueue fails.
    #[instrument(skip(self))]
    pub async fn enqueue_order_status_sync(
        &self,
        order_id: OrderId,
        store_id: StoreId,
    ) -> Result<JobId, SyncError> {
        let store = self.store(store_id).await?;
        let job = NewJob::new(
            SyncTask::OrderStatus { order_id, store_id },
            store.tenant_id,
            store.provider,
        )
        .with_dedup_key(format!("sync-order-status:{store_id}:{order_id}"));
        Ok(self.queue.enqueue(job).await?)
    }

    /// Enqueue a full-store sync.
    ///
    /// # Errors
    ///
    /// Returns error when the enqueue fails.
    #[instrument(skip(self, store), fields(store_id = %store.id))]
    pub async fn enqueue_full_store_sync(&self, store: &Store) -> Result<JobId, SyncError> {
        let job = NewJob::new(
            SyncTask::FullStore { store_id: store.id },
            store.tenant_id,
            store.provider,
        )
        .with_dedup_key(format!("sync-full-store:{}", store.id));
        Ok(self.queue.enqueue(job).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use secrecy::SecretString;

    use storebridge_core::{Provider, SyncStatus};

    use crate::db::MemoryStores;
    use crate::queue::MemoryJobQueue;

    use super::*;

    fn seeded() -> (SyncDispatcher, Arc<MemoryJobQueue>, Store) {
        let queue = Arc::new(MemoryJobQueue::new());
        let stores = Arc::new(MemoryStores::new());
        let store = Store {
            id: StoreId::generate(),
            tenant_id: TenantId::generate(),
            provider: Provider::WooCommerce,
            credentials: SecretString::from("{}"),
            active: true,
            sync_status: SyncStatus::Pending,
            last_sync_attempt_at: None,
            auto_sync: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        stores.insert(store.clone());
        let dispatcher =
            SyncDispatcher::new(queue.clone(), stores, Duration::from_secs(5));
        (dispatcher, queue, store)
    }

    #[tokio::test]
    async fn test_repeated_product_edits_collapse_to_one_job() {
        let (dispatcher, queue, store) = seeded();
        let product_id = ProductId::new(7);

        for _ in 0..5 {
            dispatcher
                .enqueue_product_sync(product_id, store.tenant_id, store.id, None)
                .await
                .expect("enqueue");
        }

        assert_eq!(queue.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_inactive_store_is_rejected() {
        let (dispatcher, _queue, store) = seeded();
        let missing = StoreId::generate();
        let err = dispatcher
            .enqueue_category_sync(CategoryId::new(1), missing)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
        drop(store);
    }

    #[tokio::test]
    async fn test_full_sync_jobs_dedup_per_store() {
        let (dispatcher, queue, store) = seeded();
        dispatcher
            .enqueue_full_store_sync(&store)
            .await
            .expect("enqueue");
        dispatcher
            .enqueue_full_store_sync(&store)
            .await
            .expect("enqueue");
        assert_eq!(queue.pending_count().await.expect("count"), 1);
    }
}
