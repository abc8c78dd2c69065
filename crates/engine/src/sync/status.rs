//! Store sync lifecycle: `pending -> syncing -> {synced, failed}`.
//!
//! All writes to a store's `sync_status` flow through [`SyncLifecycle`].
//! Status changes are broadcast to interested listeners (e.g. a live UI);
//! delivery is fire-and-forget and has no bearing on correctness.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use storebridge_core::{StoreId, SyncStatus, TenantId};

use crate::db::{RepositoryError, StoreRepository};
use crate::models::Store;

/// A store sync status change, as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub store_id: StoreId,
    pub tenant_id: TenantId,
    pub status: SyncStatus,
}

/// Guarded transitions over store sync status.
#[derive(Clone)]
pub struct SyncLifecycle {
    stores: Arc<dyn StoreRepository>,
    events: broadcast::Sender<StatusEvent>,
}

impl SyncLifecycle {
    /// Create the lifecycle over a store repository.
    #[must_use]
    pub fn new(stores: Arc<dyn StoreRepository>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { stores, events }
    }

    /// Subscribe to status change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Try to start a full sync: stamps the attempt and enters `syncing`.
    ///
    /// Returns `None` when the request is a no-op (store missing, inactive,
    /// or already syncing), which callers treat as "skip silently".
    ///
    /// # Errors
    ///
    /// Returns error if the status write fails.
    pub async fn begin(&self, store_id: StoreId) -> Result<Option<Store>, RepositoryError> {
        let Some(store) = self.stores.begin_sync(store_id).await? else {
            info!(store_id = %store_id, "full sync skipped (inactive or already syncing)");
            return Ok(None);
        };
        self.emit(&store, SyncStatus::Syncing);
        Ok(Some(store))
    }

    /// Mark a sync as finished successfully.
    ///
    /// # Errors
    ///
    /// Returns error if the status write fails.
    pub async fn complete(&self, store: &Store) -> Result<(), RepositoryError> {
        self.stores.finish_sync(store.id, SyncStatus::Synced).await?;
        info!(
            tenant_id = %store.tenant_id,
            store_id = %store.id,
            "full sync finished"
        );
        self.emit(store, SyncStatus::Synced);
        Ok(())
    }

    /// Mark a sync as failed, logging the original error.
    ///
    /// # Errors
    ///
    /// Returns error if the status write fails.
    pub async fn fail(
        &self,
        store: &Store,
        cause: &dyn std::error::Error,
    ) -> Result<(), RepositoryError> {
        self.stores.finish_sync(store.id, SyncStatus::Failed).await?;
        error!(
            tenant_id = %store.tenant_id,
            store_id = %store.id,
            error = %cause,
            "full sync failed"
        );
        self.emit(store, SyncStatus::Failed);
        Ok(())
    }

    /// Startup repair: any store still in `syncing` was interrupted by a
    /// crash and there is no way to know how far it got, so force it to
    /// `failed`. Must run before the worker pool starts accepting full-sync
    /// jobs.
    ///
    /// # Errors
    ///
    /// Returns error if the repair scan fails.
    pub async fn recover_on_boot(&self) -> Result<u64, RepositoryError> {
        let repaired = self.stores.recover_interrupted().await?;
        if repaired > 0 {
            warn!(count = repaired, "repaired stores left in syncing state by a previous crash");
        }
        Ok(repaired)
    }

    fn emit(&self, store: &Store, status: SyncStatus) {
        // Fire-and-forget: no subscribers is fine.
        let _ = self.events.send(StatusEvent {
            store_id: store.id,
            tenant_id: store.tenant_id,
            status,
        });
    }
}
