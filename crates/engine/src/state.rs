//! Shared application state for the webhook ingress.

use std::sync::Arc;

use sqlx::PgPool;

use crate::db::StoreRepository;
use crate::sync::SyncService;

/// State handed to the axum webhook handlers.
#[derive(Clone)]
pub struct AppState {
    stores: Arc<dyn StoreRepository>,
    service: Arc<SyncService>,
    /// Present in production; `None` when running over in-memory backends.
    pool: Option<PgPool>,
}

impl AppState {
    /// Build the state.
    #[must_use]
    pub fn new(
        stores: Arc<dyn StoreRepository>,
        service: Arc<SyncService>,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            stores,
            service,
            pool,
        }
    }

    /// The store repository.
    #[must_use]
    pub fn stores(&self) -> &Arc<dyn StoreRepository> {
        &self.stores
    }

    /// The sync service.
    #[must_use]
    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// The database pool, when running against Postgres.
    #[must_use]
    pub const fn pool(&self) -> Option<&PgPool> {
        self.pool.as_ref()
    }
}
