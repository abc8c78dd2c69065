//! Store management commands.

use std::sync::Arc;
use std::time::Duration;

use storebridge_core::StoreId;
use storebridge_engine::db::{PgStoreRepository, StoreRepository};
use storebridge_engine::enqueue::SyncDispatcher;
use storebridge_engine::queue::PostgresJobQueue;

use super::CliError;

/// Print all stores with their sync status.
pub async fn list() -> Result<(), CliError> {
    let pool = super::connect().await?;
    let stores = PgStoreRepository::new(pool).list_all().await?;

    #[allow(clippy::print_stdout)]
    {
        println!(
            "{:<38} {:<38} {:<12} {:<8} {:<8}",
            "STORE", "TENANT", "PROVIDER", "ACTIVE", "STATUS"
        );
        for store in stores {
            println!(
                "{:<38} {:<38} {:<12} {:<8} {:<8}",
                store.id,
                store.tenant_id,
                store.provider.as_str(),
                store.active,
                store.sync_status.as_str()
            );
        }
    }

    Ok(())
}

/// Enqueue a full catalog sync for one store.
pub async fn sync(store_id: &str) -> Result<(), CliError> {
    let store_id: StoreId = store_id
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("not a store id: {store_id}")))?;

    let pool = super::connect().await?;
    let stores: Arc<dyn StoreRepository> = Arc::new(PgStoreRepository::new(pool.clone()));
    let store = stores
        .get(store_id)
        .await?
        .ok_or_else(|| CliError::InvalidArgument(format!("no such store: {store_id}")))?;

    let dispatcher = SyncDispatcher::new(
        Arc::new(PostgresJobQueue::new(pool)),
        stores,
        Duration::from_secs(5),
    );
    let job_id = dispatcher.enqueue_full_store_sync(&store).await?;

    tracing::info!(store_id = %store.id, job_id = %job_id, "full sync enqueued");
    Ok(())
}
