//! Manual recovery command.
//!
//! The engine runs the same repair scan on boot; this command exists for
//! operators who want to clear crashed state without restarting anything.

use std::sync::Arc;

use storebridge_engine::db::PgStoreRepository;
use storebridge_engine::queue::{JobQueue, PostgresJobQueue};
use storebridge_engine::sync::SyncLifecycle;

use super::CliError;

/// Force interrupted stores to `failed` and release stale queue locks.
pub async fn run() -> Result<(), CliError> {
    let pool = super::connect().await?;

    let lifecycle = SyncLifecycle::new(Arc::new(PgStoreRepository::new(pool.clone())));
    let repaired = lifecycle.recover_on_boot().await?;

    let queue = PostgresJobQueue::new(pool);
    let released = queue.recover().await?;

    tracing::info!(
        stores_repaired = repaired,
        jobs_released = released,
        "recovery complete"
    );
    Ok(())
}
