//! CLI command implementations.

pub mod migrate;
pub mod recover;
pub mod store;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while running a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Engine(#[from] storebridge_engine::error::SyncError),

    #[error("Repository error: {0}")]
    Repository(#[from] storebridge_engine::db::RepositoryError),

    #[error("Queue error: {0}")]
    Queue(#[from] storebridge_engine::queue::QueueError),
}

/// Connect to the engine database from `DATABASE_URL`.
pub(crate) async fn connect() -> Result<PgPool, CliError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("DATABASE_URL"))?;

    Ok(storebridge_engine::db::create_pool(&database_url).await?)
}
