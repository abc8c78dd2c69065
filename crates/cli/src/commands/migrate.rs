//! Database migration command.
//!
//! Migrations live in `crates/engine/migrations/` and are embedded into the
//! binary at compile time; running them is always an explicit operator
//! action, never an engine startup side effect.

use super::CliError;

/// Run engine database migrations.
pub async fn run() -> Result<(), CliError> {
    let pool = super::connect().await?;

    tracing::info!("Running engine migrations...");
    sqlx::migrate!("../engine/migrations").run(&pool).await?;
    tracing::info!("Migrations complete");

    Ok(())
}
