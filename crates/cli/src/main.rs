//! Storebridge CLI - Database migrations and store management.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! storebridge migrate
//!
//! # List stores and their sync status
//! storebridge store list
//!
//! # Enqueue a full catalog sync for one store
//! storebridge store sync 6f2d8a9e-1c34-4b7f-9e21-0d5a6c3b8f10
//!
//! # Repair state left behind by a crashed process
//! storebridge recover
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "storebridge")]
#[command(author, version, about = "Storebridge CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage stores
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
    /// Repair sync state left behind by a crashed process
    Recover,
}

#[derive(Subcommand)]
enum StoreAction {
    /// List stores with their sync status
    List,
    /// Enqueue a full catalog sync for a store
    Sync {
        /// Store id (UUID)
        store_id: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Store { action } => match action {
            StoreAction::List => commands::store::list().await,
            StoreAction::Sync { store_id } => commands::store::sync(&store_id).await,
        },
        Commands::Recover => commands::recover::run().await,
    };

    if let Err(e) = result {
        tracing::error!("command failed: {e}");
        std::process::exit(1);
    }
}
