//! Unified error handling for the sync engine.

use thiserror::Error;

use storebridge_core::StoreId;

use crate::db::RepositoryError;
use crate::providers::ProviderError;
use crate::queue::QueueError;

/// Top-level error type for sync operations.
///
/// The taxonomy matters more than the variants: transient provider faults are
/// retried inside the rate-limited executor and only surface here once the
/// attempt budget is exhausted; everything else is a data or infrastructure
/// problem that retrying would not fix, so the worker logs it and drops the
/// job.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Job queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Provider call failed (after executor retries, where applicable).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A job referenced an entity that no longer exists locally.
    #[error("{kind} {id} not found")]
    MissingEntity {
        /// Entity kind, e.g. "product".
        kind: &'static str,
        /// The id the job carried.
        id: String,
    },

    /// No adapter is registered for the job's provider.
    #[error("no adapter registered for provider {0}")]
    UnknownProvider(String),

    /// The store referenced by a job is missing or disconnected.
    #[error("store {0} is not available for sync")]
    StoreUnavailable(StoreId),
}

impl SyncError {
    /// Whether this error represents a data/business problem (as opposed to
    /// an infrastructure fault). Business errors are logged and the job
    /// dropped; they will not self-heal by retrying.
    #[must_use]
    pub const fn is_business_error(&self) -> bool {
        match self {
            Self::MissingEntity { .. } | Self::UnknownProvider(_) | Self::StoreUnavailable(_) => {
                true
            }
            Self::Provider(e) => e.is_business_error(),
            Self::Repository(_) | Self::Queue(_) => false,
        }
    }
}
