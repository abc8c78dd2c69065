//! Durable, tenant-ordered sync job queue.
//!
//! Jobs belong to a group (the tenant id). The queue guarantees at most one
//! in-flight job per group while allowing unlimited cross-group parallelism,
//! and orders jobs within a group by their explicit ordering timestamp, not
//! insertion order. An optional delay debounces rapid successive edits; an
//! optional de-duplication key collapses re-enqueues of the same entity into
//! one pending job (latest payload wins).

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storebridge_core::{CategoryId, JobId, OrderId, ProductId, Provider, StoreId, TenantId};

pub use memory::MemoryJobQueue;
pub use postgres::PostgresJobQueue;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job payload could not be (de)serialized.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The unit of work carried by a job: entity ids only, never full objects,
/// so jobs stay small and never act on stale data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SyncTask {
    #[serde(rename = "sync-category")]
    Category {
        category_id: CategoryId,
        store_id: StoreId,
    },
    #[serde(rename = "sync-product")]
    Product {
        product_id: ProductId,
        store_id: StoreId,
    },
    #[serde(rename = "sync-order-status")]
    OrderStatus {
        order_id: OrderId,
        store_id: StoreId,
    },
    #[serde(rename = "sync-full-store")]
    FullStore { store_id: StoreId },
}

impl SyncTask {
    /// The job type name, as stored in the `job_type` column.
    #[must_use]
    pub const fn job_type(&self) -> &'static str {
        match self {
            Self::Category { .. } => "sync-category",
            Self::Product { .. } => "sync-product",
            Self::OrderStatus { .. } => "sync-order-status",
            Self::FullStore { .. } => "sync-full-store",
        }
    }

    /// The store this task targets.
    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        match self {
            Self::Category { store_id, .. }
            | Self::Product { store_id, .. }
            | Self::OrderStatus { store_id, .. }
            | Self::FullStore { store_id } => *store_id,
        }
    }
}

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub task: SyncTask,
    /// Ordering/serialization group; equal to the tenant id.
    pub group_id: TenantId,
    pub provider: Provider,
    /// Explicit ordering timestamp; within a group, jobs run in this order.
    pub ordering_ts: DateTime<Utc>,
    /// Optional de-duplication key; reusing it replaces the pending job.
    pub dedup_key: Option<String>,
    /// Optional delay before the job becomes eligible to run.
    pub delay: Option<Duration>,
    pub max_attempts: u32,
}

impl NewJob {
    /// A job ordered at the current instant with no dedup key or delay.
    #[must_use]
    pub fn new(task: SyncTask, group_id: TenantId, provider: Provider) -> Self {
        Self {
            task,
            group_id,
            provider,
            ordering_ts: Utc::now(),
            dedup_key: None,
            delay: None,
            max_attempts: 1,
        }
    }

    /// Set the de-duplication key.
    #[must_use]
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Set the eligibility delay.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A claimed job, as handed to a worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task: SyncTask,
    pub group_id: TenantId,
    pub provider: Provider,
    pub ordering_ts: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub dedup_key: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// The queue contract.
///
/// All mutations (enqueue, claim, complete, recover) are atomic at the
/// backend level; the backing store is the only resource shared across
/// processes.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job, replacing any pending job with the same dedup key.
    ///
    /// # Errors
    ///
    /// Returns error if the backend write fails.
    async fn enqueue(&self, job: NewJob) -> Result<JobId, QueueError>;

    /// Claim the next runnable job: the oldest (by ordering timestamp)
    /// eligible job in any group with no in-flight job. Returns `None` when
    /// nothing is runnable right now.
    ///
    /// # Errors
    ///
    /// Returns error if the backend claim fails.
    async fn claim(&self, worker: &str) -> Result<Option<Job>, QueueError>;

    /// Mark a claimed job finished and release its group.
    ///
    /// # Errors
    ///
    /// Returns error if the backend write fails.
    async fn complete(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Clear in-progress locks left behind by a crashed process. Must run
    /// on boot before workers start claiming. Returns the number of jobs
    /// released.
    ///
    /// # Errors
    ///
    /// Returns error if the backend write fails.
    async fn recover(&self) -> Result<u64, QueueError>;

    /// Number of jobs currently pending (not claimed).
    ///
    /// # Errors
    ///
    /// Returns error if the backend read fails.
    async fn pending_count(&self) -> Result<u64, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_payload_is_tagged_with_job_type() {
        let task = SyncTask::Product {
            product_id: ProductId::new(7),
            store_id: StoreId::generate(),
        };
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["kind"], "sync-product");
        assert_eq!(json["product_id"], 7);
        assert_eq!(task.job_type(), "sync-product");

        let back: SyncTask = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, task);
    }
}
