//! `PostgreSQL` job queue backend.
//!
//! The `sync_jobs` table is the only cross-process shared resource in the
//! engine. Claims run inside a transaction serialized by an advisory lock so
//! the "no in-flight job in this group" check and the state flip are atomic;
//! dedup replacement rides on a partial unique index over pending rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use storebridge_core::{JobId, Provider, TenantId};

use super::{Job, JobQueue, NewJob, QueueError};

/// Durable queue backed by the `sync_jobs` table.
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
}

impl PostgresJobQueue {
    /// Create a queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_row(row: &PgRow) -> Result<Job, QueueError> {
    let id: Uuid = row.try_get("id")?;
    let group_id: Uuid = row.try_get("group_id")?;
    let provider: Provider = row.try_get("provider")?;
    let payload: serde_json::Value = row.try_get("payload")?;
    let ordering_ts: DateTime<Utc> = row.try_get("ordering_ts")?;
    let run_at: DateTime<Utc> = row.try_get("run_at")?;
    let dedup_key: Option<String> = row.try_get("dedup_key")?;
    let attempts: i32 = row.try_get("attempts")?;
    let max_attempts: i32 = row.try_get("max_attempts")?;

    Ok(Job {
        id: JobId::new(id),
        task: serde_json::from_value(payload)?,
        group_id: TenantId::new(group_id),
        provider,
        ordering_ts,
        run_at,
        dedup_key,
        attempts: u32::try_from(attempts).unwrap_or(0),
        max_attempts: u32::try_from(max_attempts).unwrap_or(0),
    })
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<JobId, QueueError> {
        let payload = serde_json::to_value(&job.task)?;
        let delay = job
            .delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero);
        let run_at = Utc::now() + delay;

        let id: Uuid = if job.dedup_key.is_some() {
            sqlx::query_scalar(
                r"
                INSERT INTO sync_jobs
                    (id, dedup_key, group_id, provider, job_type, payload,
                     ordering_ts, run_at, max_attempts)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (dedup_key) WHERE status = 'pending'
                DO UPDATE SET
                    group_id = EXCLUDED.group_id,
                    provider = EXCLUDED.provider,
                    job_type = EXCLUDED.job_type,
                    payload = EXCLUDED.payload,
                    ordering_ts = EXCLUDED.ordering_ts,
                    run_at = EXCLUDED.run_at,
                    max_attempts = EXCLUDED.max_attempts
                RETURNING id
                ",
            )
            .bind(Uuid::new_v4())
            .bind(&job.dedup_key)
            .bind(job.group_id.as_uuid())
            .bind(job.provider)
            .bind(job.task.job_type())
            .bind(&payload)
            .bind(job.ordering_ts)
            .bind(run_at)
            .bind(i32::try_from(job.max_attempts).unwrap_or(i32::MAX))
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar(
                r"
                INSERT INTO sync_jobs
                    (id, group_id, provider, job_type, payload,
                     ordering_ts, run_at, max_attempts)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                ",
            )
            .bind(Uuid::new_v4())
            .bind(job.group_id.as_uuid())
            .bind(job.provider)
            .bind(job.task.job_type())
            .bind(&payload)
            .bind(job.ordering_ts)
            .bind(run_at)
            .bind(i32::try_from(job.max_attempts).unwrap_or(i32::MAX))
            .fetch_one(&self.pool)
            .await?
        };

        Ok(JobId::new(id))
    }

    async fn claim(&self, worker: &str) -> Result<Option<Job>, QueueError> {
        let mut tx = self.pool.begin().await?;

        // Serialize claims so the group-availability check and the state
        // flip below cannot interleave between workers.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('sync_jobs_claim'))")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r"
            UPDATE sync_jobs
            SET status = 'active',
                locked_by = $1,
                locked_at = now(),
                attempts = attempts + 1
            WHERE id = (
                SELECT j.id
                FROM sync_jobs j
                WHERE j.status = 'pending'
                  AND j.run_at <= now()
                  AND NOT EXISTS (
                      SELECT 1 FROM sync_jobs a
                      WHERE a.group_id = j.group_id AND a.status = 'active'
                  )
                ORDER BY j.ordering_ts, j.created_at
                LIMIT 1
            )
            RETURNING id, dedup_key, group_id, provider, payload,
                      ordering_ts, run_at, attempts, max_attempts
            ",
        )
        .bind(worker)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        row.as_ref().map(map_row).transpose()
    }

    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM sync_jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recover(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r"
            UPDATE sync_jobs
            SET status = 'pending', locked_by = NULL, locked_at = NULL
            WHERE status = 'active'
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<u64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM sync_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
