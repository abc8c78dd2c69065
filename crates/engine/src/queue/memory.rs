//! In-memory job queue with the same semantics as the Postgres backend.
//!
//! Used by tests and local development. Not durable, single-process only.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use storebridge_core::{JobId, TenantId};

use super::{Job, JobQueue, NewJob, QueueError};

/// Non-durable queue backed by a `Vec` under a mutex.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: Vec<StoredJob>,
    active_groups: HashSet<TenantId>,
    seq: u64,
}

struct StoredJob {
    job: Job,
    seq: u64,
    active: bool,
}

impl MemoryJobQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a holder panicked; propagate the
        // inner state anyway since the queue has no invariants a panicking
        // reader could have broken.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, new_job: NewJob) -> Result<JobId, QueueError> {
        let now = Utc::now();
        let run_at = match new_job.delay {
            Some(delay) => {
                now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
            }
            None => now,
        };

        let mut inner = self.lock();

        // Dedup: replace the pending job with the same key, latest wins.
        if let Some(key) = &new_job.dedup_key {
            if let Some(existing) = inner
                .jobs
                .iter_mut()
                .find(|j| !j.active && j.job.dedup_key.as_deref() == Some(key.as_str()))
            {
                existing.job.task = new_job.task;
                existing.job.group_id = new_job.group_id;
                existing.job.provider = new_job.provider;
                existing.job.ordering_ts = new_job.ordering_ts;
                existing.job.run_at = run_at;
                existing.job.max_attempts = new_job.max_attempts;
                return Ok(existing.job.id);
            }
        }

        let id = JobId::generate();
        inner.seq += 1;
        let seq = inner.seq;
        inner.jobs.push(StoredJob {
            job: Job {
                id,
                task: new_job.task,
                group_id: new_job.group_id,
                provider: new_job.provider,
                ordering_ts: new_job.ordering_ts,
                run_at,
                dedup_key: new_job.dedup_key,
                attempts: 0,
                max_attempts: new_job.max_attempts,
            },
            seq,
            active: false,
        });
        Ok(id)
    }

    async fn claim(&self, _worker: &str) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut inner = self.lock();

        let candidate = inner
            .jobs
            .iter()
            .filter(|j| {
                !j.active && j.job.run_at <= now && !inner.active_groups.contains(&j.job.group_id)
            })
            .min_by_key(|j| (j.job.ordering_ts, j.seq))
            .map(|j| j.job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let group_id = {
            let stored = inner
                .jobs
                .iter_mut()
                .find(|j| j.job.id == id)
                .expect("claimed job still present under the lock");
            stored.active = true;
            stored.job.attempts += 1;
            stored.job.group_id
        };
        inner.active_groups.insert(group_id);

        let job = inner
            .jobs
            .iter()
            .find(|j| j.job.id == id)
            .map(|j| j.job.clone());
        Ok(job)
    }

    async fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if let Some(idx) = inner.jobs.iter().position(|j| j.job.id == job_id) {
            let stored = inner.jobs.swap_remove(idx);
            if stored.active {
                inner.active_groups.remove(&stored.job.group_id);
            }
        }
        Ok(())
    }

    async fn recover(&self) -> Result<u64, QueueError> {
        let mut inner = self.lock();
        let mut released = 0;
        for stored in &mut inner.jobs {
            if stored.active {
                stored.active = false;
                released += 1;
            }
        }
        inner.active_groups.clear();
        Ok(released)
    }

    async fn pending_count(&self) -> Result<u64, QueueError> {
        let inner = self.lock();
        Ok(inner.jobs.iter().filter(|j| !j.active).count() as u64)
    }
}
