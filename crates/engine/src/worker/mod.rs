//! Worker dispatch pool.
//!
//! A fixed number of workers drain the tenant-ordered queue with short
//! blocking polls. Every adapter failure is caught here, logged with job and
//! group context, and the job completes anyway — sync jobs are idempotent
//! and will be retried naturally by the next entity mutation or full sync,
//! so the pool deliberately never re-enqueues ("fail silently, log loudly").
//! One tenant's failure never stops the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WorkerConfig;
use crate::queue::JobQueue;
use crate::sync::SyncService;

/// Bounded pool of queue-draining workers.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    service: Arc<SyncService>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Create a pool; call [`run`](Self::run) to start draining.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        service: Arc<SyncService>,
        config: &WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            service,
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval,
            shutdown,
        }
    }

    /// Run until the shutdown token fires, then drain: workers stop
    /// claiming, finish their in-flight job, and return.
    pub async fn run(self) {
        info!(workers = self.concurrency, "worker pool starting");

        let workers: Vec<_> = (0..self.concurrency)
            .map(|index| {
                let queue = Arc::clone(&self.queue);
                let service = Arc::clone(&self.service);
                let shutdown = self.shutdown.clone();
                let poll_interval = self.poll_interval;
                tokio::spawn(worker_loop(
                    format!("worker-{index}"),
                    queue,
                    service,
                    poll_interval,
                    shutdown,
                ))
            })
            .collect();

        join_all(workers).await;
        info!("worker pool drained");
    }
}

async fn worker_loop(
    name: String,
    queue: Arc<dyn JobQueue>,
    service: Arc<SyncService>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let claimed = match queue.claim(&name).await {
            Ok(claimed) => claimed,
            Err(err) => {
                error!(worker = %name, error = %err, "queue claim failed");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => continue,
                }
            }
        };

        let Some(job) = claimed else {
            // Nothing runnable; short blocking poll so shutdown stays
            // responsive without spinning.
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(poll_interval) => continue,
            }
        };

        debug!(
            worker = %name,
            job_id = %job.id,
            group_id = %job.group_id,
            job_type = job.task.job_type(),
            "job claimed"
        );

        if let Err(err) = service.execute(&job).await {
            // The job is dropped, not re-enqueued; failures stay inside
            // this tenant.
            error!(
                worker = %name,
                job_id = %job.id,
                group_id = %job.group_id,
                job_type = job.task.job_type(),
                business = err.is_business_error(),
                error = %err,
                "job failed, dropping"
            );
        }

        if let Err(err) = queue.complete(job.id).await {
            error!(
                worker = %name,
                job_id = %job.id,
                group_id = %job.group_id,
                error = %err,
                "failed to complete job"
            );
        }
    }

    debug!(worker = %name, "worker stopped");
}
