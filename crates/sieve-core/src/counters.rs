//! Job counter aggregator.
//!
//! Every terminal task outcome goes through `record`. Counters only move via
//! `Store::increment_job_counters` (atomic, idempotent per task), and the
//! job flips to Completed through a compare-and-set so exactly one caller
//! runs the completion side effects.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{CounterDelta, Job, JobId, JobStatus, SieveError, StoreError};
use crate::ports::{Clock, Store};

pub struct JobCounterAggregator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl JobCounterAggregator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Apply one task's terminal delta and complete the job if this was the
    /// last outstanding task. Returns the job as it is after the update.
    pub async fn record(&self, job_id: JobId, delta: CounterDelta) -> Result<Job, SieveError> {
        let job = self
            .store
            .increment_job_counters(job_id, &delta, self.clock.now())
            .await?;
        debug!(
            job_id = %job_id,
            task_id = %delta.task_id,
            processed = job.processed_urls,
            total = job.total_urls,
            "job counters updated"
        );

        if job.all_processed() && !job.status.is_terminal() {
            return self.complete(job).await;
        }
        Ok(job)
    }

    async fn complete(&self, job: Job) -> Result<Job, SieveError> {
        let now = self.clock.now();
        let won = self
            .store
            .transition_job(
                job.id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobStatus::Completed,
                now,
            )
            .await?;

        if won {
            if !job.counters_balanced() {
                warn!(
                    job_id = %job.id,
                    processed = job.processed_urls,
                    succeeded = job.successful_urls,
                    failed = job.failed_urls,
                    rejected = job.rejected_urls,
                    "job completed with unbalanced counters"
                );
            }
            let archived = self.store.archive_job_tasks(job.id, now).await?;
            info!(
                job_id = %job.id,
                processed = job.processed_urls,
                succeeded = job.successful_urls,
                failed = job.failed_urls,
                rejected = job.rejected_urls,
                layer1_eliminated = job.layer1_eliminated,
                layer2_eliminated = job.layer2_eliminated,
                total_cost = job.total_cost,
                archived,
                "job completed"
            );
        }

        self.store
            .get_job(job.id)
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job.id).into())
    }
}
