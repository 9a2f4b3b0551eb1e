//! Job record and counter deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};

/// Job lifecycle.
///
/// - Pending -> Processing -> Completed
/// - Pending | Processing -> Cancelled
/// - Failed is reserved for job-level failures (submission could not be queued).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// A submitted batch of URLs with its outcome tallies.
///
/// Counters are only ever changed through `Store::increment_job_counters`;
/// nothing overwrites them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub total_urls: u64,
    pub processed_urls: u64,
    pub successful_urls: u64,
    pub failed_urls: u64,
    pub rejected_urls: u64,
    pub layer1_eliminated: u64,
    pub layer2_eliminated: u64,
    pub total_cost: f64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, total_urls: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            total_urls,
            processed_urls: 0,
            successful_urls: 0,
            failed_urls: 0,
            rejected_urls: 0,
            layer1_eliminated: 0,
            layer2_eliminated: 0,
            total_cost: 0.0,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a delta. Only the store calls this, under its own atomicity.
    pub fn apply(&mut self, delta: &CounterDelta, now: DateTime<Utc>) {
        self.processed_urls += delta.processed;
        self.successful_urls += delta.succeeded;
        self.failed_urls += delta.failed;
        self.rejected_urls += delta.rejected;
        self.layer1_eliminated += delta.layer1_eliminated;
        self.layer2_eliminated += delta.layer2_eliminated;
        self.total_cost += delta.cost;
        self.updated_at = now;
    }

    pub fn all_processed(&self) -> bool {
        self.processed_urls >= self.total_urls
    }

    /// processed == succeeded + failed + rejected
    pub fn counters_balanced(&self) -> bool {
        self.processed_urls == self.successful_urls + self.failed_urls + self.rejected_urls
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_urls == 0 {
            return 100.0;
        }
        let pct = self.processed_urls as f64 / self.total_urls as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Terminal bucket a task lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Succeeded,
    Failed,
    Rejected,
}

/// One task's contribution to its job's counters.
///
/// Keyed by `task_id` so re-applying the same delta (duplicate delivery after a
/// crash) is a no-op in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub task_id: TaskId,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    pub layer1_eliminated: u64,
    pub layer2_eliminated: u64,
    pub cost: f64,
}

impl CounterDelta {
    /// A terminal outcome: processed + exactly one bucket.
    pub fn terminal(task_id: TaskId, bucket: Bucket) -> Self {
        Self {
            task_id,
            processed: 1,
            succeeded: u64::from(bucket == Bucket::Succeeded),
            failed: u64::from(bucket == Bucket::Failed),
            rejected: u64::from(bucket == Bucket::Rejected),
            layer1_eliminated: 0,
            layer2_eliminated: 0,
            cost: 0.0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_elimination(mut self, layer: super::Layer) -> Self {
        match layer {
            super::Layer::Layer1 => self.layer1_eliminated = 1,
            super::Layer::Layer2 => self.layer2_eliminated = 1,
            super::Layer::Layer3 => {}
        }
        self
    }
}
