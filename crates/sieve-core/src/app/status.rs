//! Status - 外向けのステータスビュー
//!
//! Job の counters をそのまま返すのではなく、進捗率など派生値も含めて返す。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobId, JobStatus};
use crate::ports::QueueDepth;
use crate::review::ReviewQueueStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_urls: u64,
    pub processed_urls: u64,
    pub successful_urls: u64,
    pub failed_urls: u64,
    pub rejected_urls: u64,
    pub layer1_eliminated: u64,
    pub layer2_eliminated: u64,
    pub total_cost: f64,
    pub progress_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            total_urls: job.total_urls,
            processed_urls: job.processed_urls,
            successful_urls: job.successful_urls,
            failed_urls: job.failed_urls,
            rejected_urls: job.rejected_urls,
            layer1_eliminated: job.layer1_eliminated,
            layer2_eliminated: job.layer2_eliminated,
            total_cost: job.total_cost,
            progress_percentage: job.progress_percentage(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// エンジン全体のスナップショット（配送キューと review キューの滞留）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub queue: QueueDepth,
    pub review: ReviewQueueStatus,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bucket, CounterDelta, TaskId};
    use ulid::Ulid;

    #[test]
    fn test_view_carries_progress() {
        let now = Utc::now();
        let mut job = Job::new(JobId::from_ulid(Ulid::new()), 4, now);
        job.apply(
            &CounterDelta::terminal(TaskId::from_ulid(Ulid::new()), Bucket::Succeeded),
            now,
        );

        let view = JobStatusView::from(&job);
        assert_eq!(view.processed_urls, 1);
        assert_eq!(view.successful_urls, 1);
        assert!((view.progress_percentage - 25.0).abs() < 1e-9);
    }
}
