//! UrlTask: one URL inside a job, and its retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};
use super::layer::Layer;
use super::review::ConfidenceBand;

/// Maximum persisted length of `last_error`, in characters.
pub const LAST_ERROR_MAX_CHARS: usize = 200;

const ELLIPSIS: &str = "...";

/// Task state.
///
/// - Queued -> Processing -> Succeeded | Rejected | AwaitingReview
/// - Queued -> Processing -> (retry delay, still Processing) -> Processing ...
/// - Queued -> Processing -> Failed (permanent error or attempt ceiling)
/// - AwaitingReview -> Succeeded | Rejected (reviewer decision)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlTaskStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
    Rejected,
    AwaitingReview,
}

impl UrlTaskStatus {
    /// No further worker attempts will happen.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            UrlTaskStatus::Succeeded
                | UrlTaskStatus::Failed
                | UrlTaskStatus::Rejected
                | UrlTaskStatus::AwaitingReview
        )
    }

    /// Counted in the job: nothing changes this status any more.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            UrlTaskStatus::Succeeded | UrlTaskStatus::Failed | UrlTaskStatus::Rejected
        )
    }
}

/// Persisted task row. Field names on the wire follow the queue transport
/// schema (`retry_count`, `last_retry_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlTask {
    pub id: TaskId,
    pub job_id: JobId,
    pub url: String,
    #[serde(rename = "retry_count")]
    pub attempt_count: u32,
    pub last_error: Option<String>,
    #[serde(rename = "last_retry_at")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub status: UrlTaskStatus,
    /// Wall time since the first attempt started, including retry delays.
    pub processing_time_ms: u64,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub final_score: Option<f64>,
    pub confidence_band: Option<ConfidenceBand>,
    pub eliminated_at: Option<Layer>,
    /// Short machine-readable reason for the terminal status
    /// (`eliminated_at_layer1`, `auto_approved`, `queue_overflow`, ...).
    pub outcome_reason: Option<String>,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl UrlTask {
    pub fn new(id: TaskId, job_id: JobId, url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_id,
            url: url.into(),
            attempt_count: 0,
            last_error: None,
            last_attempt_at: None,
            status: UrlTaskStatus::Queued,
            processing_time_ms: 0,
            first_attempt_at: None,
            final_score: None,
            confidence_band: None,
            eliminated_at: None,
            outcome_reason: None,
            cost: 0.0,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }

    /// Start a new attempt (Queued/Processing -> Processing, attempts + 1).
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = UrlTaskStatus::Processing;
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        self.first_attempt_at.get_or_insert(now);
        self.touch(now);
    }

    /// Record a failed attempt. Status is left to the caller.
    pub fn record_failure(&mut self, error: &str, now: DateTime<Utc>) {
        self.last_error = Some(truncate_error(error));
        self.touch(now);
    }

    /// Move to a settled status with a reason.
    pub fn settle(&mut self, status: UrlTaskStatus, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = status;
        self.outcome_reason = Some(reason.into());
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        if let Some(first) = self.first_attempt_at {
            self.processing_time_ms = (now - first).num_milliseconds().max(0) as u64;
        }
    }
}

/// Truncate an error message to at most `LAST_ERROR_MAX_CHARS` characters,
/// keeping the head (URL, host, status) and marking the cut with "...".
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= LAST_ERROR_MAX_CHARS {
        return message.to_string();
    }
    let keep = LAST_ERROR_MAX_CHARS - ELLIPSIS.len();
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
