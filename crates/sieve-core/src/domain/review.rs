//! Manual review entries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{JobId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceBand::Low => "low",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

/// A task waiting for (or having received) a human decision.
///
/// `decision`/`reviewed_at` are written exactly once. `is_stale` is the only
/// field the background sweep touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualReviewEntry {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub url: String,
    pub confidence_band: ConfidenceBand,
    pub confidence_score: f64,
    pub reasoning: String,
    pub queued_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision: Option<ReviewDecision>,
    pub is_stale: bool,
    pub reviewer_notes: Option<String>,
}

impl ManualReviewEntry {
    pub fn new(
        task_id: TaskId,
        job_id: JobId,
        url: impl Into<String>,
        confidence_band: ConfidenceBand,
        confidence_score: f64,
        reasoning: impl Into<String>,
        queued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            job_id,
            url: url.into(),
            confidence_band,
            confidence_score,
            reasoning: reasoning.into(),
            queued_at,
            reviewed_at: None,
            decision: None,
            is_stale: false,
            reviewer_notes: None,
        }
    }

    /// Undecided entries make up the active queue.
    pub fn is_active(&self) -> bool {
        self.reviewed_at.is_none()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.queued_at
    }
}
