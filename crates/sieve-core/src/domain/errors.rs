//! Errors and failure classification.

use thiserror::Error;

use super::ids::{JobId, TaskId};

/// Retry classification of a failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Retry-worthy (network, timeout, 5xx, 429, anything unrecognized).
    Transient,
    /// Not worth retrying (4xx auth/validation, explicit fatal).
    Permanent,
}

/// Durable store failure.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Queue transport failure.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The lease was reaped (or already settled) before the worker reported back.
    #[error("lease expired for task {0}")]
    LeaseExpired(TaskId),

    #[error("queue closed")]
    Closed,
}

/// Core error type.
#[derive(Debug, Error)]
pub enum SieveError {
    /// Manual review queue is at `queue_size_limit`.
    #[error("manual review queue is full ({limit} active entries)")]
    CapacityExceeded { limit: usize },

    /// A decision was already recorded for this review entry.
    #[error("review entry for {0} was already decided")]
    AlreadyReviewed(TaskId),

    /// The attempt ceiling was reached for a task.
    #[error("task {task_id} exhausted {max_attempts} attempts")]
    MaxAttemptsExceeded { task_id: TaskId, max_attempts: u32 },

    #[error("review entry not found for {0}")]
    ReviewNotFound(TaskId),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl SieveError {
    /// Reported synchronously to the caller rather than retried by the core.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SieveError::CapacityExceeded { .. }
                | SieveError::AlreadyReviewed(_)
                | SieveError::ReviewNotFound(_)
                | SieveError::InvalidJob(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn caller_errors_are_flagged() {
        let task_id = TaskId::from_ulid(Ulid::new());
        assert!(SieveError::CapacityExceeded { limit: 3 }.is_caller_error());
        assert!(SieveError::AlreadyReviewed(task_id).is_caller_error());
        assert!(!SieveError::Queue(QueueError::Closed).is_caller_error());
    }

    #[test]
    fn store_errors_convert() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let err: SieveError = StoreError::TaskNotFound(task_id).into();
        assert!(err.to_string().contains("task not found"));
    }
}
