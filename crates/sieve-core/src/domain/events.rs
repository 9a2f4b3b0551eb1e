//! Events the core emits to the notification collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};
use super::review::ConfidenceBand;

/// Outbound notification event. Serialized as `{"event": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The active review queue reached the configured notification threshold.
    QueueThresholdReached {
        active_count: usize,
        threshold: usize,
    },
    /// A review entry aged past the staleness timeout without a decision.
    ItemStale {
        task_id: TaskId,
        job_id: JobId,
        confidence_band: ConfidenceBand,
        queued_at: DateTime<Utc>,
        age_hours: i64,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::QueueThresholdReached { .. } => "queue_threshold_reached",
            DomainEvent::ItemStale { .. } => "item_stale",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_shape() {
        let ev = DomainEvent::QueueThresholdReached {
            active_count: 10,
            threshold: 10,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "queue_threshold_reached");
        assert_eq!(v["payload"]["active_count"], 10);
        assert_eq!(ev.name(), "queue_threshold_reached");
    }
}
