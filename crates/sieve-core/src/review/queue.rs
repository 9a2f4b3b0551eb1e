//! Manual review queue.
//!
//! The active (undecided) entries are mirrored in memory so capacity checks
//! and `status()` cost O(active), never O(history). Capacity is enforced with
//! a reservation: check and insert happen under one lock, the store write
//! happens after the lock is released, and a failed write removes the
//! reservation again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ReviewConfig;
use crate::domain::{
    ConfidenceBand, DomainEvent, ManualReviewEntry, ReviewDecision, SieveError, TaskId,
};
use crate::ports::event_sink::emit_best_effort;
use crate::ports::{Clock, EventSink, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl BandCounts {
    fn bump(&mut self, band: ConfidenceBand) {
        match band {
            ConfidenceBand::Low => self.low += 1,
            ConfidenceBand::Medium => self.medium += 1,
            ConfidenceBand::High => self.high += 1,
        }
    }
}

/// Snapshot of the active queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueStatus {
    pub active: usize,
    pub stale: usize,
    pub by_band: BandCounts,
    pub oldest_queued_at: Option<DateTime<Utc>>,
    pub capacity: Option<usize>,
}

/// Listing filter. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewFilter {
    pub band: Option<ConfidenceBand>,
    pub stale: Option<bool>,
    pub page: usize,
    pub limit: usize,
}

impl Default for ReviewFilter {
    fn default() -> Self {
        Self {
            band: None,
            stale: None,
            page: 1,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPage {
    pub entries: Vec<ManualReviewEntry>,
    /// Matching entries across all pages.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

pub struct ManualReviewQueue {
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    limit: Option<usize>,
    notify_threshold: Option<usize>,
    /// Undecided entries, plus entries whose decision is being persisted
    /// (those have `reviewed_at` set and are not counted as active).
    active: Mutex<HashMap<TaskId, ManualReviewEntry>>,
}

impl ManualReviewQueue {
    pub fn new(
        config: &ReviewConfig,
        store: Arc<dyn Store>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            limit: config.queue_size_limit,
            notify_threshold: config.notify_threshold,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the in-memory view from the store (process start).
    pub async fn load(&self) -> Result<usize, SieveError> {
        let entries = self.store.list_active_review_entries().await?;
        let mut active = self.active.lock().await;
        for entry in entries {
            active.insert(entry.task_id, entry);
        }
        Ok(active.len())
    }

    /// Add an entry. Fails with `CapacityExceeded` when a limit is set and
    /// already reached; the caller picks the fallback. Re-enqueueing a task
    /// that is already active returns the existing entry. A task whose entry
    /// was already decided (redelivery after a crash) fails with
    /// `AlreadyReviewed` and no new entry is created.
    pub async fn enqueue(&self, entry: ManualReviewEntry) -> Result<ManualReviewEntry, SieveError> {
        let task_id = entry.task_id;
        if let Some(existing) = self.active.lock().await.get(&task_id) {
            return Ok(existing.clone());
        }
        if let Some(stored) = self.store.get_manual_review_entry(task_id).await?
            && !stored.is_active()
        {
            debug!(task_id = %task_id, "review entry already decided");
            return Err(SieveError::AlreadyReviewed(task_id));
        }

        let active_count = {
            let mut active = self.active.lock().await;
            if let Some(existing) = active.get(&task_id) {
                return Ok(existing.clone());
            }
            if let Some(limit) = self.limit
                && active.len() >= limit
            {
                debug!(task_id = %task_id, limit, "review queue full");
                return Err(SieveError::CapacityExceeded { limit });
            }
            active.insert(task_id, entry.clone());
            active.values().filter(|e| e.is_active()).count()
        };

        match self.store.upsert_manual_review_entry(&entry).await {
            Ok(true) => {}
            Ok(false) => {
                // decided between the check above and the write
                self.active.lock().await.remove(&task_id);
                return Err(SieveError::AlreadyReviewed(task_id));
            }
            Err(e) => {
                self.active.lock().await.remove(&task_id);
                return Err(e.into());
            }
        }
        info!(
            task_id = %entry.task_id,
            job_id = %entry.job_id,
            band = %entry.confidence_band,
            score = entry.confidence_score,
            active = active_count,
            "queued for manual review"
        );

        if let Some(threshold) = self.notify_threshold
            && active_count == threshold
        {
            emit_best_effort(
                self.events.as_ref(),
                DomainEvent::QueueThresholdReached {
                    active_count,
                    threshold,
                },
            )
            .await;
        }
        Ok(entry)
    }

    /// Record a reviewer decision, exactly once per entry.
    pub async fn decide(
        &self,
        task_id: TaskId,
        decision: ReviewDecision,
        notes: Option<String>,
    ) -> Result<ManualReviewEntry, SieveError> {
        let now = self.clock.now();
        let claimed = {
            let mut active = self.active.lock().await;
            match active.get_mut(&task_id) {
                Some(entry) if entry.is_active() => {
                    let before = entry.clone();
                    entry.decision = Some(decision);
                    entry.reviewed_at = Some(now);
                    entry.reviewer_notes = notes;
                    Some((entry.clone(), before))
                }
                // another decision is being persisted right now
                Some(_) => return Err(SieveError::AlreadyReviewed(task_id)),
                None => None,
            }
        };
        let Some((decided, before)) = claimed else {
            return Err(self.not_active_error(task_id).await);
        };

        match self.store.upsert_manual_review_entry(&decided).await {
            Ok(true) => {}
            Ok(false) => {
                self.active.lock().await.remove(&task_id);
                return Err(SieveError::AlreadyReviewed(task_id));
            }
            Err(e) => {
                self.active.lock().await.insert(task_id, before);
                return Err(e.into());
            }
        }
        self.active.lock().await.remove(&task_id);

        info!(
            task_id = %task_id,
            decision = ?decision,
            waited_secs = (now - decided.queued_at).num_seconds(),
            "review decided"
        );
        Ok(decided)
    }

    async fn not_active_error(&self, task_id: TaskId) -> SieveError {
        match self.store.get_manual_review_entry(task_id).await {
            Ok(Some(entry)) if !entry.is_active() => SieveError::AlreadyReviewed(task_id),
            Ok(_) => SieveError::ReviewNotFound(task_id),
            Err(e) => e.into(),
        }
    }

    /// Flip `is_stale` on undecided entries older than `timeout` and emit one
    /// `item_stale` event per flipped entry. Advisory only: nothing is
    /// removed or decided.
    pub async fn mark_stale(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<ManualReviewEntry>, SieveError> {
        let candidates: Vec<TaskId> = {
            let active = self.active.lock().await;
            active
                .values()
                .filter(|e| e.is_active() && !e.is_stale && e.age(now) > timeout)
                .map(|e| e.task_id)
                .collect()
        };

        let mut flipped = Vec::new();
        for task_id in candidates {
            if !self.store.mark_review_entry_stale(task_id).await? {
                continue;
            }
            let entry = {
                let mut active = self.active.lock().await;
                match active.get_mut(&task_id) {
                    Some(entry) => {
                        entry.is_stale = true;
                        entry.clone()
                    }
                    None => continue,
                }
            };
            flipped.push(entry);
        }

        for entry in &flipped {
            let age_hours = entry.age(now).num_hours();
            warn!(task_id = %entry.task_id, age_hours, "review entry is stale");
            emit_best_effort(
                self.events.as_ref(),
                DomainEvent::ItemStale {
                    task_id: entry.task_id,
                    job_id: entry.job_id,
                    confidence_band: entry.confidence_band,
                    queued_at: entry.queued_at,
                    age_hours,
                },
            )
            .await;
        }
        Ok(flipped)
    }

    /// Undecided entries older than `age`, oldest first.
    pub async fn expired(&self, now: DateTime<Utc>, age: Duration) -> Vec<ManualReviewEntry> {
        let active = self.active.lock().await;
        let mut out: Vec<ManualReviewEntry> = active
            .values()
            .filter(|e| e.is_active() && e.age(now) > age)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.queued_at);
        out
    }

    pub async fn status(&self) -> ReviewQueueStatus {
        let active = self.active.lock().await;
        let mut status = ReviewQueueStatus {
            active: 0,
            stale: 0,
            by_band: BandCounts::default(),
            oldest_queued_at: None,
            capacity: self.limit,
        };
        for entry in active.values().filter(|e| e.is_active()) {
            status.active += 1;
            if entry.is_stale {
                status.stale += 1;
            }
            status.by_band.bump(entry.confidence_band);
            status.oldest_queued_at = Some(match status.oldest_queued_at {
                Some(t) => t.min(entry.queued_at),
                None => entry.queued_at,
            });
        }
        status
    }

    /// Undecided entries, newest first, filtered and paginated.
    pub async fn list_active(&self, filter: &ReviewFilter) -> ReviewPage {
        let active = self.active.lock().await;
        let mut matching: Vec<&ManualReviewEntry> = active
            .values()
            .filter(|e| e.is_active())
            .filter(|e| filter.band.is_none_or(|b| e.confidence_band == b))
            .filter(|e| filter.stale.is_none_or(|s| e.is_stale == s))
            .collect();
        matching.sort_by(|a, b| {
            b.queued_at
                .cmp(&a.queued_at)
                .then_with(|| b.task_id.as_ulid().cmp(&a.task_id.as_ulid()))
        });

        let page = filter.page.max(1);
        let limit = filter.limit.max(1);
        let entries = matching
            .iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(|e| (*e).clone())
            .collect();
        ReviewPage {
            entries,
            total: matching.len(),
            page,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, StoreError};
    use crate::impls::{InMemoryStore, MemoryNotifier};
    use crate::ports::ManualClock;
    use chrono::TimeZone;
    use ulid::Ulid;

    struct Fixture {
        queue: Arc<ManualReviewQueue>,
        store: Arc<InMemoryStore>,
        events: Arc<MemoryNotifier>,
        clock: Arc<ManualClock>,
        job_id: JobId,
    }

    fn fixture(config: ReviewConfig) -> Fixture {
        fixture_with(config, Arc::new(MemoryNotifier::new()))
    }

    fn fixture_with(config: ReviewConfig, events: Arc<MemoryNotifier>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let queue = Arc::new(ManualReviewQueue::new(
            &config,
            store.clone(),
            events.clone(),
            clock.clone(),
        ));
        Fixture {
            queue,
            store,
            events,
            clock,
            job_id: JobId::from_ulid(Ulid::new()),
        }
    }

    impl Fixture {
        fn entry(&self, band: ConfidenceBand, score: f64) -> ManualReviewEntry {
            ManualReviewEntry::new(
                TaskId::from_ulid(Ulid::new()),
                self.job_id,
                "https://acme.io",
                band,
                score,
                "borderline",
                self.clock.now(),
            )
        }
    }

    fn limited(limit: usize) -> ReviewConfig {
        ReviewConfig {
            queue_size_limit: Some(limit),
            ..ReviewConfig::default()
        }
    }

    #[tokio::test]
    async fn enqueue_beyond_limit_is_capacity_exceeded() {
        let f = fixture(limited(2));
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.4)).await.unwrap();
        let rejected = f.entry(ConfidenceBand::Medium, 0.7);
        let err = f.queue.enqueue(rejected.clone()).await.unwrap_err();

        assert!(matches!(err, SieveError::CapacityExceeded { limit: 2 }));
        assert_eq!(f.queue.status().await.active, 2);
        assert!(f
            .store
            .get_manual_review_entry(rejected.task_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_never_exceed_limit() {
        let f = fixture(limited(5));
        let mut joins = Vec::new();
        for _ in 0..40 {
            let queue = f.queue.clone();
            let entry = f.entry(ConfidenceBand::Medium, 0.6);
            joins.push(tokio::spawn(async move { queue.enqueue(entry).await }));
        }
        let mut ok = 0;
        let mut full = 0;
        for j in joins {
            match j.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SieveError::CapacityExceeded { .. }) => full += 1,
                Err(other) => panic!("unexpected: {other}"),
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(full, 35);
        assert_eq!(f.store.list_active_review_entries().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn decision_frees_capacity() {
        let f = fixture(limited(1));
        let first = f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.queue
            .decide(first.task_id, ReviewDecision::Rejected, None)
            .await
            .unwrap();
        f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.35)).await.unwrap();
    }

    #[tokio::test]
    async fn decide_is_idempotent_once() {
        let f = fixture(ReviewConfig::default());
        let entry = f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.67)).await.unwrap();

        let decided = f
            .queue
            .decide(entry.task_id, ReviewDecision::Approved, Some("good fit".into()))
            .await
            .unwrap();
        assert_eq!(decided.decision, Some(ReviewDecision::Approved));
        let first_reviewed_at = decided.reviewed_at;
        assert!(first_reviewed_at.is_some());

        f.clock.advance(Duration::minutes(5));
        let err = f
            .queue
            .decide(entry.task_id, ReviewDecision::Rejected, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::AlreadyReviewed(id) if id == entry.task_id));

        let stored = f
            .store
            .get_manual_review_entry(entry.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.decision, Some(ReviewDecision::Approved));
        assert_eq!(stored.reviewed_at, first_reviewed_at);
        assert_eq!(stored.reviewer_notes.as_deref(), Some("good fit"));
        assert_eq!(f.queue.status().await.active, 0);
    }

    #[tokio::test]
    async fn re_enqueue_after_decision_is_already_reviewed() {
        let f = fixture(ReviewConfig::default());
        let entry = f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.67)).await.unwrap();
        f.queue
            .decide(entry.task_id, ReviewDecision::Approved, None)
            .await
            .unwrap();

        let mut again = entry.clone();
        again.queued_at = f.clock.now() + Duration::minutes(1);
        let err = f.queue.enqueue(again).await.unwrap_err();
        assert!(matches!(err, SieveError::AlreadyReviewed(id) if id == entry.task_id));
        assert_eq!(f.queue.status().await.active, 0);

        let err = f
            .queue
            .decide(entry.task_id, ReviewDecision::Rejected, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::AlreadyReviewed(_)));
        let stored = f
            .store
            .get_manual_review_entry(entry.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.decision, Some(ReviewDecision::Approved));
    }

    #[tokio::test]
    async fn unknown_entry_is_not_found() {
        let f = fixture(ReviewConfig::default());
        let err = f
            .queue
            .decide(TaskId::from_ulid(Ulid::new()), ReviewDecision::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::ReviewNotFound(_)));
    }

    #[tokio::test]
    async fn failed_store_write_releases_the_reservation() {
        let f = fixture(limited(1));
        f.store.set_unavailable(true);
        let err = f
            .queue
            .enqueue(f.entry(ConfidenceBand::Medium, 0.6))
            .await
            .unwrap_err();
        assert!(matches!(err, SieveError::Store(StoreError::Unavailable(_))));

        f.store.set_unavailable(false);
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
    }

    #[tokio::test]
    async fn failed_decision_write_keeps_the_entry_active() {
        let f = fixture(ReviewConfig::default());
        let entry = f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.store.set_unavailable(true);
        assert!(f
            .queue
            .decide(entry.task_id, ReviewDecision::Approved, None)
            .await
            .is_err());
        f.store.set_unavailable(false);

        assert_eq!(f.queue.status().await.active, 1);
        f.queue
            .decide(entry.task_id, ReviewDecision::Approved, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mark_stale_flips_once_and_emits_event() {
        let f = fixture(ReviewConfig::default());
        let old = f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.4)).await.unwrap();
        f.clock.advance(Duration::hours(70));
        let young = f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.clock.advance(Duration::hours(3));

        let now = f.clock.now();
        let flipped = f.queue.mark_stale(now, Duration::hours(72)).await.unwrap();
        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].task_id, old.task_id);
        assert!(flipped[0].decision.is_none());

        let again = f.queue.mark_stale(now, Duration::hours(72)).await.unwrap();
        assert!(again.is_empty());

        let events = f.events.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DomainEvent::ItemStale { task_id, age_hours: 73, .. } if task_id == old.task_id
        ));

        let status = f.queue.status().await;
        assert_eq!(status.active, 2);
        assert_eq!(status.stale, 1);
        assert!(!f
            .store
            .get_manual_review_entry(young.task_id)
            .await
            .unwrap()
            .unwrap()
            .is_stale);
    }

    #[tokio::test]
    async fn threshold_event_fires_when_count_is_reached() {
        let f = fixture(ReviewConfig {
            notify_threshold: Some(2),
            ..ReviewConfig::default()
        });
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        assert!(f.events.events().is_empty());
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        assert_eq!(
            f.events.events(),
            vec![DomainEvent::QueueThresholdReached {
                active_count: 2,
                threshold: 2
            }]
        );
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_enqueue() {
        let f = fixture_with(
            ReviewConfig {
                notify_threshold: Some(1),
                ..ReviewConfig::default()
            },
            Arc::new(MemoryNotifier::failing()),
        );
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        assert_eq!(f.events.events().len(), 1);
        assert_eq!(f.queue.status().await.active, 1);
    }

    #[tokio::test]
    async fn status_counts_by_band_and_oldest() {
        let f = fixture(ReviewConfig::default());
        let first_at = f.clock.now();
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.4)).await.unwrap();
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.7)).await.unwrap();

        let status = f.queue.status().await;
        assert_eq!(status.active, 3);
        assert_eq!(
            status.by_band,
            BandCounts {
                low: 1,
                medium: 2,
                high: 0
            }
        );
        assert_eq!(status.oldest_queued_at, Some(first_at));
        assert_eq!(status.capacity, None);
    }

    #[tokio::test]
    async fn list_active_filters_and_paginates_newest_first() {
        let f = fixture(ReviewConfig::default());
        let mut medium = Vec::new();
        for _ in 0..5 {
            medium.push(f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap());
            f.clock.advance(Duration::minutes(1));
        }
        f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.4)).await.unwrap();

        let page = f
            .queue
            .list_active(&ReviewFilter {
                band: Some(ConfidenceBand::Medium),
                page: 1,
                limit: 2,
                ..ReviewFilter::default()
            })
            .await;
        assert_eq!(page.total, 5);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].task_id, medium[4].task_id);
        assert_eq!(page.entries[1].task_id, medium[3].task_id);

        let last = f
            .queue
            .list_active(&ReviewFilter {
                band: Some(ConfidenceBand::Medium),
                page: 3,
                limit: 2,
                ..ReviewFilter::default()
            })
            .await;
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].task_id, medium[0].task_id);
    }

    #[tokio::test]
    async fn load_rebuilds_from_store() {
        let f = fixture(ReviewConfig::default());
        f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.4)).await.unwrap();

        let restarted = ManualReviewQueue::new(
            &ReviewConfig::default(),
            f.store.clone(),
            f.events.clone(),
            f.clock.clone(),
        );
        assert_eq!(restarted.load().await.unwrap(), 2);
        assert_eq!(restarted.status().await.active, 2);
    }

    #[tokio::test]
    async fn expired_returns_oldest_first() {
        let f = fixture(ReviewConfig::default());
        let a = f.queue.enqueue(f.entry(ConfidenceBand::Medium, 0.6)).await.unwrap();
        f.clock.advance(Duration::days(1));
        let b = f.queue.enqueue(f.entry(ConfidenceBand::Low, 0.4)).await.unwrap();
        f.clock.advance(Duration::days(7) + Duration::hours(1));

        let expired = f.queue.expired(f.clock.now(), Duration::days(7)).await;
        let ids: Vec<TaskId> = expired.iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec![a.task_id, b.task_id]);

        let expired = f.queue.expired(f.clock.now(), Duration::days(8)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].task_id, a.task_id);
    }
}
