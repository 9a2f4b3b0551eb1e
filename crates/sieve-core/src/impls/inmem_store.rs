//! InMemoryStore - 開発・テスト用の Store
//!
//! 1 つの Mutex で全テーブルを守る。各メソッドはロック内で完結し、
//! ロックを跨いだ await はしない。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    CounterDelta, Job, JobId, JobStatus, Layer, LayerResult, ManualReviewEntry, StoreError,
    TaskId, UrlTask,
};
use crate::ports::Store;

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobId, Job>,
    /// job ごとの、delta 適用済み task id
    applied: HashMap<JobId, HashSet<TaskId>>,
    tasks: HashMap<TaskId, UrlTask>,
    /// job ごとの task の挿入順
    job_tasks: HashMap<JobId, Vec<TaskId>>,
    layer_results: HashMap<TaskId, BTreeMap<Layer, LayerResult>>,
    reviews: HashMap<TaskId, ManualReviewEntry>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 立っている間は全呼び出しが `StoreError::Unavailable` で失敗する
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.jobs.entry(job.id).or_insert_with(|| job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn increment_job_counters(
        &self,
        job_id: JobId,
        delta: &CounterDelta,
        at: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        let first_time = state
            .applied
            .entry(job_id)
            .or_default()
            .insert(delta.task_id);
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;
        if first_time {
            job.apply(delta, at);
        }
        Ok(job.clone())
    }

    async fn transition_job(
        &self,
        job_id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;
        if !from.contains(&job.status) {
            return Ok(false);
        }
        job.status = to;
        job.updated_at = at;
        if to == JobStatus::Processing {
            job.started_at.get_or_insert(at);
        }
        if to.is_terminal() {
            job.completed_at = Some(at);
        }
        Ok(true)
    }

    async fn upsert_url_task(&self, task: &UrlTask) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.tasks.insert(task.id, task.clone()).is_none() {
            state.job_tasks.entry(task.job_id).or_default().push(task.id);
        }
        Ok(())
    }

    async fn get_url_task(&self, task_id: TaskId) -> Result<Option<UrlTask>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.tasks.get(&task_id).cloned())
    }

    async fn list_url_tasks(&self, job_id: JobId) -> Result<Vec<UrlTask>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        let ids = state.job_tasks.get(&job_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(ids
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    async fn archive_job_tasks(
        &self,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.check()?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(ids) = state.job_tasks.get(&job_id) else {
            return Ok(0);
        };
        let mut archived = 0;
        for id in ids {
            if let Some(task) = state.tasks.get_mut(id)
                && task.archived_at.is_none()
            {
                task.archived_at = Some(at);
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn upsert_layer_result(
        &self,
        task_id: TaskId,
        result: &LayerResult,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state
            .layer_results
            .entry(task_id)
            .or_default()
            .entry(result.layer)
            .or_insert_with(|| result.clone());
        Ok(())
    }

    async fn layer_results(&self, task_id: TaskId) -> Result<Vec<LayerResult>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .layer_results
            .get(&task_id)
            .map(|by_layer| by_layer.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_manual_review_entry(
        &self,
        entry: &ManualReviewEntry,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        // 判定済みの entry は上書きしない
        if let Some(existing) = state.reviews.get(&entry.task_id)
            && existing.decision.is_some()
        {
            return Ok(false);
        }
        state.reviews.insert(entry.task_id, entry.clone());
        Ok(true)
    }

    async fn get_manual_review_entry(
        &self,
        task_id: TaskId,
    ) -> Result<Option<ManualReviewEntry>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.reviews.get(&task_id).cloned())
    }

    async fn mark_review_entry_stale(&self, task_id: TaskId) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.reviews.get_mut(&task_id) {
            Some(entry) if entry.is_active() && !entry.is_stale => {
                entry.is_stale = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_review_entries(&self) -> Result<Vec<ManualReviewEntry>, StoreError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .reviews
            .values()
            .filter(|e| e.is_active())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bucket, ConfidenceBand, ReviewDecision};
    use ulid::Ulid;

    fn ids() -> (JobId, TaskId) {
        (JobId::from_ulid(Ulid::new()), TaskId::from_ulid(Ulid::new()))
    }

    #[tokio::test]
    async fn counters_are_idempotent_per_task() {
        let store = InMemoryStore::new();
        let (job_id, task_id) = ids();
        store.insert_job(&Job::new(job_id, 2, Utc::now())).await.unwrap();

        let delta = CounterDelta::terminal(task_id, Bucket::Succeeded).with_cost(0.5);
        let first_at = Utc::now();
        store.increment_job_counters(job_id, &delta, first_at).await.unwrap();
        let job = store
            .increment_job_counters(job_id, &delta, first_at + chrono::Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(job.updated_at, first_at);
        assert_eq!(job.processed_urls, 1);
        assert_eq!(job.successful_urls, 1);
        assert_eq!(job.total_cost, 0.5);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryStore::new();
        let (job_id, _) = ids();
        store.insert_job(&Job::new(job_id, 1, Utc::now())).await.unwrap();
        let now = Utc::now();

        assert!(store
            .transition_job(job_id, &[JobStatus::Pending], JobStatus::Processing, now)
            .await
            .unwrap());
        assert!(!store
            .transition_job(job_id, &[JobStatus::Pending], JobStatus::Processing, now)
            .await
            .unwrap());

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(now));
    }

    #[tokio::test]
    async fn first_layer_result_wins() {
        let store = InMemoryStore::new();
        let (_, task_id) = ids();
        store
            .upsert_layer_result(task_id, &LayerResult::pass(Layer::Layer2, 0.7, "first"))
            .await
            .unwrap();
        store
            .upsert_layer_result(task_id, &LayerResult::fail(Layer::Layer2, 0.1, "second"))
            .await
            .unwrap();
        store
            .upsert_layer_result(task_id, &LayerResult::pass(Layer::Layer1, 1.0, "l1"))
            .await
            .unwrap();

        let results = store.layer_results(task_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].layer, Layer::Layer1);
        assert_eq!(results[1].reasoning, "first");
    }

    #[tokio::test]
    async fn decided_review_entries_are_not_overwritten_or_staled() {
        let store = InMemoryStore::new();
        let (job_id, task_id) = ids();
        let now = Utc::now();
        let mut entry = ManualReviewEntry::new(
            task_id,
            job_id,
            "https://acme.io",
            ConfidenceBand::Medium,
            0.6,
            "borderline",
            now,
        );
        let pending = entry.clone();
        entry.decision = Some(ReviewDecision::Approved);
        entry.reviewed_at = Some(now);
        assert!(store.upsert_manual_review_entry(&entry).await.unwrap());
        assert!(!store.upsert_manual_review_entry(&pending).await.unwrap());

        assert!(!store.mark_review_entry_stale(task_id).await.unwrap());
        let stored = store.get_manual_review_entry(task_id).await.unwrap().unwrap();
        assert_eq!(stored.decision, Some(ReviewDecision::Approved));
        assert!(!stored.is_stale);
        assert!(store.list_active_review_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_sets_timestamp_once() {
        let store = InMemoryStore::new();
        let (job_id, task_id) = ids();
        store
            .upsert_url_task(&UrlTask::new(task_id, job_id, "https://acme.io", Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.archive_job_tasks(job_id, Utc::now()).await.unwrap(), 1);
        assert_eq!(store.archive_job_tasks(job_id, Utc::now()).await.unwrap(), 0);
        let tasks = store.list_url_tasks(job_id).await.unwrap();
        assert!(tasks[0].archived_at.is_some());
    }

    #[tokio::test]
    async fn unavailable_store_fails_calls() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let (job_id, _) = ids();
        let err = store.get_job(job_id).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
