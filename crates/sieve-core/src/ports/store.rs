//! Store port - 正本（source of truth）
//!
//! 全メソッドは並行に呼ばれてもよい。upsert は冪等（同じ行を 2 回書いても
//! 変わらない）で、increment_job_counters は CounterDelta::task_id 単位で
//! 冪等。クラッシュ後の重複配送で二重にカウントしない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CounterDelta, Job, JobId, JobStatus, LayerResult, ManualReviewEntry, StoreError, TaskId,
    UrlTask,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// job のカウンタに `delta` をアトミックに加算し、`updated_at` を `at` にして
    /// 更新後の job を返す
    async fn increment_job_counters(
        &self,
        job_id: JobId,
        delta: &CounterDelta,
        at: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// job status の CAS。この呼び出しで遷移した（現在値が `from` に含まれていた）
    /// ときだけ `true`
    async fn transition_job(
        &self,
        job_id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn upsert_url_task(&self, task: &UrlTask) -> Result<(), StoreError>;

    async fn get_url_task(&self, task_id: TaskId) -> Result<Option<UrlTask>, StoreError>;

    async fn list_url_tasks(&self, job_id: JobId) -> Result<Vec<UrlTask>, StoreError>;

    /// job の全 task に `archived_at` を入れる。変わった件数を返す
    async fn archive_job_tasks(&self, job_id: JobId, at: DateTime<Utc>)
    -> Result<usize, StoreError>;

    /// task ごと・layer ごとに 1 件まで。同じ layer への 2 回目の書き込みは無視
    async fn upsert_layer_result(
        &self,
        task_id: TaskId,
        result: &LayerResult,
    ) -> Result<(), StoreError>;

    /// layer 順
    async fn layer_results(&self, task_id: TaskId) -> Result<Vec<LayerResult>, StoreError>;

    /// 保存済みの entry が判定済みなら何も書かずに `false` を返す
    async fn upsert_manual_review_entry(&self, entry: &ManualReviewEntry)
    -> Result<bool, StoreError>;

    async fn get_manual_review_entry(
        &self,
        task_id: TaskId,
    ) -> Result<Option<ManualReviewEntry>, StoreError>;

    /// 未判定の entry に `is_stale` を立てる。存在しない・判定済み・既に stale なら
    /// `false`。他のフィールドには触らない
    async fn mark_review_entry_stale(&self, task_id: TaskId) -> Result<bool, StoreError>;

    /// 未判定の entry（再起動時に review キューを復元するのに使う）
    async fn list_active_review_entries(&self) -> Result<Vec<ManualReviewEntry>, StoreError>;
}
