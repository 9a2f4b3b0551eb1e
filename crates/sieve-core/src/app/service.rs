//! QueueService - エンジンの外向け API
//!
//! submit / cancel / review 判定 / ステータス照会と、worker・sweeper の起動停止。
//! 組み立ては AppBuilder が行う。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::processor::TaskProcessor;
use crate::app::status::{EngineStatus, JobStatusView};
use crate::app::sweeper_loop::ReviewSweeper;
use crate::app::worker_loop::WorkerPool;
use crate::config::EngineConfig;
use crate::counters::JobCounterAggregator;
use crate::domain::{
    Job, JobId, JobStatus, LayerResult, ManualReviewEntry, ReviewDecision, SieveError,
    StoreError, TaskId, UrlTask,
};
use crate::pipeline::LayerPipeline;
use crate::ports::{
    Clock, ContentFetcher, DeliveryQueue, EventSink, IdGenerator, LlmClassifier, QueueDepth,
    Store,
};
use crate::retry::RetryCoordinator;
use crate::review::{ManualReviewQueue, ReviewFilter, ReviewPage, ReviewQueueStatus};

struct Running {
    pool: WorkerPool,
    sweeper_shutdown: watch::Sender<bool>,
    sweeper: JoinHandle<()>,
}

pub struct QueueService {
    config: EngineConfig,
    store: Arc<dyn Store>,
    queue: Arc<dyn DeliveryQueue>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    review: Arc<ManualReviewQueue>,
    processor: Arc<TaskProcessor>,
    sweeper: Arc<ReviewSweeper>,
    running: Mutex<Option<Running>>,
}

impl QueueService {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn wire(
        config: EngineConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn DeliveryQueue>,
        fetcher: Arc<dyn ContentFetcher>,
        llm: Arc<dyn LlmClassifier>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let counters = Arc::new(JobCounterAggregator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let retry = Arc::new(RetryCoordinator::new(
            &config.retry,
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&counters),
            Arc::clone(&clock),
        ));
        let review = Arc::new(ManualReviewQueue::new(
            &config.review,
            Arc::clone(&store),
            events,
            Arc::clone(&clock),
        ));
        let pipeline = LayerPipeline::new(&config, fetcher, llm);
        let processor = Arc::new(TaskProcessor::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&queue),
            pipeline,
            Arc::clone(&review),
            retry,
            counters,
            Arc::clone(&clock),
        ));
        let sweeper = Arc::new(ReviewSweeper::new(
            &config.review,
            Arc::clone(&review),
            Arc::clone(&processor),
            Arc::clone(&clock),
        ));

        Self {
            config,
            store,
            queue,
            clock,
            ids,
            review,
            processor,
            sweeper,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// URL ごとに task を作って job を登録し、全 task をキューに積む
    pub async fn submit_job(&self, urls: Vec<String>) -> Result<JobId, SieveError> {
        if urls.is_empty() {
            return Err(SieveError::InvalidJob("job has no urls".to_string()));
        }
        let urls: Vec<String> = urls.into_iter().map(|u| u.trim().to_string()).collect();
        if let Some(pos) = urls.iter().position(|u| u.is_empty()) {
            return Err(SieveError::InvalidJob(format!("url #{pos} is empty")));
        }

        let now = self.clock.now();
        let job = Job::new(self.ids.generate_job_id(), urls.len() as u64, now);
        self.store.insert_job(&job).await?;

        let mut task_ids = Vec::with_capacity(urls.len());
        for url in urls {
            let task = UrlTask::new(self.ids.generate_task_id(), job.id, url, now);
            self.store.upsert_url_task(&task).await?;
            task_ids.push(task.id);
        }
        for task_id in task_ids {
            if let Err(e) = self.queue.push(task_id, job.id, Duration::ZERO).await {
                error!(job_id = %job.id, error = %e, "enqueue failed; failing job");
                self.store
                    .transition_job(
                        job.id,
                        &[JobStatus::Pending, JobStatus::Processing],
                        JobStatus::Failed,
                        self.clock.now(),
                    )
                    .await?;
                return Err(e.into());
            }
        }

        info!(job_id = %job.id, total_urls = job.total_urls, "job submitted");
        Ok(job.id)
    }

    /// job を止める
    ///
    /// - キュー上の task は次に取り出されたときにスキップ
    /// - worker が処理中の task は最後まで走るが、job は完了させない
    /// - job が既に終端なら `false`
    pub async fn cancel_job(&self, job_id: JobId) -> Result<bool, SieveError> {
        self.require_job(job_id).await?;
        let now = self.clock.now();
        let cancelled = self
            .store
            .transition_job(
                job_id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobStatus::Cancelled,
                now,
            )
            .await?;
        if cancelled {
            let archived = self.store.archive_job_tasks(job_id, now).await?;
            info!(job_id = %job_id, archived, "job cancelled");
        }
        Ok(cancelled)
    }

    /// review 判定を記録し、対応する task を確定する
    pub async fn decide_review(
        &self,
        task_id: TaskId,
        decision: ReviewDecision,
        notes: Option<String>,
    ) -> Result<ManualReviewEntry, SieveError> {
        let entry = self.review.decide(task_id, decision, notes).await?;
        self.processor.settle_reviewed(&entry).await?;
        Ok(entry)
    }

    pub async fn review_status(&self) -> ReviewQueueStatus {
        self.review.status().await
    }

    pub async fn list_review_queue(&self, filter: &ReviewFilter) -> ReviewPage {
        self.review.list_active(filter).await
    }

    pub async fn review_entry(&self, task_id: TaskId) -> Result<ManualReviewEntry, SieveError> {
        self.store
            .get_manual_review_entry(task_id)
            .await?
            .ok_or(SieveError::ReviewNotFound(task_id))
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusView, SieveError> {
        let job = self.require_job(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn job_tasks(&self, job_id: JobId) -> Result<Vec<UrlTask>, SieveError> {
        self.require_job(job_id).await?;
        Ok(self.store.list_url_tasks(job_id).await?)
    }

    pub async fn task(&self, task_id: TaskId) -> Result<UrlTask, SieveError> {
        Ok(self
            .store
            .get_url_task(task_id)
            .await?
            .ok_or(StoreError::TaskNotFound(task_id))?)
    }

    pub async fn layer_results(&self, task_id: TaskId) -> Result<Vec<LayerResult>, SieveError> {
        Ok(self.store.layer_results(task_id).await?)
    }

    pub async fn queue_depth(&self) -> QueueDepth {
        self.queue.depth().await
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            queue: self.queue.depth().await,
            review: self.review.status().await,
            running: self.running.lock().await.is_some(),
        }
    }

    /// job が終端になるか、全 task が queued / processing を抜けるまでポーリング
    /// （review 待ちは決着扱い）
    pub async fn wait_until_settled(
        &self,
        job_id: JobId,
        poll: Duration,
    ) -> Result<JobStatusView, SieveError> {
        loop {
            let job = self.require_job(job_id).await?;
            if job.status.is_terminal() {
                return Ok(JobStatusView::from(&job));
            }
            let tasks = self.store.list_url_tasks(job_id).await?;
            if tasks.iter().all(|t| t.status.is_settled()) {
                return Ok(JobStatusView::from(&job));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// review キューを復元して worker と sweeper を起動する。
    /// 起動中に呼んでも何もしない
    pub async fn start(&self) -> Result<(), SieveError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("service already running");
            return Ok(());
        }

        let restored = self.review.load().await?;
        let pool = WorkerPool::spawn(
            self.config.worker.concurrency,
            Arc::clone(&self.queue),
            Arc::clone(&self.processor),
            self.config.worker.poll_interval(),
        );
        let (sweeper_shutdown, rx) = watch::channel(false);
        let sweeper = Arc::clone(&self.sweeper).spawn(rx);

        info!(
            workers = pool.size(),
            restored_reviews = restored,
            "queue service started"
        );
        *running = Some(Running {
            pool,
            sweeper_shutdown,
            sweeper,
        });
        Ok(())
    }

    /// 新規取得を止めて処理中の task を待つ。未配送の task はキューに残る
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.sweeper_shutdown.send(true);
        running.pool.shutdown_and_join().await;
        if let Err(e) = running.sweeper.await {
            error!(error = %e, "review sweeper panicked");
        }
        info!("queue service stopped");
    }

    /// interval を待たずに 1 回 sweep する
    pub async fn sweep_reviews(&self) -> Result<crate::app::SweepReport, SieveError> {
        self.sweeper.sweep_once().await
    }

    async fn require_job(&self, job_id: JobId) -> Result<Job, SieveError> {
        Ok(self
            .store
            .get_job(job_id)
            .await?
            .ok_or(StoreError::JobNotFound(job_id))?)
    }
}
