//! TaskProcessor - 1 lease 分の処理
//!
//! # フロー
//! 1. Store から UrlTask を読む（なければ / 既に settle 済みなら ack して終わり）
//! 2. Job が terminal（cancel 済みなど）なら pipeline を走らせずに ack
//! 3. attempt 上限に達していれば MaxAttemptsExceeded で失敗確定
//! 4. attempt 開始を永続化 → LayerPipeline 実行（ロックは持たない）
//! 5. 成功: layer result 保存 → ConfidenceRouter → 終端 or ManualReviewQueue
//!    （判定済みの task が再配送されたら、保存済みの判定で確定する）
//! 6. 失敗: RetryCoordinator に渡す（nack + 遅延 or 失敗確定）

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{EngineConfig, OverflowPolicy};
use crate::counters::JobCounterAggregator;
use crate::domain::{
    Bucket, ConfidenceBand, CounterDelta, JobStatus, ManualReviewEntry, ReviewDecision,
    SieveError, StoreError, UrlTask, UrlTaskStatus,
};
use crate::pipeline::{LayerPipeline, PipelineOutcome};
use crate::retry::{GiveUpReason, RetryCoordinator, RetryDecision};
use crate::review::ManualReviewQueue;
use crate::routing::{ConfidenceRouter, RouteDecision};
use crate::ports::{Clock, DeliveryQueue, Lease, Store};

/// pipeline を走らせずに lease を確定した理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TaskMissing,
    AlreadySettled,
    JobInactive,
}

/// 1 lease の処理結果
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Settled(UrlTaskStatus),
    AwaitingReview(ConfidenceBand),
    RetryScheduled { delay: Duration },
    Failed(GiveUpReason),
    Skipped(SkipReason),
}

pub struct TaskProcessor {
    store: Arc<dyn Store>,
    queue: Arc<dyn DeliveryQueue>,
    pipeline: LayerPipeline,
    router: ConfidenceRouter,
    review: Arc<ManualReviewQueue>,
    retry: Arc<RetryCoordinator>,
    counters: Arc<JobCounterAggregator>,
    clock: Arc<dyn Clock>,
    overflow_policy: OverflowPolicy,
}

impl TaskProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn DeliveryQueue>,
        pipeline: LayerPipeline,
        review: Arc<ManualReviewQueue>,
        retry: Arc<RetryCoordinator>,
        counters: Arc<JobCounterAggregator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            pipeline,
            router: ConfidenceRouter::new(config.routing.clone()),
            review,
            retry,
            counters,
            clock,
            overflow_policy: config.review.overflow_policy,
        }
    }

    #[tracing::instrument(
        name = "process_task",
        skip_all,
        fields(task_id = %lease.task_id, job_id = %lease.job_id, delivery = lease.deliveries)
    )]
    pub async fn process(&self, lease: &Lease) -> Result<ProcessOutcome, SieveError> {
        let Some(mut task) = self.store.get_url_task(lease.task_id).await? else {
            warn!("task row missing; dropping delivery");
            self.queue.ack(lease).await?;
            return Ok(ProcessOutcome::Skipped(SkipReason::TaskMissing));
        };
        if task.status.is_settled() {
            debug!(status = ?task.status, "task already settled");
            self.queue.ack(lease).await?;
            return Ok(ProcessOutcome::Skipped(SkipReason::AlreadySettled));
        }

        let job = self
            .store
            .get_job(task.job_id)
            .await?
            .ok_or(StoreError::JobNotFound(task.job_id))?;
        if job.status.is_terminal() {
            info!(job_status = ?job.status, "job no longer active; skipping task");
            self.queue.ack(lease).await?;
            return Ok(ProcessOutcome::Skipped(SkipReason::JobInactive));
        }

        if self.retry.exhausted(&task) {
            // 前回の attempt 中に lease が切れて再配送されたケース
            warn!(attempts = task.attempt_count, "attempt ceiling reached before dequeue");
            self.retry
                .give_up(lease, &mut task, GiveUpReason::MaxAttemptsExceeded)
                .await?;
            return Ok(ProcessOutcome::Failed(GiveUpReason::MaxAttemptsExceeded));
        }

        self.store
            .transition_job(
                job.id,
                &[JobStatus::Pending],
                JobStatus::Processing,
                self.clock.now(),
            )
            .await?;
        self.retry.begin_attempt(&mut task).await?;
        debug!(attempt = task.attempt_count, url = %task.url, "attempt started");

        match self.pipeline.run(&task.url).await {
            Ok(outcome) => self.finish(lease, task, outcome).await,
            Err(signal) => {
                let decision = self.retry.on_failure(lease, &mut task, &signal).await?;
                Ok(match decision {
                    RetryDecision::Retry { delay } => ProcessOutcome::RetryScheduled { delay },
                    RetryDecision::GiveUp { reason } => ProcessOutcome::Failed(reason),
                })
            }
        }
    }

    async fn finish(
        &self,
        lease: &Lease,
        mut task: UrlTask,
        outcome: PipelineOutcome,
    ) -> Result<ProcessOutcome, SieveError> {
        for result in outcome.results() {
            self.store.upsert_layer_result(task.id, result).await?;
        }

        match outcome {
            PipelineOutcome::Eliminated { layer, .. } => {
                task.eliminated_at = Some(layer);
                let delta = CounterDelta::terminal(task.id, Bucket::Rejected)
                    .with_elimination(layer)
                    .with_cost(task.cost);
                self.settle(lease, task, UrlTaskStatus::Rejected, layer.elimination_reason(), delta)
                    .await
            }
            PipelineOutcome::Classified {
                score,
                cost,
                results,
                ..
            } => {
                task.cost += cost;
                task.final_score = Some(score);
                task.confidence_band = self.router.band(score);
                let reasoning = results
                    .last()
                    .map(|r| r.reasoning.clone())
                    .unwrap_or_default();

                match self.router.route(score) {
                    RouteDecision::AutoApprove => {
                        let delta = CounterDelta::terminal(task.id, Bucket::Succeeded)
                            .with_cost(task.cost);
                        self.settle(lease, task, UrlTaskStatus::Succeeded, "auto_approved", delta)
                            .await
                    }
                    RouteDecision::AutoReject => {
                        let delta = CounterDelta::terminal(task.id, Bucket::Rejected)
                            .with_cost(task.cost);
                        self.settle(lease, task, UrlTaskStatus::Rejected, "auto_rejected", delta)
                            .await
                    }
                    RouteDecision::ManualReview(band) => {
                        self.send_to_review(lease, task, band, score, reasoning).await
                    }
                }
            }
        }
    }

    async fn send_to_review(
        &self,
        lease: &Lease,
        mut task: UrlTask,
        band: ConfidenceBand,
        score: f64,
        reasoning: String,
    ) -> Result<ProcessOutcome, SieveError> {
        let entry = ManualReviewEntry::new(
            task.id,
            task.job_id,
            task.url.clone(),
            band,
            score,
            reasoning,
            self.clock.now(),
        );
        match self.review.enqueue(entry).await {
            Ok(_) => {
                task.settle(UrlTaskStatus::AwaitingReview, "manual_review", self.clock.now());
                self.store.upsert_url_task(&task).await?;
                // 行を書く前に判定が入っていたら、その判定で確定させる
                if let Some(stored) = self.store.get_manual_review_entry(task.id).await?
                    && stored.decision.is_some()
                {
                    let task = self.apply_decision(task, &stored).await?;
                    self.queue.ack(lease).await?;
                    return Ok(ProcessOutcome::Settled(task.status));
                }
                self.queue.ack(lease).await?;
                Ok(ProcessOutcome::AwaitingReview(band))
            }
            Err(SieveError::AlreadyReviewed(_)) => {
                // 判定済みの task が再配送された
                let stored = self
                    .store
                    .get_manual_review_entry(task.id)
                    .await?
                    .ok_or(SieveError::ReviewNotFound(task.id))?;
                info!(decision = ?stored.decision, "review already decided; settling from it");
                let task = self.apply_decision(task, &stored).await?;
                self.queue.ack(lease).await?;
                Ok(ProcessOutcome::Settled(task.status))
            }
            Err(SieveError::CapacityExceeded { limit }) => {
                let (status, bucket) = match self.overflow_policy {
                    OverflowPolicy::AutoReject => (UrlTaskStatus::Rejected, Bucket::Rejected),
                    OverflowPolicy::AutoApprove => (UrlTaskStatus::Succeeded, Bucket::Succeeded),
                };
                warn!(limit, policy = ?self.overflow_policy, "review queue full; applying overflow policy");
                let delta = CounterDelta::terminal(task.id, bucket).with_cost(task.cost);
                self.settle(lease, task, status, "queue_overflow", delta).await
            }
            Err(e) => Err(e),
        }
    }

    /// 終端の書き込み順: task 行 → カウンタ → lease
    async fn settle(
        &self,
        lease: &Lease,
        mut task: UrlTask,
        status: UrlTaskStatus,
        reason: &str,
        delta: CounterDelta,
    ) -> Result<ProcessOutcome, SieveError> {
        task.settle(status, reason, self.clock.now());
        self.store.upsert_url_task(&task).await?;
        self.counters.record(task.job_id, delta).await?;
        self.queue.ack(lease).await?;
        info!(
            status = ?status,
            reason,
            score = task.final_score,
            attempts = task.attempt_count,
            "task settled"
        );
        Ok(ProcessOutcome::Settled(status))
    }

    /// 記録済みの review 判定を元の task と job カウンタに反映する。
    /// 同じ entry で何度呼んでもよい
    pub async fn settle_reviewed(&self, entry: &ManualReviewEntry) -> Result<UrlTask, SieveError> {
        let task = self
            .store
            .get_url_task(entry.task_id)
            .await?
            .ok_or(StoreError::TaskNotFound(entry.task_id))?;
        self.apply_decision(task, entry).await
    }

    /// 判定済み entry で `task` を確定する（既に最終状態なら触らない）。
    /// カウンタは行が判定どおりの状態のときだけ動かす
    async fn apply_decision(
        &self,
        mut task: UrlTask,
        entry: &ManualReviewEntry,
    ) -> Result<UrlTask, SieveError> {
        let (status, bucket, reason) = match entry.decision {
            Some(ReviewDecision::Approved) => (
                UrlTaskStatus::Succeeded,
                Bucket::Succeeded,
                "manual_review_approved",
            ),
            Some(ReviewDecision::Rejected) => (
                UrlTaskStatus::Rejected,
                Bucket::Rejected,
                "manual_review_rejected",
            ),
            None => return Ok(task),
        };

        if !task.status.is_final() {
            task.settle(status, reason, self.clock.now());
            self.store.upsert_url_task(&task).await?;
        } else if task.status != status {
            warn!(
                task_id = %task.id,
                status = ?task.status,
                decision = ?entry.decision,
                "task already settled differently; decision not applied"
            );
            return Ok(task);
        }
        let delta = CounterDelta::terminal(task.id, bucket).with_cost(task.cost);
        self.counters.record(task.job_id, delta).await?;
        Ok(task)
    }
}
