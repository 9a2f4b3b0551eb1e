//! ReviewSweeper - manual review キューの定期メンテナンス
//!
//! # フロー（1 tick）
//! 1. stale_after を超えた未判定エントリに is_stale を立てる（item_stale を通知）
//! 2. auto_review_timeout が設定されていれば、それを超えたエントリを自動承認
//!
//! どちらもキューからの削除はしない。自動承認は通常の decide と同じ経路。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::processor::TaskProcessor;
use crate::config::ReviewConfig;
use crate::domain::{ReviewDecision, SieveError};
use crate::ports::Clock;
use crate::review::ManualReviewQueue;

const AUTO_APPROVE_NOTE: &str = "auto-approved after review timeout";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_stale: usize,
    pub auto_approved: usize,
}

pub struct ReviewSweeper {
    review: Arc<ManualReviewQueue>,
    processor: Arc<TaskProcessor>,
    clock: Arc<dyn Clock>,
    stale_after: chrono::Duration,
    auto_review_after: Option<chrono::Duration>,
    interval: Duration,
}

impl ReviewSweeper {
    pub fn new(
        config: &ReviewConfig,
        review: Arc<ManualReviewQueue>,
        processor: Arc<TaskProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            review,
            processor,
            clock,
            stale_after: config.stale_after(),
            auto_review_after: config.auto_review_after(),
            interval: config.sweep_interval(),
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, SieveError> {
        let now = self.clock.now();
        let stale = self.review.mark_stale(now, self.stale_after).await?;

        let mut auto_approved = 0;
        if let Some(age) = self.auto_review_after {
            for entry in self.review.expired(now, age).await {
                let decided = match self
                    .review
                    .decide(
                        entry.task_id,
                        ReviewDecision::Approved,
                        Some(AUTO_APPROVE_NOTE.to_string()),
                    )
                    .await
                {
                    Ok(decided) => decided,
                    // 先に reviewer が判定した
                    Err(SieveError::AlreadyReviewed(_) | SieveError::ReviewNotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                self.processor.settle_reviewed(&decided).await?;
                auto_approved += 1;
            }
        }

        let report = SweepReport {
            marked_stale: stale.len(),
            auto_approved,
        };
        if report != SweepReport::default() {
            info!(
                marked_stale = report.marked_stale,
                auto_approved = report.auto_approved,
                "review sweep"
            );
        }
        Ok(report)
    }

    /// shutdown まで一定間隔で `sweep_once` を回す
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.sweep_once().await {
                    warn!(error = %e, "review sweep failed");
                }
            }
            debug!("review sweeper stopped");
        })
    }
}
