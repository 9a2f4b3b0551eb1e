//! WorkerPool - 固定数の worker で lease を処理する
//!
//! - `shutdown_tx` に true を送ると新しい lease を取らなくなる
//! - 実行中の処理は中断しない（終わってから抜ける）
//! - 処理が Err を返した lease は settle しない → lease timeout 後に再配送

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::app::processor::TaskProcessor;
use crate::domain::QueueError;
use crate::ports::DeliveryQueue;

/// WorkerPool は worker 群のハンドル
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// `n` 個の worker を起動
    pub fn spawn(
        n: usize,
        queue: Arc<dyn DeliveryQueue>,
        processor: Arc<TaskProcessor>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let p = Arc::clone(&processor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(
                async move {
                    worker_loop(q, p, poll_interval, &mut rx).await;
                }
                .instrument(info_span!("worker", worker_id)),
            );
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// 新しい lease を取らなくする。処理中のものは最後まで走る
    pub fn request_shutdown(&self) {
        // receiver が既にいなくてもよい
        let _ = self.shutdown_tx.send(true);
    }

    /// 停止して全 worker の終了を待つ
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn worker_loop(
    queue: Arc<dyn DeliveryQueue>,
    processor: Arc<TaskProcessor>,
    poll_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!("worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // pop は待つので shutdown と競合させる
        let popped = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // pool handle ごと drop された
                    break;
                }
                continue;
            }
            popped = queue.pop(poll_interval) => popped,
        };

        let lease = match popped {
            Ok(Some(lease)) => lease,
            Ok(None) => continue,
            Err(QueueError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "pop failed");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        match processor.process(&lease).await {
            Ok(outcome) => debug!(task_id = %lease.task_id, ?outcome, "lease processed"),
            Err(e) => error!(
                task_id = %lease.task_id,
                error = %e,
                "processing failed; lease left to expire"
            ),
        }
    }
    debug!("worker stopped");
}
