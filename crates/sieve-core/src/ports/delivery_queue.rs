//! DeliveryQueue port - 配送キュー（task_id のみ）
//!
//! 状態と本体は Store が正本。pop した task は lease 付きで、ack / nack か
//! lease の期限切れ（クラッシュ回復）までは他の worker から見えない。
//! 期限が切れたら再配送される。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, QueueError, TaskId};

/// Lease は 1 task への期限付きの排他的な取得
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub task_id: TaskId,
    pub job_id: JobId,
    /// 配送ごとに変わる。古い token での ack / nack は失敗する
    pub token: u64,
    /// この task_id が配送された回数（初回 pop で 1）
    pub deliveries: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub scheduled: usize,
    pub in_flight: usize,
}

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// `delay` 後に `task_id` を配送可能にする
    async fn push(&self, task_id: TaskId, job_id: JobId, delay: Duration)
    -> Result<(), QueueError>;

    /// 最大 `timeout` 待つ。タイムアウトなら `Ok(None)`
    async fn pop(&self, timeout: Duration) -> Result<Option<Lease>, QueueError>;

    /// lease を確定し、task をキューから外す
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// lease を確定し、`delay` 後に再配送する
    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError>;

    async fn depth(&self) -> QueueDepth;

    /// 配送を止める。待機中の `pop` は `QueueError::Closed` を返す
    fn close(&self);
}
