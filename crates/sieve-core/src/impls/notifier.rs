//! EventSink の実装
//!
//! - `TracingNotifier`: イベントを構造化ログとして出す（デフォルト）
//! - `NoopNotifier`: 捨てる
//! - `MemoryNotifier`: 受け取ったイベントを溜める（テスト・埋め込み用）

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::domain::DomainEvent;
use crate::ports::{EventSink, NotifyError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl EventSink for TracingNotifier {
    async fn emit(&self, event: DomainEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&event).map_err(|e| NotifyError(e.to_string()))?;
        info!(event = event.name(), %payload, "notification");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl EventSink for NoopNotifier {
    async fn emit(&self, _event: DomainEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// MemoryNotifier は全イベントを記録する。`failing()` だと記録したうえで
/// 配送エラーを返す（呼び出し側が止まらないことの確認用）
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<DomainEvent>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventSink for MemoryNotifier {
    async fn emit(&self, event: DomainEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        if self.fail {
            return Err(NotifyError("notifier configured to fail".into()));
        }
        Ok(())
    }
}
