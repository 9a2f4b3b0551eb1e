//! EventSink port - 通知コラボレータ
//!
//! コアから見ると投げっぱなし。emit のエラーは呼び出し側でログに出すだけで、
//! イベントを生んだ操作は巻き戻さない。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::DomainEvent;

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: DomainEvent) -> Result<(), NotifyError>;
}

/// emit してエラーは握りつぶす（ログのみ）。コアがイベントを出すときは常にこれ
pub(crate) async fn emit_best_effort(sink: &dyn EventSink, event: DomainEvent) {
    let name = event.name();
    if let Err(e) = sink.emit(event).await {
        tracing::warn!(event = name, error = %e, "event delivery failed; continuing");
    }
}
