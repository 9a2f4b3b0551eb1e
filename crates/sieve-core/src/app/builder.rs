//! AppBuilder - QueueService の構築とワイヤリング
//!
//! # 方針
//! - 起動時検証（Fail-fast）: 設定値と必須コラボレータを build() で検査する
//! - fetcher / llm は必須。それ以外はインメモリ実装がデフォルト
//! - 不足はまとめて BuildError で返す（1 個ずつ直させない）

use std::sync::Arc;

use crate::app::service::QueueService;
use crate::config::{ConfigError, EngineConfig};
use crate::impls::{InMemoryDeliveryQueue, InMemoryStore, TracingNotifier};
use crate::ports::{
    Clock, ContentFetcher, DeliveryQueue, EventSink, IdGenerator, LlmClassifier, Store,
    SystemClock, UlidGenerator,
};

/// AppBuilder は QueueService を構築
///
/// # 使用例
/// ```ignore
/// let service = AppBuilder::new(config)
///     .fetcher(Arc::new(HttpFetcher::new()?))
///     .llm(Arc::new(client))
///     .build()?;
/// service.start().await?;
/// ```
pub struct AppBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    queue: Option<Arc<dyn DeliveryQueue>>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    llm: Option<Arc<dyn LlmClassifier>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing collaborators: {0:?}. These must be provided before build().")]
    MissingCollaborators(Vec<&'static str>),

    #[error("Invalid config: {0}")]
    Config(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            queue: None,
            fetcher: None,
            llm: None,
            events: None,
            clock: None,
            ids: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn DeliveryQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClassifier>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 検証してから QueueService を組み立てる
    ///
    /// # 検証
    /// - EngineConfig::validate()
    /// - fetcher / llm が設定されているか
    pub fn build(self) -> Result<QueueService, BuildError> {
        self.config.validate()?;

        let mut missing = Vec::new();
        if self.fetcher.is_none() {
            missing.push("fetcher");
        }
        if self.llm.is_none() {
            missing.push("llm");
        }
        let (Some(fetcher), Some(llm)) = (self.fetcher, self.llm) else {
            return Err(BuildError::MissingCollaborators(missing));
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let queue = self.queue.unwrap_or_else(|| {
            Arc::new(InMemoryDeliveryQueue::new(self.config.worker.lease_timeout()))
        });
        let events = self.events.unwrap_or_else(|| Arc::new(TracingNotifier));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(QueueService::wire(
            self.config,
            store,
            queue,
            fetcher,
            llm,
            events,
            clock,
            ids,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Signal;
    use crate::ports::{LlmError, LlmRequest, LlmVerdict, PageContent};
    use async_trait::async_trait;

    struct NullFetcher;

    #[async_trait]
    impl ContentFetcher for NullFetcher {
        async fn fetch(&self, url: &str) -> Result<PageContent, Signal> {
            Ok(PageContent::new(url, ""))
        }
    }

    struct NullLlm;

    #[async_trait]
    impl LlmClassifier for NullLlm {
        async fn classify(&self, _request: &LlmRequest) -> Result<LlmVerdict, LlmError> {
            Err(LlmError::permanent("not configured"))
        }
    }

    #[test]
    fn test_build_success() {
        let service = AppBuilder::new(EngineConfig::default())
            .fetcher(Arc::new(NullFetcher))
            .llm(Arc::new(NullLlm))
            .build();
        assert!(service.is_ok());
    }

    #[test]
    fn test_build_missing_collaborators() {
        let service = AppBuilder::new(EngineConfig::default()).build();
        assert!(matches!(
            service,
            Err(BuildError::MissingCollaborators(missing)) if missing == vec!["fetcher", "llm"]
        ));
    }

    #[test]
    fn test_build_missing_llm_only() {
        let service = AppBuilder::new(EngineConfig::default())
            .fetcher(Arc::new(NullFetcher))
            .build();
        assert!(matches!(
            service,
            Err(BuildError::MissingCollaborators(missing)) if missing == vec!["llm"]
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.routing.high = 0.2;
        let service = AppBuilder::new(config)
            .fetcher(Arc::new(NullFetcher))
            .llm(Arc::new(NullLlm))
            .build();
        assert!(matches!(service, Err(BuildError::Config(_))));
    }
}
