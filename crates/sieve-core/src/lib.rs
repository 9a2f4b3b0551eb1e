//! sieve-core
//!
//! URL classification engine: a queue of URL tasks processed by a worker
//! pool through a three-layer pipeline, with retries, confidence routing and
//! a manual review queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, task, layer, review, signal, errors, events）
//! - **ports**: 抽象化レイヤー（Store, DeliveryQueue, ContentFetcher, LlmClassifier, EventSink, Clock）
//! - **config**: EngineConfig（JSON / デフォルト値 / 検証）
//! - **retry**: ErrorClassifier, BackoffPolicy, RetryCoordinator
//! - **pipeline**: Layer1（ドメイン規則）→ Layer2（コンテンツ規則）→ Layer3（LLM）
//! - **routing**: ConfidenceRouter
//! - **review**: ManualReviewQueue
//! - **counters**: JobCounterAggregator
//! - **app**: AppBuilder, QueueService, TaskProcessor, WorkerPool, ReviewSweeper
//! - **impls**: 実装（InMemoryStore, InMemoryDeliveryQueue, notifier）

pub mod app;
pub mod config;
pub mod counters;
pub mod domain;
pub mod impls;
pub mod pipeline;
pub mod ports;
pub mod retry;
pub mod review;
pub mod routing;

pub use app::{AppBuilder, BuildError, QueueService};
pub use config::EngineConfig;
pub use domain::SieveError;
