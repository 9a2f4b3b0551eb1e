//! Ports - 抽象化レイヤー
//!
//! - `Store`: 正本（job, url task, layer result, review entry）
//! - `DeliveryQueue`: lease 付きの task_id 配送
//! - `ContentFetcher` / `LlmClassifier`: pipeline の I/O コラボレータ
//! - `EventSink`: 通知の配送
//! - `Clock` / `IdGenerator`: テストで差し替えるために注入する

pub mod clock;
pub mod delivery_queue;
pub mod event_sink;
pub mod fetcher;
pub mod id_generator;
pub mod llm;
pub mod store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::delivery_queue::{DeliveryQueue, Lease, QueueDepth};
pub use self::event_sink::{EventSink, NotifyError};
pub use self::fetcher::{ContentFetcher, PageContent};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::llm::{LlmClassifier, LlmError, LlmRequest, LlmVerdict};
pub use self::store::Store;
