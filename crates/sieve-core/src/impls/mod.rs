//! Impls - ports の実装（開発用・テスト用）
//!
//! - **InMemoryStore**: Store の正本（プロセス内）
//! - **InMemoryDeliveryQueue**: lease 付きの配送キュー
//! - **TracingNotifier / NoopNotifier / MemoryNotifier**: EventSink
//!
//! 本番用の実装（Postgres, Redis など）はこのクレートの外に置く。

pub mod inmem_delivery;
pub mod inmem_store;
pub mod notifier;

pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::inmem_store::InMemoryStore;
pub use self::notifier::{MemoryNotifier, NoopNotifier, TracingNotifier};
