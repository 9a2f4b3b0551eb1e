//! App - アプリケーション層
//!
//! ports とドメインのコンポーネントを組み合わせてエンジンを動かす。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 構築とワイヤリング（起動時検証）
//! - **QueueService**: 外向け API（submit / cancel / review / status）
//! - **TaskProcessor**: 1 lease 分の処理（pipeline → routing → settle）
//! - **WorkerPool**: lease を取って TaskProcessor に渡すループ
//! - **ReviewSweeper**: stale 判定と自動承認の定期実行

pub mod builder;
pub mod processor;
pub mod service;
pub mod status;
pub mod sweeper_loop;
pub mod worker_loop;


// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError};
pub use self::processor::{ProcessOutcome, SkipReason, TaskProcessor};
pub use self::service::QueueService;
pub use self::status::{EngineStatus, JobStatusView};
pub use self::sweeper_loop::{ReviewSweeper, SweepReport};
pub use self::worker_loop::WorkerPool;
