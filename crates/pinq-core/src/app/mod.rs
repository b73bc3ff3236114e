//! App - アプリケーション層
//!
//! ports を組み合わせて pin queue を組み立てる。
//!
//! # 主要コンポーネント
//! - **PinQueue**: 公開 API（add / get / remove / list / counts / close）
//! - **QueueBuilder**: 構築、起動時のリカバリ、dispatcher の spawn
//! - **Dispatcher**: 並列度制限つきの admission と handler 実行
//! - **QueueConfig / RetryPolicy**: 設定

pub mod builder;
pub mod config;
mod dispatcher;
pub mod queue;
pub mod retry;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, QueueBuilder};
pub use self::config::QueueConfig;
pub use self::queue::PinQueue;
pub use self::retry::RetryPolicy;
pub use self::status::StatusCounts;
