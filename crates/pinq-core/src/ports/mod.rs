//! Ports - 抽象化レイヤー
//!
//! Queue が外部に依存する部分（時刻、ID 生成、永続化、pin 処理）を trait で定義します。
//! 実装は `impls` に置きます。

pub mod clock;
pub mod handler;
pub mod id_generator;
pub mod request_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::{FnHandler, PinHandler, handler_fn};
pub use self::id_generator::{IdGenerator, UlidGenerator, new_id, new_id_from_time};
pub use self::request_store::RequestStore;
