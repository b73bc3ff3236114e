//! pinq-core
//!
//! Asynchronous pin request queue for a pinning service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, request, query, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, RequestStore, PinHandler）
//! - **impls**: 実装（InMemoryRequestStore, RedbRequestStore）
//! - **app**: アプリケーションロジック（PinQueue, QueueBuilder, dispatcher, config）
//!
//! # 使用例
//! ```ignore
//! let store = Arc::new(RedbRequestStore::open("./data")?);
//! let queue = PinQueue::builder(store, Arc::new(handler)).build().await?;
//! let request = queue.submit("bucket", Pin::new("bafy...")).await?;
//! let page = queue.list_requests("bucket", &Query::new()).await?;
//! queue.close().await?;
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{BuildError, PinQueue, QueueBuilder, QueueConfig, RetryPolicy, StatusCounts};
pub use domain::{HandlerError, Pin, Query, QueueError, Request, RequestId, Status, StoreError};
pub use ports::{PinHandler, RequestStore, handler_fn};
