//! QueueBuilder - PinQueue の構築とワイヤリング
//!
//! # 起動手順
//! 1. 設定の検証（Fail-fast）
//! 2. 前回プロセスが残した `Pinning` を `Queued` に戻す（`requeue_interrupted`）
//! 3. dispatcher を spawn

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::QueueConfig;
use super::dispatcher::{self, Dispatcher, Shared};
use super::queue::PinQueue;
use crate::domain::StoreError;
use crate::ports::{Clock, IdGenerator, PinHandler, RequestStore, SystemClock, UlidGenerator};

/// QueueBuilder は PinQueue を構築
///
/// # 使用例
/// ```ignore
/// let queue = PinQueue::builder(store, handler)
///     .config(QueueConfig::default().with_max_concurrency(8))
///     .build()
///     .await?;
/// ```
pub struct QueueBuilder {
    store: Arc<dyn RequestStore>,
    handler: Arc<dyn PinHandler>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は PinQueue 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("recovering interrupted requests: {0}")]
    Recovery(#[from] StoreError),
}

impl QueueBuilder {
    pub fn new(store: Arc<dyn RequestStore>, handler: Arc<dyn PinHandler>) -> Self {
        Self {
            store,
            handler,
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            ids: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for `created`/`updated` timestamps and, unless an id
    /// generator is set, for new request ids.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate, recover and start the dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<PinQueue, BuildError> {
        if self.config.max_concurrency == 0 {
            return Err(BuildError::InvalidConfig("max_concurrency must be at least 1"));
        }

        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
        };

        let shared = Arc::new(Shared {
            store: self.store,
            handler: self.handler,
            clock: self.clock,
            max_concurrency: AtomicUsize::new(self.config.max_concurrency),
            config: self.config,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
        });

        if shared.config.requeue_interrupted {
            dispatcher::requeue_interrupted(&shared).await?;
        }

        let handle = Dispatcher::spawn(Arc::clone(&shared));
        info!(
            max_concurrency = shared.max_concurrency(),
            "pin queue started"
        );
        Ok(PinQueue::new(shared, ids, handle))
    }
}
