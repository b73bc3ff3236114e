//! PinQueue - 公開 API
//!
//! `add_request` / `get_request` / `remove_request` / `list_requests` は
//! store を直接読み書きするだけで、dispatcher や handler を待たない。

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::builder::QueueBuilder;
use super::dispatcher::Shared;
use super::status::StatusCounts;
use crate::domain::{Pin, QueueError, Query, Request, RequestId, Status};
use crate::ports::{IdGenerator, PinHandler, RequestStore};

/// Asynchronous pin request queue.
///
/// Requests are persisted as `Queued`, admitted in global creation order
/// while fewer than `max_concurrency` handlers run, and end `Pinned` or
/// `Failed`. Dropping the queue stops the dispatcher without waiting; call
/// [`close`](Self::close) for a graceful shutdown.
pub struct PinQueue {
    shared: Arc<Shared>,
    ids: Arc<dyn IdGenerator>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PinQueue {
    pub fn builder(store: Arc<dyn RequestStore>, handler: Arc<dyn PinHandler>) -> QueueBuilder {
        QueueBuilder::new(store, handler)
    }

    pub(crate) fn new(
        shared: Arc<Shared>,
        ids: Arc<dyn IdGenerator>,
        dispatcher: JoinHandle<()>,
    ) -> Self {
        Self {
            shared,
            ids,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Persist `request` as `Queued` and wake the dispatcher.
    ///
    /// Request ids are unique across keys; re-adding a stored id fails with
    /// `AlreadyExists` and leaves the stored record untouched.
    pub async fn add_request(&self, mut request: Request) -> Result<Request, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        request.status = Status::Queued;
        request.error = None;
        self.shared.store.create(&request).await?;
        self.shared.wake.notify_one();

        debug!(
            key = %request.key,
            id = %request.request_id,
            cid = %request.pin.cid,
            "request queued"
        );
        Ok(request)
    }

    /// Create a request for `pin` under `key` with a fresh id.
    pub async fn submit(&self, key: impl Into<String>, pin: Pin) -> Result<Request, QueueError> {
        let request = Request::new(key, self.ids.generate(), pin, self.shared.clock.now());
        self.add_request(request).await
    }

    pub async fn get_request(&self, key: &str, id: RequestId) -> Result<Request, QueueError> {
        Ok(self.shared.store.get(key, id).await?)
    }

    /// Delete the record in any state.
    ///
    /// A running handler keeps running unless `cancel_on_remove` is set;
    /// its outcome is dropped either way.
    pub async fn remove_request(&self, key: &str, id: RequestId) -> Result<(), QueueError> {
        self.shared.store.delete(key, id).await?;

        if self.shared.config.cancel_on_remove {
            if let Some(token) = self.shared.in_flight.lock().await.get(&id) {
                debug!(%key, %id, "cancelling removed request");
                token.cancel();
            }
        }
        Ok(())
    }

    /// One page of `key`'s requests.
    ///
    /// Ascending by id without a cursor or with `after`; descending (nearest
    /// first) with `before`. Unknown keys yield an empty page.
    pub async fn list_requests(
        &self,
        key: &str,
        query: &Query,
    ) -> Result<Vec<Request>, QueueError> {
        let scan = query.to_scan()?;
        Ok(self.shared.store.scan(key, &scan).await?)
    }

    pub async fn counts(&self, key: &str) -> Result<StatusCounts, QueueError> {
        let mut counts = StatusCounts::default();
        for status in Status::ALL {
            counts.set(status, self.shared.store.count(key, status).await?);
        }
        Ok(counts)
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency()
    }

    /// Change the admission ceiling. Running handlers are never preempted;
    /// a lower limit only takes effect as they finish.
    pub fn set_max_concurrency(&self, n: usize) {
        let n = n.max(1);
        self.shared.max_concurrency.store(n, Ordering::Release);
        self.shared.wake.notify_one();
        info!(max_concurrency = n, "max concurrency updated");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop admitting, cancel in-flight handlers and wait for the dispatcher
    /// to drain (bounded by `shutdown_timeout`). Idempotent.
    ///
    /// The store stays open; closing it is up to the caller.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.shared.shutdown.cancel();

        let mut dispatcher = self.dispatcher.lock().await;
        if let Some(handle) = dispatcher.take() {
            handle
                .await
                .map_err(|err| QueueError::Dispatcher(err.to_string()))?;
            info!("pin queue closed");
        }
        Ok(())
    }
}

impl Drop for PinQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
