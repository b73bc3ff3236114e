//! RequestStore port - Request の正本（source of truth）
//!
//! # 設計原則
//! - Request のデータはすべて Store が持つ（dispatcher はコピーを持たない）
//! - 状態遷移は `transition()` による compare-and-set（読み手が途中状態を見ない）
//! - 一覧は `(key, request_id)` 順の range scan
//!
//! # 実装
//! - `InMemoryRequestStore`: テスト・開発用
//! - `RedbRequestStore`: 永続化（redb）

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::domain::{Request, RequestId, Scan, Status, StoreError, Transition};

/// Page size used by [`RequestStore::iterate`] when walking the store.
const ITERATE_BATCH: usize = 256;

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Upsert by `(key, request_id)`, keeping every index in step.
    ///
    /// Ids are unique across keys: fails with `AlreadyExists` when the id is
    /// stored under another key.
    async fn put(&self, request: &Request) -> Result<(), StoreError>;

    /// Insert a new record. Fails with `AlreadyExists` when the id is stored
    /// under any key, this one included.
    async fn create(&self, request: &Request) -> Result<(), StoreError>;

    async fn get(&self, key: &str, id: RequestId) -> Result<Request, StoreError>;

    async fn delete(&self, key: &str, id: RequestId) -> Result<(), StoreError>;

    /// Atomically move a record from `transition.from` to `transition.to`.
    ///
    /// Fails with `NotFound` if the record is gone and `Conflict` if it is in
    /// another state. Returns the updated record.
    async fn transition(
        &self,
        key: &str,
        id: RequestId,
        transition: &Transition,
    ) -> Result<Request, StoreError>;

    /// Ordered page of requests of one key (see [`Scan`] for direction rules).
    /// Status filtering happens before the limit is applied.
    async fn scan(&self, key: &str, scan: &Scan) -> Result<Vec<Request>, StoreError>;

    /// Ascending page over every key, restricted to `statuses` (empty = all).
    async fn scan_all(
        &self,
        statuses: &[Status],
        after: Option<RequestId>,
        limit: usize,
    ) -> Result<Vec<Request>, StoreError>;

    async fn count(&self, key: &str, status: Status) -> Result<usize, StoreError>;

    /// Lazy walk over every key in creation order, restricted to `statuses`.
    fn iterate<'a>(&'a self, statuses: Vec<Status>) -> BoxStream<'a, Result<Request, StoreError>> {
        // (after, done)
        let pages = stream::unfold((None::<RequestId>, false), move |(after, done)| {
            let statuses = statuses.clone();
            async move {
                if done {
                    return None;
                }
                match self.scan_all(&statuses, after, ITERATE_BATCH).await {
                    Ok(page) => {
                        let last = page.last().map(|r| r.request_id);
                        let finished = page.len() < ITERATE_BATCH;
                        let items: Vec<Result<Request, StoreError>> =
                            page.into_iter().map(Ok).collect();
                        Some((stream::iter(items), (last.or(after), finished)))
                    }
                    Err(err) => Some((stream::iter(vec![Err(err)]), (after, true))),
                }
            }
        });
        pages.flatten().boxed()
    }
}
