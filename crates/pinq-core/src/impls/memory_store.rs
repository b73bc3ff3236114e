//! In-memory request store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Cursor, Request, RequestId, Scan, Status, StoreError, Transition};
use crate::ports::RequestStore;

const MIN_ID: RequestId = RequestId::from_u128(0);
const MAX_ID: RequestId = RequestId::from_u128(u128::MAX);

#[derive(Default)]
struct InMemoryState {
    /// All records (single source of truth).
    records: BTreeMap<(String, RequestId), Request>,

    /// Owning key of every stored id.
    owners: HashMap<RequestId, String>,

    /// Global creation order per status.
    by_status: BTreeSet<(Status, RequestId)>,
}

impl InMemoryState {
    fn insert(&mut self, request: &Request) {
        let id = request.request_id;
        let previous = self
            .records
            .insert((request.key.clone(), id), request.clone());
        if let Some(prev) = previous {
            self.by_status.remove(&(prev.status, id));
        }
        self.owners.insert(id, request.key.clone());
        self.by_status.insert((request.status, id));
    }

    fn already_exists(&self, id: RequestId) -> Option<StoreError> {
        self.owners.get(&id).map(|key| StoreError::AlreadyExists {
            key: key.clone(),
            id,
        })
    }
}

/// `RequestStore` kept entirely in memory. Intended for tests and dev.
///
/// One tokio mutex guards every map, so each operation is atomic with
/// respect to the others.
#[derive(Default)]
pub struct InMemoryRequestStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }
}

type Key = (String, RequestId);

fn key_range(key: &str, cursor: Cursor) -> (Bound<Key>, Bound<Key>) {
    let at = |id| (key.to_string(), id);
    match cursor {
        Cursor::Start => (Bound::Included(at(MIN_ID)), Bound::Included(at(MAX_ID))),
        Cursor::After(c) => (Bound::Excluded(at(c)), Bound::Included(at(MAX_ID))),
        Cursor::Before(c) => (Bound::Included(at(MIN_ID)), Bound::Excluded(at(c))),
    }
}

fn not_found(key: &str, id: RequestId) -> StoreError {
    StoreError::NotFound {
        key: key.to_string(),
        id,
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn put(&self, request: &Request) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.owners.get(&request.request_id) {
            Some(owner) if *owner != request.key => {
                return Err(StoreError::AlreadyExists {
                    key: owner.clone(),
                    id: request.request_id,
                });
            }
            _ => {}
        }
        state.insert(request);
        Ok(())
    }

    async fn create(&self, request: &Request) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.already_exists(request.request_id) {
            return Err(err);
        }
        state.insert(request);
        Ok(())
    }

    async fn get(&self, key: &str, id: RequestId) -> Result<Request, StoreError> {
        let state = self.state.lock().await;
        state
            .records
            .get(&(key.to_string(), id))
            .cloned()
            .ok_or_else(|| not_found(key, id))
    }

    async fn delete(&self, key: &str, id: RequestId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let removed = state
            .records
            .remove(&(key.to_string(), id))
            .ok_or_else(|| not_found(key, id))?;
        state.owners.remove(&id);
        state.by_status.remove(&(removed.status, id));
        Ok(())
    }

    async fn transition(
        &self,
        key: &str,
        id: RequestId,
        transition: &Transition,
    ) -> Result<Request, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&(key.to_string(), id))
            .ok_or_else(|| not_found(key, id))?;
        record
            .apply(transition)
            .map_err(|actual| StoreError::Conflict {
                id,
                expected: transition.from,
                actual,
            })?;
        let updated = record.clone();
        state.by_status.remove(&(transition.from, id));
        state.by_status.insert((transition.to, id));
        Ok(updated)
    }

    async fn scan(&self, key: &str, scan: &Scan) -> Result<Vec<Request>, StoreError> {
        let state = self.state.lock().await;
        let range = state.records.range(key_range(key, scan.cursor));
        let matching = |(_, r): &(&Key, &Request)| scan.matches(r.status);

        let page = if scan.cursor.is_descending() {
            range
                .rev()
                .filter(matching)
                .take(scan.limit)
                .map(|(_, r)| r.clone())
                .collect()
        } else {
            range
                .filter(matching)
                .take(scan.limit)
                .map(|(_, r)| r.clone())
                .collect()
        };
        Ok(page)
    }

    async fn scan_all(
        &self,
        statuses: &[Status],
        after: Option<RequestId>,
        limit: usize,
    ) -> Result<Vec<Request>, StoreError> {
        let statuses = if statuses.is_empty() {
            &Status::ALL[..]
        } else {
            statuses
        };
        let state = self.state.lock().await;

        // ステータスごとの index range を取り、id 順にマージしてから limit
        let mut ids: Vec<RequestId> = Vec::new();
        for &status in statuses {
            let lower = match after {
                Some(id) => Bound::Excluded((status, id)),
                None => Bound::Included((status, MIN_ID)),
            };
            let upper = Bound::Included((status, MAX_ID));
            ids.extend(
                state
                    .by_status
                    .range((lower, upper))
                    .take(limit)
                    .map(|(_, id)| *id),
            );
        }
        ids.sort_unstable();
        ids.dedup();
        ids.truncate(limit);

        let page = ids
            .into_iter()
            .filter_map(|id| {
                let key = state.owners.get(&id)?;
                state.records.get(&(key.clone(), id)).cloned()
            })
            .collect();
        Ok(page)
    }

    async fn count(&self, key: &str, status: Status) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .range(key_range(key, Cursor::Start))
            .filter(|(_, r)| r.status == status)
            .count())
    }
}
