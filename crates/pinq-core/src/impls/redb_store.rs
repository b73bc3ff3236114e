//! RedbRequestStore - redb による永続化
//!
//! # テーブル
//! - `requests`: `(key, id) -> Request (json)` 正本
//! - `requests_by_key_status`: `(key, status, id) -> ()` 一覧のステータス絞り込み用
//! - `requests_by_status`: `(status, id) -> key` dispatcher の FIFO / リカバリ用
//!
//! 書き込みは 1 トランザクションで 3 テーブルすべてを更新します。
//! 読み込みは MVCC の read transaction なので、途中状態は見えません。
//! redb は同期 API なので `spawn_blocking` で実行します。

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};

use crate::domain::{Cursor, Request, RequestId, Scan, Status, StoreError, Transition};
use crate::ports::RequestStore;

const REQUESTS: TableDefinition<(&str, u128), &[u8]> = TableDefinition::new("requests");
const BY_KEY_STATUS: TableDefinition<(&str, u8, u128), ()> =
    TableDefinition::new("requests_by_key_status");
const BY_STATUS: TableDefinition<(u8, u128), &str> = TableDefinition::new("requests_by_status");

/// Durable `RequestStore` backed by a redb database.
///
/// The database handle is shared; the embedding system may keep its own
/// `Arc<Database>` and decides when it is closed.
#[derive(Clone)]
pub struct RedbRequestStore {
    db: Arc<Database>,
}

impl RedbRequestStore {
    /// Open (or create) `requests.redb` inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let db = Database::create(dir.as_ref().join("requests.redb")).map_err(backend)?;
        Self::new(Arc::new(db))
    }

    /// Wrap an already open database, creating the tables if needed.
    pub fn new(db: Arc<Database>) -> Result<Self, StoreError> {
        // 最初のアクセスが read でも失敗しないようにテーブルを作っておく
        let write_txn = db.begin_write().map_err(backend)?;
        {
            write_txn.open_table(REQUESTS).map_err(backend)?;
            write_txn.open_table(BY_KEY_STATUS).map_err(backend)?;
            write_txn.open_table(BY_STATUS).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;
        Ok(Self { db })
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Task(format!("redb {op} task failed: {e}")))?
    }
}

impl std::fmt::Debug for RedbRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRequestStore").finish()
    }
}

fn backend(err: impl Into<redb::Error>) -> StoreError {
    StoreError::backend(err.into())
}

fn decode(bytes: &[u8]) -> Result<Request, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn not_found(key: &str, id: RequestId) -> StoreError {
    StoreError::NotFound {
        key: key.to_string(),
        id,
    }
}

fn id_bounds(cursor: Cursor) -> (Bound<u128>, Bound<u128>) {
    match cursor {
        Cursor::Start => (Bound::Included(0), Bound::Included(u128::MAX)),
        Cursor::After(c) => (Bound::Excluded(c.to_u128()), Bound::Included(u128::MAX)),
        Cursor::Before(c) => (Bound::Included(0), Bound::Excluded(c.to_u128())),
    }
}

fn load(txn: &WriteTransaction, key: &str, id: u128) -> Result<Option<Request>, StoreError> {
    let requests = txn.open_table(REQUESTS).map_err(backend)?;
    let found = requests.get((key, id)).map_err(backend)?;
    found.map(|guard| decode(guard.value())).transpose()
}

/// Key currently owning `id`, looked up through the status index.
fn owner(txn: &WriteTransaction, id: u128) -> Result<Option<String>, StoreError> {
    let by_status = txn.open_table(BY_STATUS).map_err(backend)?;
    for status in Status::ALL {
        if let Some(key) = by_status.get((status.as_u8(), id)).map_err(backend)? {
            return Ok(Some(key.value().to_string()));
        }
    }
    Ok(None)
}

fn already_exists(key: String, id: RequestId) -> StoreError {
    StoreError::AlreadyExists { key, id }
}

/// Replace `previous` (if any) with `request` in every table.
fn write_record(
    txn: &WriteTransaction,
    previous: Option<&Request>,
    request: &Request,
) -> Result<(), StoreError> {
    let id = request.request_id.to_u128();
    let bytes = serde_json::to_vec(request)?;

    let mut requests = txn.open_table(REQUESTS).map_err(backend)?;
    let mut by_key_status = txn.open_table(BY_KEY_STATUS).map_err(backend)?;
    let mut by_status = txn.open_table(BY_STATUS).map_err(backend)?;

    if let Some(prev) = previous {
        by_key_status
            .remove((prev.key.as_str(), prev.status.as_u8(), id))
            .map_err(backend)?;
        by_status.remove((prev.status.as_u8(), id)).map_err(backend)?;
    }

    requests
        .insert((request.key.as_str(), id), bytes.as_slice())
        .map_err(backend)?;
    by_key_status
        .insert((request.key.as_str(), request.status.as_u8(), id), ())
        .map_err(backend)?;
    by_status
        .insert((request.status.as_u8(), id), request.key.as_str())
        .map_err(backend)?;
    Ok(())
}

fn remove_record(txn: &WriteTransaction, request: &Request) -> Result<(), StoreError> {
    let id = request.request_id.to_u128();
    let mut requests = txn.open_table(REQUESTS).map_err(backend)?;
    let mut by_key_status = txn.open_table(BY_KEY_STATUS).map_err(backend)?;
    let mut by_status = txn.open_table(BY_STATUS).map_err(backend)?;

    requests
        .remove((request.key.as_str(), id))
        .map_err(backend)?;
    by_key_status
        .remove((request.key.as_str(), request.status.as_u8(), id))
        .map_err(backend)?;
    by_status
        .remove((request.status.as_u8(), id))
        .map_err(backend)?;
    Ok(())
}

#[async_trait]
impl RequestStore for RedbRequestStore {
    async fn put(&self, request: &Request) -> Result<(), StoreError> {
        let request = request.clone();
        self.blocking("put", move |db| {
            let txn = db.begin_write().map_err(backend)?;
            let id = request.request_id.to_u128();
            if let Some(key) = owner(&txn, id)? {
                if key != request.key {
                    return Err(already_exists(key, request.request_id));
                }
            }
            let previous = load(&txn, &request.key, id)?;
            write_record(&txn, previous.as_ref(), &request)?;
            txn.commit().map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn create(&self, request: &Request) -> Result<(), StoreError> {
        let request = request.clone();
        self.blocking("create", move |db| {
            let txn = db.begin_write().map_err(backend)?;
            if let Some(key) = owner(&txn, request.request_id.to_u128())? {
                return Err(already_exists(key, request.request_id));
            }
            write_record(&txn, None, &request)?;
            txn.commit().map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str, id: RequestId) -> Result<Request, StoreError> {
        let key = key.to_string();
        self.blocking("get", move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let requests = txn.open_table(REQUESTS).map_err(backend)?;
            let found = requests
                .get((key.as_str(), id.to_u128()))
                .map_err(backend)?;
            match found {
                Some(guard) => decode(guard.value()),
                None => Err(not_found(&key, id)),
            }
        })
        .await
    }

    async fn delete(&self, key: &str, id: RequestId) -> Result<(), StoreError> {
        let key = key.to_string();
        self.blocking("delete", move |db| {
            let txn = db.begin_write().map_err(backend)?;
            let existing = load(&txn, &key, id.to_u128())?.ok_or_else(|| not_found(&key, id))?;
            remove_record(&txn, &existing)?;
            txn.commit().map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn transition(
        &self,
        key: &str,
        id: RequestId,
        transition: &Transition,
    ) -> Result<Request, StoreError> {
        let key = key.to_string();
        let transition = transition.clone();
        self.blocking("transition", move |db| {
            let txn = db.begin_write().map_err(backend)?;
            let previous = load(&txn, &key, id.to_u128())?.ok_or_else(|| not_found(&key, id))?;
            let mut next = previous.clone();
            next.apply(&transition)
                .map_err(|actual| StoreError::Conflict {
                    id,
                    expected: transition.from,
                    actual,
                })?;
            write_record(&txn, Some(&previous), &next)?;
            txn.commit().map_err(backend)?;
            Ok(next)
        })
        .await
    }

    async fn scan(&self, key: &str, scan: &Scan) -> Result<Vec<Request>, StoreError> {
        let key = key.to_string();
        let scan = scan.clone();
        self.blocking("scan", move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let requests = txn.open_table(REQUESTS).map_err(backend)?;
            let (lo, hi) = id_bounds(scan.cursor);
            let descending = scan.cursor.is_descending();

            if scan.statuses.is_empty() {
                let k = key.as_str();
                let range = requests
                    .range((lo.map(|id| (k, id)), hi.map(|id| (k, id))))
                    .map_err(backend)?;
                let entries: Box<dyn Iterator<Item = _> + '_> = if descending {
                    Box::new(range.rev())
                } else {
                    Box::new(range)
                };
                let mut page = Vec::with_capacity(scan.limit.min(1024));
                for entry in entries.take(scan.limit) {
                    let (_, value) = entry.map_err(backend)?;
                    page.push(decode(value.value())?);
                }
                return Ok(page);
            }

            // ステータスごとの index range を取り、id 順にマージしてから limit
            let by_key_status = txn.open_table(BY_KEY_STATUS).map_err(backend)?;
            let k = key.as_str();
            let mut ids: Vec<u128> = Vec::new();
            for status in &scan.statuses {
                let s = status.as_u8();
                let range = by_key_status
                    .range((lo.map(|id| (k, s, id)), hi.map(|id| (k, s, id))))
                    .map_err(backend)?;
                let entries: Box<dyn Iterator<Item = _> + '_> = if descending {
                    Box::new(range.rev())
                } else {
                    Box::new(range)
                };
                for entry in entries.take(scan.limit) {
                    let (index_key, _) = entry.map_err(backend)?;
                    ids.push(index_key.value().2);
                }
            }
            if descending {
                ids.sort_unstable_by(|a, b| b.cmp(a));
            } else {
                ids.sort_unstable();
            }
            ids.truncate(scan.limit);

            let mut page = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(guard) = requests.get((k, id)).map_err(backend)? {
                    page.push(decode(guard.value())?);
                }
            }
            Ok(page)
        })
        .await
    }

    async fn scan_all(
        &self,
        statuses: &[Status],
        after: Option<RequestId>,
        limit: usize,
    ) -> Result<Vec<Request>, StoreError> {
        let statuses = if statuses.is_empty() {
            Status::ALL.to_vec()
        } else {
            statuses.to_vec()
        };
        self.blocking("scan_all", move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let requests = txn.open_table(REQUESTS).map_err(backend)?;
            let by_status = txn.open_table(BY_STATUS).map_err(backend)?;
            let lo = match after {
                Some(id) => Bound::Excluded(id.to_u128()),
                None => Bound::Included(0),
            };

            let mut hits: Vec<(u128, String)> = Vec::new();
            for status in &statuses {
                let s = status.as_u8();
                let range = by_status
                    .range((lo.map(|id| (s, id)), Bound::Included((s, u128::MAX))))
                    .map_err(backend)?;
                for entry in range.take(limit) {
                    let (index_key, key) = entry.map_err(backend)?;
                    hits.push((index_key.value().1, key.value().to_string()));
                }
            }
            hits.sort_unstable_by_key(|(id, _)| *id);
            hits.truncate(limit);

            let mut page = Vec::with_capacity(hits.len());
            for (id, key) in hits {
                if let Some(guard) = requests.get((key.as_str(), id)).map_err(backend)? {
                    page.push(decode(guard.value())?);
                }
            }
            Ok(page)
        })
        .await
    }

    async fn count(&self, key: &str, status: Status) -> Result<usize, StoreError> {
        let key = key.to_string();
        self.blocking("count", move |db| {
            let txn = db.begin_read().map_err(backend)?;
            let by_key_status = txn.open_table(BY_KEY_STATUS).map_err(backend)?;
            let (k, s) = (key.as_str(), status.as_u8());
            let range = by_key_status
                .range((k, s, 0u128)..=(k, s, u128::MAX))
                .map_err(backend)?;
            let mut n = 0;
            for entry in range {
                entry.map_err(backend)?;
                n += 1;
            }
            Ok(n)
        })
        .await
    }
}
