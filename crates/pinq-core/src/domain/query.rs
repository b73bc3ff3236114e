//! Query - 一覧取得のフィルタとページング
//!
//! `Query`（公開 API の入力）を検証して `Scan`（Store への命令）に変換します。
//!
//! # ページングのルール
//! - cursor なし: 最も古いものから昇順
//! - `after = X`: `X` より新しいものを昇順
//! - `before = X`: `X` より古いものを、`X` に近い順（降順）

use serde::{Deserialize, Serialize};

use super::errors::QueueError;
use super::ids::RequestId;
use super::request::Status;

/// Page size used when a query does not set `limit`.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Read-only filter/pagination descriptor for listing requests of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Empty means all statuses.
    #[serde(default)]
    pub status: Vec<Status>,

    #[serde(default)]
    pub before: Option<RequestId>,

    #[serde(default)]
    pub after: Option<RequestId>,

    /// 0 means [`DEFAULT_PAGE_LIMIT`].
    #[serde(default)]
    pub limit: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl IntoIterator<Item = Status>) -> Self {
        self.status.extend(status);
        self
    }

    pub fn before(mut self, id: RequestId) -> Self {
        self.before = Some(id);
        self
    }

    pub fn after(mut self, id: RequestId) -> Self {
        self.after = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Validate and translate into a store scan.
    pub fn to_scan(&self) -> Result<Scan, QueueError> {
        let cursor = match (self.before, self.after) {
            (Some(_), Some(_)) => {
                return Err(QueueError::InvalidQuery(
                    "before and after are mutually exclusive",
                ));
            }
            (Some(id), None) => Cursor::Before(id),
            (None, Some(id)) => Cursor::After(id),
            (None, None) => Cursor::Start,
        };

        let mut statuses = self.status.clone();
        statuses.sort();
        statuses.dedup();

        let limit = if self.limit == 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            self.limit
        };

        Ok(Scan {
            statuses,
            cursor,
            limit,
        })
    }
}

/// Scan boundary; also decides the scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Oldest first.
    Start,
    /// Ids strictly greater than the cursor, ascending.
    After(RequestId),
    /// Ids strictly smaller than the cursor, descending.
    Before(RequestId),
}

impl Cursor {
    pub fn is_descending(&self) -> bool {
        matches!(self, Cursor::Before(_))
    }
}

/// Validated scan over the requests of a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    /// Sorted, deduplicated; empty means all statuses.
    pub statuses: Vec<Status>,
    pub cursor: Cursor,
    pub limit: usize,
}

impl Scan {
    pub fn matches(&self, status: Status) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn id() -> RequestId {
        RequestId::from_ulid(Ulid::new())
    }

    #[test]
    fn empty_query_uses_default_limit_and_start_cursor() {
        let scan = Query::new().to_scan().unwrap();
        assert_eq!(scan.limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(scan.cursor, Cursor::Start);
        assert!(scan.statuses.is_empty());
    }

    #[rstest]
    #[case::no_filter(vec![])]
    #[case::with_filter(vec![Status::Pinned])]
    fn before_and_after_together_is_invalid(#[case] status: Vec<Status>) {
        let q = Query::new()
            .with_status(status)
            .before(id())
            .after(id())
            .limit(5);
        assert!(matches!(q.to_scan(), Err(QueueError::InvalidQuery(_))));
    }

    #[test]
    fn cursor_direction() {
        let c = id();
        assert!(!Query::new().after(c).to_scan().unwrap().cursor.is_descending());
        assert!(Query::new().before(c).to_scan().unwrap().cursor.is_descending());
    }

    #[test]
    fn statuses_are_deduplicated() {
        let scan = Query::new()
            .with_status([Status::Failed, Status::Pinned, Status::Failed])
            .to_scan()
            .unwrap();
        assert_eq!(scan.statuses, vec![Status::Pinned, Status::Failed]);
        assert!(scan.matches(Status::Pinned));
        assert!(!scan.matches(Status::Queued));
    }

    #[test]
    fn explicit_limit_is_kept() {
        assert_eq!(Query::new().limit(500).to_scan().unwrap().limit, 500);
    }
}
