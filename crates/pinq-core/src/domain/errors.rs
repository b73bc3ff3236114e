//! Errors - エラー型と分類
//!
//! - `StoreError`: 永続化層のエラー（NotFound / Conflict / Backend ...）
//! - `QueueError`: 公開 API のエラー
//! - `HandlerError`: handler が返すエラー（Request の `Failed` として記録される）

use thiserror::Error;

use super::ids::RequestId;
use super::request::Status;

/// Error returned by a pin handler. Never surfaced to `add_request` callers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
#[error("invalid request id: {0:?}")]
pub struct InvalidRequestId(pub String);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request not found: key={key} id={id}")]
    NotFound { key: String, id: RequestId },

    /// The id is already stored, under `key`.
    #[error("request already exists: key={key} id={id}")]
    AlreadyExists { key: String, id: RequestId },

    /// A status transition found the record in an unexpected state.
    #[error("request {id} is {actual}, expected {expected}")]
    Conflict {
        id: RequestId,
        expected: Status,
        actual: Status,
    },

    #[error("record codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        StoreError::Backend(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),

    #[error("request not found: key={key} id={id}")]
    NotFound { key: String, id: RequestId },

    #[error(transparent)]
    InvalidRequestId(#[from] InvalidRequestId),

    #[error("request already exists: key={key} id={id}")]
    AlreadyExists { key: String, id: RequestId },

    #[error("queue is closed")]
    Closed,

    #[error("dispatcher task failed: {0}")]
    Dispatcher(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key, id } => QueueError::NotFound { key, id },
            StoreError::AlreadyExists { key, id } => QueueError::AlreadyExists { key, id },
            other => QueueError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn store_not_found_maps_to_queue_not_found() {
        let id = RequestId::from_ulid(Ulid::new());
        let err: QueueError = StoreError::NotFound {
            key: "bucket".to_string(),
            id,
        }
        .into();
        assert!(matches!(
            err,
            QueueError::NotFound { key, id: got } if key == "bucket" && got == id
        ));
    }

    #[test]
    fn backend_errors_stay_store_errors() {
        let err: QueueError = StoreError::backend("disk on fire").into();
        assert!(matches!(err, QueueError::Store(StoreError::Backend(_))));
        assert!(err.to_string().contains("disk on fire"));
    }
}
