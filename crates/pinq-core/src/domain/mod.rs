//! Domain model (ids, requests, queries, errors).

pub mod errors;
pub mod ids;
pub mod query;
pub mod request;

pub use errors::{HandlerError, InvalidRequestId, QueueError, StoreError};
pub use ids::RequestId;
pub use query::{Cursor, DEFAULT_PAGE_LIMIT, Query, Scan};
pub use request::{Pin, Request, Status, Transition};
