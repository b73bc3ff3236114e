//! Pin request record and its state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RequestId;

/// Request status.
///
/// State transitions:
/// - Queued -> Pinning -> Pinned
/// - Queued -> Pinning -> Failed
/// - Pinning -> Queued (recovery after a crash, or interrupted by shutdown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for a concurrency slot.
    Queued,

    /// Handler is running.
    Pinning,

    /// Handler returned success.
    Pinned,

    /// Handler returned an error, panicked or timed out.
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Queued,
        Status::Pinning,
        Status::Pinned,
        Status::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Pinned | Status::Failed)
    }

    /// Stable one-byte tag used in store index keys.
    pub fn as_u8(self) -> u8 {
        match self {
            Status::Queued => 0,
            Status::Pinning => 1,
            Status::Pinned => 2,
            Status::Failed => 3,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_u8() == tag)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Pinning => "pinning",
            Status::Pinned => "pinned",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pin object of the Pinning Service API. Opaque to the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub cid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Multiaddrs the data may be fetched from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Pin {
    pub fn new(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One unit of pinning work, addressed by `(key, request_id)`.
///
/// The store owns these records; the dispatcher only changes them through
/// [`Transition`] so a reader never sees a half-applied update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Owning bucket key.
    pub key: String,
    pub request_id: RequestId,
    pub status: Status,
    pub pin: Pin,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    /// Last handler error (set when the request is `Failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Request {
    pub fn new(
        key: impl Into<String>,
        request_id: RequestId,
        pin: Pin,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            request_id,
            status: Status::Queued,
            pin,
            created: now,
            updated: now,
            error: None,
        }
    }

    /// Apply a status transition. Fails with the current status when the
    /// record is not in `transition.from`.
    pub fn apply(&mut self, transition: &Transition) -> Result<(), Status> {
        if self.status != transition.from {
            return Err(self.status);
        }
        self.status = transition.to;
        self.updated = transition.at;
        self.error = transition.error.clone();
        Ok(())
    }
}

/// Compare-and-set status change applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Transition {
    pub fn start_pinning(at: DateTime<Utc>) -> Self {
        Self {
            from: Status::Queued,
            to: Status::Pinning,
            at,
            error: None,
        }
    }

    pub fn pinned(at: DateTime<Utc>) -> Self {
        Self {
            from: Status::Pinning,
            to: Status::Pinned,
            at,
            error: None,
        }
    }

    pub fn failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            from: Status::Pinning,
            to: Status::Failed,
            at,
            error: Some(error.into()),
        }
    }

    /// Move an interrupted request back to the queue.
    pub fn requeue(at: DateTime<Utc>) -> Self {
        Self {
            from: Status::Pinning,
            to: Status::Queued,
            at,
            error: None,
        }
    }
}
