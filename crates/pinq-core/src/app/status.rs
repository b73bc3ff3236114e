//! Status - バケットごとの件数

use serde::{Deserialize, Serialize};

use crate::domain::Status;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub pinning: usize,
    pub pinned: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn set(&mut self, status: Status, n: usize) {
        match status {
            Status::Queued => self.queued = n,
            Status::Pinning => self.pinning = n,
            Status::Pinned => self.pinned = n,
            Status::Failed => self.failed = n,
        }
    }

    /// Requests still waiting for or running a handler.
    pub fn pending(&self) -> usize {
        self.queued + self.pinning
    }

    pub fn total(&self) -> usize {
        self.pending() + self.pinned + self.failed
    }
}
