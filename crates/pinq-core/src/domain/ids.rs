//! Domain identifiers.
//!
//! `RequestId` は ULID ベースの識別子です。
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **文字列のままソート可能**: Crockford base32 の 26 文字表現は辞書順 = 時刻順
//! - **カーソル兼用**: ページングの before/after にそのまま使える
//!
//! Store のキーには `u128` 表現を使います（ULID の数値順 = 文字列順）。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::errors::InvalidRequestId;

/// Identifier of a pin request.
///
/// Unique across the whole queue, not only within a bucket key.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Milliseconds since the Unix epoch embedded in the identifier.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    /// Numeric form used as a store key.
    pub const fn to_u128(self) -> u128 {
        self.0.0
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Ulid(value))
    }
}

impl From<Ulid> for RequestId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = InvalidRequestId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| InvalidRequestId(s.to_string()))
    }
}
