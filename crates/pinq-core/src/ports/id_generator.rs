//! IdGenerator port - RequestId 生成の抽象化
//!
//! # ULID の特性
//! - 時刻でソート可能（文字列のままでも）
//! - 分散環境で生成可能（調整不要）
//! - 同一ミリ秒内は乱数部をインクリメントするので、生成順 = ソート順
//!
//! テストでは `FixedClock` を渡して決定的な timestamp にできます。

use std::sync::{LazyLock, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ulid::{Generator, Ulid};

use crate::domain::RequestId;
use crate::ports::{Clock, SystemClock};

/// IdGenerator は RequestId を生成
///
/// Implementations must hand out strictly increasing ids to concurrent callers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> RequestId;
}

/// Monotonic ULID generator driven by a [`Clock`].
pub struct UlidGenerator<C> {
    clock: C,
    inner: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            inner: Mutex::new(Generator::new()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate(&self) -> RequestId {
        let now = SystemTime::from(self.clock.now());
        let mut generator = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match generator.generate_from_datetime(now) {
            Ok(ulid) => RequestId::from_ulid(ulid),
            Err(err) => {
                // 80-bit の乱数部が溢れた場合のみ
                tracing::warn!(error = %err, "monotonic ulid overflow; falling back to random id");
                RequestId::from_ulid(Ulid::from_datetime(now))
            }
        }
    }
}

static GLOBAL: LazyLock<UlidGenerator<SystemClock>> =
    LazyLock::new(|| UlidGenerator::new(SystemClock));

/// New request id from the current time.
pub fn new_id() -> RequestId {
    GLOBAL.generate()
}

/// New request id embedding `t`. Not monotonic across calls with the same
/// timestamp; meant for backfills and tests that control creation order.
pub fn new_id_from_time(t: DateTime<Utc>) -> RequestId {
    let timestamp_ms = t.timestamp_millis().max(0) as u64;
    RequestId::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
}
