//! Impls - ports の実装
//!
//! - **InMemoryRequestStore**: テスト・開発用
//! - **RedbRequestStore**: 本番用（redb ファイル 1 つに永続化）

pub mod memory_store;
pub mod redb_store;

#[cfg(test)]
pub(crate) mod store_suite;

pub use self::memory_store::InMemoryRequestStore;
pub use self::redb_store::RedbRequestStore;
