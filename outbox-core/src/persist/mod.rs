//! 事件存储（persist）
//!
//! 定义调度器依赖的关系型存储协议（`DataStore` / `StoreTx`）及其实现：
//! - `MemoryDataStore`：进程内实现，带真实的行锁语义，用于测试与本地开发；
//! - `PgDataStore`（`postgres` 特性）：基于 sqlx 的 PostgreSQL 参考实现。
//!
//! 协议要求 `SELECT ... FOR UPDATE` 等价的行锁、按 ID 升序取一条、
//! 以及事务内的更新与删除。
//!
mod data_store;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use data_store::{DataStore, StoreTx};
pub use memory::{MemoryDataStore, MemoryTx};
#[cfg(feature = "postgres")]
pub use postgres::{OUTBOX_TABLE, PgDataStore};

pub(crate) use data_store::retention_cutoff;
