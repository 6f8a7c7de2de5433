//! 事件存储协议
//!
//! 调度器通过 `get_tx` 打开事务，在同一事务内组合“认领 → 标记 → 发布”，
//! 行锁保证多个实例并发调度时同一记录只会被一个事务持有。
//!
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventId, EventRecord, NewEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 存储事务句柄：提交或回滚；未提交即被丢弃时等同回滚
#[async_trait]
pub trait StoreTx: Send + 'static {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    type Tx: StoreTx;

    /// 分配新 ID 并插入待投递记录
    async fn add(&self, event: NewEvent) -> Result<EventId>;

    /// 在调用方事务内插入（与业务变更同事务提交）
    async fn add_in(&self, tx: &mut Self::Tx, event: NewEvent) -> Result<EventId>;

    /// 打开一个调度事务
    async fn get_tx(&self) -> Result<Self::Tx>;

    /// 在事务内锁定并返回 ID 最小的待投递记录；`None` 表示队列当前为空
    async fn get_event(&self, tx: &mut Self::Tx) -> Result<Option<EventRecord>>;

    /// 在同一事务内将记录标记为已投递（`dispatched_at = now`）
    async fn set_as_dispatched(&self, tx: &mut Self::Tx, id: EventId) -> Result<()>;

    /// 删除至多 `batch_size` 条已投递且超过保留时长的记录，返回删除数量
    async fn remove(&self, retention: Duration, batch_size: usize) -> Result<u64>;

    /// 读取单条记录（事务外，用于巡检与测试）
    async fn get(&self, id: EventId) -> Result<Option<EventRecord>>;
}

/// 清理截止时间：`now - retention`
pub(crate) fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .ok_or_else(|| {
            OutboxError::configuration(format!("retention {retention:?} is out of range"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_subtracts_retention() {
        let now = Utc::now();
        let cutoff = retention_cutoff(now, Duration::from_secs(3600)).unwrap();
        assert_eq!(now - cutoff, chrono::Duration::hours(1));
    }

    #[test]
    fn oversized_retention_is_configuration_error() {
        let err = retention_cutoff(Utc::now(), Duration::MAX).unwrap_err();
        assert!(err.is_configuration());
    }
}
