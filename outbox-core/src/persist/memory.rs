//! 内存版事件存储（MemoryDataStore）
//!
//! 模拟关系型存储的行锁与事务可见性：
//! - `get_event` 等待最旧待投递行的行锁（与 `FOR UPDATE` 一样阻塞）；拿到锁后
//!   若该行已被其他事务投递，则继续尝试下一条待投递行；
//! - 事务内的写入暂存，仅在 `commit` 时一次性生效；
//! - 事务被丢弃（未提交）等同回滚并释放行锁，可用于模拟进程崩溃。
//!
use super::{DataStore, StoreTx, retention_cutoff};
use crate::clock::{Clock, SystemClock};
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventId, EventRecord, IdGenerator, NewEvent, SnowflakeGenerator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

struct Row {
    record: EventRecord,
    lock: Arc<RowLock<()>>,
}

impl Row {
    fn new(record: EventRecord) -> Self {
        Self {
            record,
            lock: Arc::new(RowLock::new(())),
        }
    }
}

type Table = Arc<Mutex<BTreeMap<EventId, Row>>>;

fn lock_table(table: &Table) -> MutexGuard<'_, BTreeMap<EventId, Row>> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

/// 进程内事件存储，克隆共享同一张表
#[derive(Clone)]
pub struct MemoryDataStore {
    table: Table,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl MemoryDataStore {
    /// 使用给定时钟；ID 由机器号为 0 的雪花生成器分配
    pub fn new<C>(clock: C) -> Self
    where
        C: Clock + Clone + 'static,
    {
        Self {
            table: Arc::default(),
            ids: Arc::new(SnowflakeGenerator::single_node(clock.clone())),
            clock: Arc::new(clock),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// 当前已提交的全部记录（按 ID 升序）
    pub fn records(&self) -> Vec<EventRecord> {
        lock_table(&self.table)
            .values()
            .map(|row| row.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_table(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 在已提交状态与事务自身暂存写入的视图中，找到 `after` 之后的首条待投递行
    fn next_pending(
        &self,
        tx: &MemoryTx,
        after: Option<EventId>,
    ) -> Option<(EventId, Arc<RowLock<()>>)> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        lock_table(&self.table)
            .range((lower, Bound::Unbounded))
            .find(|(id, row)| !row.record.is_dispatched() && !tx.has_staged_dispatch(**id))
            .map(|(id, row)| (*id, row.lock.clone()))
    }

    fn is_pending(&self, id: EventId) -> bool {
        lock_table(&self.table)
            .get(&id)
            .is_some_and(|row| !row.record.is_dispatched())
    }

    fn read(&self, id: EventId) -> Option<EventRecord> {
        lock_table(&self.table).get(&id).map(|row| row.record.clone())
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

/// 内存事务：持有已认领行的锁与暂存写入
pub struct MemoryTx {
    table: Table,
    locks: Vec<(EventId, OwnedMutexGuard<()>)>,
    inserts: Vec<EventRecord>,
    dispatches: Vec<(EventId, DateTime<Utc>)>,
}

impl MemoryTx {
    fn holds(&self, id: EventId) -> bool {
        self.locks.iter().any(|(locked, _)| *locked == id)
    }

    fn release(&mut self, id: EventId) {
        self.locks.retain(|(locked, _)| *locked != id);
    }

    fn has_staged_dispatch(&self, id: EventId) -> bool {
        self.dispatches.iter().any(|(staged, _)| *staged == id)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self) -> Result<()> {
        let mut table = lock_table(&self.table);

        for (id, _) in &self.dispatches {
            match table.get(id) {
                Some(row) if !row.record.is_dispatched() => {}
                _ => {
                    return Err(OutboxError::storage(format!(
                        "event {id} is no longer pending"
                    )));
                }
            }
        }

        for record in self.inserts {
            table.insert(record.id(), Row::new(record));
        }
        for (id, at) in self.dispatches {
            if let Some(row) = table.get_mut(&id) {
                row.record.mark_dispatched(at);
            }
        }

        // 行锁随 self.locks 一并释放
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    type Tx = MemoryTx;

    async fn add(&self, event: NewEvent) -> Result<EventId> {
        let id = self.ids.next_id()?;
        let mut table = lock_table(&self.table);
        if table.contains_key(&id) {
            return Err(OutboxError::storage(format!("duplicate event id {id}")));
        }
        table.insert(id, Row::new(event.into_record(id)));
        Ok(id)
    }

    async fn add_in(&self, tx: &mut Self::Tx, event: NewEvent) -> Result<EventId> {
        let id = self.ids.next_id()?;
        tx.inserts.push(event.into_record(id));
        Ok(id)
    }

    async fn get_tx(&self) -> Result<Self::Tx> {
        Ok(MemoryTx {
            table: self.table.clone(),
            locks: Vec::new(),
            inserts: Vec::new(),
            dispatches: Vec::new(),
        })
    }

    async fn get_event(&self, tx: &mut Self::Tx) -> Result<Option<EventRecord>> {
        let mut after = None;

        while let Some((id, row_lock)) = self.next_pending(tx, after) {
            let acquired = !tx.holds(id);
            if acquired {
                let guard = row_lock.lock_owned().await;
                tx.locks.push((id, guard));
            }

            if self.is_pending(id) {
                return Ok(self.read(id));
            }

            // 等锁期间被其他事务投递，跳到下一条
            debug!(event_id = %id, "row changed while waiting for lock");
            if acquired {
                tx.release(id);
            }
            after = Some(id);
        }

        Ok(None)
    }

    async fn set_as_dispatched(&self, tx: &mut Self::Tx, id: EventId) -> Result<()> {
        if !tx.holds(id) {
            return Err(OutboxError::storage(format!(
                "event {id} is not locked by this transaction"
            )));
        }
        if !self.is_pending(id) || tx.has_staged_dispatch(id) {
            return Err(OutboxError::storage(format!("event {id} is not pending")));
        }

        tx.dispatches.push((id, self.clock.now()));
        Ok(())
    }

    async fn remove(&self, retention: Duration, batch_size: usize) -> Result<u64> {
        let cutoff = retention_cutoff(self.clock.now(), retention)?;
        let mut table = lock_table(&self.table);

        // 与 SKIP LOCKED 一致：跳过正被事务持有的行
        let expired: Vec<EventId> = table
            .iter()
            .filter(|(_, row)| row.record.is_expired(cutoff) && row.lock.try_lock().is_ok())
            .map(|(id, _)| *id)
            .take(batch_size)
            .collect();

        for id in &expired {
            table.remove(id);
        }

        Ok(expired.len() as u64)
    }

    async fn get(&self, id: EventId) -> Result<Option<EventRecord>> {
        Ok(self.read(id))
    }
}
