//! PostgreSQL 事件存储（PgDataStore）
//!
//! `get_event` 使用 `ORDER BY id LIMIT 1 FOR UPDATE` 认领最旧的待投递行，
//! 并发调度的实例在行锁上排队；清理使用 `FOR UPDATE SKIP LOCKED`，
//! 不会与调度事务互相阻塞。
//!
use super::{DataStore, StoreTx, retention_cutoff};
use crate::clock::{Clock, SystemClock};
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventId, EventRecord, IdGenerator, NewEvent, Options};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 迁移脚本创建的表名
pub const OUTBOX_TABLE: &str = "outbox_events";

const INSERT_EVENT: &str = "INSERT INTO outbox_events (id, dispatched, dispatched_at, payload, options, headers) \
     VALUES ($1, FALSE, NULL, $2, $3, $4)";

const SELECT_PENDING_FOR_UPDATE: &str = "SELECT id, dispatched, dispatched_at, payload, options, headers \
     FROM outbox_events \
     WHERE dispatched = FALSE \
     ORDER BY id ASC \
     LIMIT 1 \
     FOR UPDATE";

const MARK_DISPATCHED: &str = "UPDATE outbox_events SET dispatched = TRUE, dispatched_at = $2 \
     WHERE id = $1 AND dispatched = FALSE";

const DELETE_EXPIRED: &str = "DELETE FROM outbox_events WHERE id IN ( \
         SELECT id FROM outbox_events \
         WHERE dispatched = TRUE AND dispatched_at < $1 \
         ORDER BY id ASC \
         LIMIT $2 \
         FOR UPDATE SKIP LOCKED \
     )";

const SELECT_BY_ID: &str = "SELECT id, dispatched, dispatched_at, payload, options, headers \
     FROM outbox_events WHERE id = $1";

#[derive(FromRow)]
struct OutboxRow {
    id: i64,
    dispatched: bool,
    dispatched_at: Option<DateTime<Utc>>,
    payload: Vec<u8>,
    options: Json<Options>,
    headers: Json<Options>,
}

impl TryFrom<OutboxRow> for EventRecord {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        let id = u64::try_from(row.id)
            .map_err(|_| OutboxError::storage(format!("negative event id {}", row.id)))?;

        Ok(EventRecord::builder()
            .id(EventId::new(id))
            .dispatched(row.dispatched)
            .maybe_dispatched_at(row.dispatched_at)
            .payload(row.payload)
            .options(row.options.0)
            .headers(row.headers.0)
            .build())
    }
}

fn to_db_id(id: EventId) -> Result<i64> {
    i64::try_from(id.value())
        .map_err(|_| OutboxError::storage(format!("event id {id} does not fit BIGINT")))
}

#[async_trait]
impl StoreTx for Transaction<'static, Postgres> {
    async fn commit(self) -> Result<()> {
        Transaction::commit(self).await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Transaction::rollback(self).await?;
        Ok(())
    }
}

/// 基于连接池的 PostgreSQL 实现
#[derive(Clone)]
pub struct PgDataStore {
    pool: PgPool,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    statement_timeout: Option<Duration>,
}

impl PgDataStore {
    pub fn new(pool: PgPool, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            pool,
            ids,
            clock: Arc::new(SystemClock),
            statement_timeout: None,
        }
    }

    /// 替换写入 `dispatched_at` 与计算清理截止时间所用的时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 为每个调度事务设置 `statement_timeout`，限制等锁与单条语句耗时
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行内置迁移（创建 `outbox_events` 表与索引）
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for PgDataStore {
    type Tx = Transaction<'static, Postgres>;

    async fn add(&self, event: NewEvent) -> Result<EventId> {
        let id = self.ids.next_id()?;

        sqlx::query(INSERT_EVENT)
            .bind(to_db_id(id)?)
            .bind(event.payload())
            .bind(Json(event.options()))
            .bind(Json(event.headers()))
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn add_in(&self, tx: &mut Self::Tx, event: NewEvent) -> Result<EventId> {
        let id = self.ids.next_id()?;

        sqlx::query(INSERT_EVENT)
            .bind(to_db_id(id)?)
            .bind(event.payload())
            .bind(Json(event.options()))
            .bind(Json(event.headers()))
            .execute(&mut **tx)
            .await?;

        Ok(id)
    }

    async fn get_tx(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.statement_timeout {
            // SET LOCAL 不支持参数绑定，set_config 的第三个参数等价于 LOCAL
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        Ok(tx)
    }

    async fn get_event(&self, tx: &mut Self::Tx) -> Result<Option<EventRecord>> {
        let row: Option<OutboxRow> = sqlx::query_as(SELECT_PENDING_FOR_UPDATE)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(EventRecord::try_from).transpose()
    }

    async fn set_as_dispatched(&self, tx: &mut Self::Tx, id: EventId) -> Result<()> {
        let result = sqlx::query(MARK_DISPATCHED)
            .bind(to_db_id(id)?)
            .bind(self.clock.now())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::storage(format!("event {id} is not pending")));
        }
        Ok(())
    }

    async fn remove(&self, retention: Duration, batch_size: usize) -> Result<u64> {
        let cutoff = retention_cutoff(self.clock.now(), retention)?;
        let limit = i64::try_from(batch_size).map_err(|_| {
            OutboxError::configuration(format!("batch size {batch_size} is out of range"))
        })?;

        let result = sqlx::query(DELETE_EXPIRED)
            .bind(cutoff)
            .bind(limit)
            .execute(&self.pool)
            .await?;

        debug!(removed = result.rows_affected(), %cutoff, "expired rows deleted");
        Ok(result.rows_affected())
    }

    async fn get(&self, id: EventId) -> Result<Option<EventRecord>> {
        let row: Option<OutboxRow> = sqlx::query_as(SELECT_BY_ID)
            .bind(to_db_id(id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(EventRecord::try_from).transpose()
    }
}
