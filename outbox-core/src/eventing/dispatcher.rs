//! 调度循环（dispatcher）
//!
//! 空闲时等待 tick、入队触发或取消；被唤醒后进入一轮排空：
//! 每条记录在独立事务内“认领 → 标记已投递 → 发布 → 提交”，成功后立即处理下一条，
//! 队列为空时提交空事务并回到空闲；标记或发布失败则回滚、上报并结束本轮。
//!
//! 取消只在记录之间与空闲时检查，进行中的事务总会提交或回滚。
//! 标记与发布受 `dispatch_timeout` 限制，挂起的下游按发布失败处理，停止不会被无限期阻塞。
//!
use super::engine::Outbox;
use super::report::{Delivered, Reporter};
use super::EventStream;
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventId, EventRecord};
use crate::persist::{DataStore, StoreTx};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

impl<S, E> Outbox<S, E>
where
    S: DataStore,
    E: EventStream + ?Sized + 'static,
{
    pub(crate) async fn dispatch_loop(self, reporter: Reporter) {
        let mut ticker = time::interval(self.config.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = reporter.token().cancelled() => break,
                _ = self.trigger.notified() => {}
                _ = ticker.tick() => {}
            }

            self.drain_burst(&reporter).await;
        }

        debug!("dispatch loop stopped");
    }

    /// 一轮排空：直到队列为空、出错或被取消
    async fn drain_burst(&self, reporter: &Reporter) {
        while !reporter.token().is_cancelled() {
            match self.dispatch_next().await {
                Ok(Some(id)) => reporter.delivered(Delivered { id }).await,
                Ok(None) => break,
                Err(err) => {
                    reporter.error(err).await;
                    break;
                }
            }
        }
    }

    /// 在后台循环之外执行一轮排空，返回本轮投递的 ID
    ///
    /// 遇到错误时立即返回该错误，此前已提交的投递不受影响。
    pub async fn drain_once(&self) -> Result<Vec<EventId>> {
        let mut delivered = Vec::new();
        while let Some(id) = self.dispatch_next().await? {
            delivered.push(id);
        }
        Ok(delivered)
    }

    /// 投递一条记录；`None` 表示队列为空
    pub(crate) async fn dispatch_next(&self) -> Result<Option<EventId>> {
        let mut tx = self.store.get_tx().await?;

        let Some(record) = self.store.get_event(&mut tx).await? else {
            tx.commit().await?;
            return Ok(None);
        };
        let id = record.id();

        let limit = self.config.dispatch_timeout;
        let sent = time::timeout(limit, self.claim_and_send(&mut tx, &record))
            .await
            .unwrap_or_else(|_| {
                Err(OutboxError::publish(format!(
                    "event {id} not dispatched within {limit:?}"
                )))
            });

        if let Err(err) = sent {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(event_id = %id, error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }

        // 发布已成功但提交失败：记录保持待投递，下一轮会重复发布
        tx.commit().await?;
        debug!(event_id = %id, "event dispatched");

        Ok(Some(id))
    }

    async fn claim_and_send(&self, tx: &mut S::Tx, record: &EventRecord) -> Result<()> {
        self.store.set_as_dispatched(tx, record.id()).await?;
        self.stream.send(record).await
    }
}
