//! 清理循环（janitor）
//!
//! 周期删除已投递且超过保留时长的记录，每次最多一个批次；
//! 积压会在后续周期逐批消化。
//!
use super::EventStream;
use super::engine::Outbox;
use crate::error::OutboxResult as Result;
use crate::persist::DataStore;
use tracing::{debug, info};

impl<S, E> Outbox<S, E>
where
    S: DataStore,
    E: EventStream + ?Sized + 'static,
{
    /// 执行一次清理，返回删除数量
    pub async fn purge(&self) -> Result<u64> {
        let removed = self
            .store
            .remove(self.config.cleanup_retention, self.config.cleanup_batch_size)
            .await?;

        if removed > 0 {
            info!(removed, "purged dispatched events");
        } else {
            debug!("nothing to purge");
        }

        Ok(removed)
    }
}
