//! Redis 通道（RedisEventStream）
//!
//! 以 `PUBLISH <channel> <payload>` 发布事件，收到服务端应答即视为确认。
//! 可选要求至少一个订阅者收到消息，否则返回发布错误并回滚。
//!
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::EventRecord;
use crate::eventing::{EventStream, resolve_channel};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

#[derive(Clone)]
pub struct RedisEventStream {
    conn: ConnectionManager,
    require_subscribers: bool,
}

impl RedisEventStream {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            require_subscribers: false,
        }
    }

    /// 连接 Redis（自动重连的连接管理器）
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| OutboxError::configuration(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    /// 为 true 时，`PUBLISH` 返回 0 个接收者视为发布失败
    pub fn require_subscribers(mut self, require: bool) -> Self {
        self.require_subscribers = require;
        self
    }
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn send(&self, record: &EventRecord) -> Result<()> {
        let channel = resolve_channel(record.options())?;
        let mut conn = self.conn.clone();

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(record.payload())
            .query_async(&mut conn)
            .await?;

        if self.require_subscribers && receivers == 0 {
            return Err(OutboxError::publish(format!(
                "no subscriber received event {} on channel {channel}",
                record.id()
            )));
        }

        debug!(event_id = %record.id(), channel, receivers, "published to redis");
        Ok(())
    }
}
