//! 内存版通道（InMemoryEventStream）
//!
//! 基于 `tokio::sync::broadcast` 的轻量通道实现，满足 `EventStream` 协议：
//! - `send`：解析目标通道后广播事件；
//! - `subscribe`：按通道名过滤，返回 `'static` 生命周期事件流；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：默认情况下无订阅者时广播会被丢弃，发布仍视为成功（与 Redis `PUBLISH` 一致）；
//! 需要把“无人接收”当作失败时使用 `require_subscribers(true)`。

use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventId, EventRecord, Options};
use crate::eventing::{EventStream, resolve_channel};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// 广播到通道上的一条消息
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub channel: String,
    pub id: EventId,
    pub payload: Vec<u8>,
    pub headers: Options,
}

/// 简单的内存通道实现
#[derive(Clone)]
pub struct InMemoryEventStream {
    tx: broadcast::Sender<PublishedEvent>,
    require_subscribers: bool,
}

impl InMemoryEventStream {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            require_subscribers: false,
        }
    }

    /// 为 true 时，没有任何订阅者的发布视为失败，记录保持待投递
    pub fn require_subscribers(mut self, require: bool) -> Self {
        self.require_subscribers = require;
        self
    }

    /// 订阅指定通道
    pub fn subscribe(
        &self,
        channel: impl Into<String>,
    ) -> BoxStream<'static, Result<PublishedEvent>> {
        let channel = channel.into();
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |r| {
            future::ready(match r {
                Ok(ev) if ev.channel == channel => Some(Ok(ev)),
                Ok(_) => None,
                Err(e) => Some(Err(OutboxError::publish(e.to_string()))),
            })
        });
        Box::pin(stream)
    }
}

#[async_trait]
impl EventStream for InMemoryEventStream {
    async fn send(&self, record: &EventRecord) -> Result<()> {
        let channel = resolve_channel(record.options())?;

        // 无订阅者时 broadcast 的 send 返回错误
        let receivers = self
            .tx
            .send(PublishedEvent {
                channel: channel.to_string(),
                id: record.id(),
                payload: record.payload().to_vec(),
                headers: record.headers().clone(),
            })
            .unwrap_or(0);

        if self.require_subscribers && receivers == 0 {
            return Err(OutboxError::publish(format!(
                "no subscriber received event {} on channel {channel}",
                record.id()
            )));
        }
        trace!(event_id = %record.id(), channel, receivers, "published in memory");

        Ok(())
    }
}
