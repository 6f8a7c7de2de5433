//! 通道（EventStream）协议
//!
//! 将一条事件记录发布到外部通道。调度器会阻塞等待结果，
//! 失败必须返回错误以便外层事务回滚，不允许静默丢弃。
//!
use crate::error::{OutboxError, OutboxResult as Result};
use crate::event::{EventRecord, Options};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// `options` 中指定目标通道名称的键
pub const CHANNEL_OPTION: &str = "channel";

#[async_trait]
pub trait EventStream: Send + Sync {
    async fn send(&self, record: &EventRecord) -> Result<()>;
}

#[async_trait]
impl<T> EventStream for Arc<T>
where
    T: EventStream + ?Sized,
{
    async fn send(&self, record: &EventRecord) -> Result<()> {
        (**self).send(record).await
    }
}

/// 从路由选项中解析目标通道；缺失或非法时直接失败，不回退到默认通道
pub fn resolve_channel(options: &Options) -> Result<&str> {
    match options.get(CHANNEL_OPTION) {
        Some(Value::String(channel)) if !channel.trim().is_empty() => Ok(channel.as_str()),
        Some(other) => Err(OutboxError::configuration(format!(
            "option `{CHANNEL_OPTION}` must be a non-empty string, got {other}"
        ))),
        None => Err(OutboxError::configuration(format!(
            "missing `{CHANNEL_OPTION}` option"
        ))),
    }
}
