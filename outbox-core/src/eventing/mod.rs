//! 事件调度（eventing）
//!
//! 将 Outbox 中的待投递记录搬运到外部发布/订阅通道：
//! - `EventStream`：通道协议，同步返回发布结果；
//! - `InMemoryEventStream` / `RedisEventStream`（`redis` 特性）：通道实现；
//! - `Outbox`：入队与编排入口，持有存储、通道、配置与触发器；
//! - 调度循环（dispatcher）：按 ID 升序“认领 → 标记 → 发布 → 提交”；
//! - 清理循环（janitor）：周期删除超过保留时长的已投递记录；
//! - `OutboxHandle`：错误/投递上报流与优雅关闭。
//!
//! 投递语义为至少一次：发布发生在提交之前，崩溃窗口内可能重复，但不会丢失。
//!
mod dispatcher;
mod engine;
mod event_stream;
mod janitor;
mod report;
mod stream_inmemory;
#[cfg(feature = "redis")]
mod stream_redis;

pub use engine::{Outbox, OutboxHandle};
pub use event_stream::{CHANNEL_OPTION, EventStream, resolve_channel};
pub use report::Delivered;
pub use stream_inmemory::{InMemoryEventStream, PublishedEvent};
#[cfg(feature = "redis")]
pub use stream_redis::RedisEventStream;
