//! 事务性发件箱（outbox-core）
//!
//! 业务变更与待发布事件写入同一个数据库，由后台调度器按 ID 顺序搬运到外部
//! 发布/订阅通道，保证事件“至少投递一次”：
//! - 事件记录（`event`）：雪花 ID、载荷、路由选项与头信息；
//! - 存储（`persist`）：`DataStore` 协议，内存实现与 Postgres 实现（`postgres` 特性）；
//! - 调度（`eventing`）：`EventStream` 协议、`Outbox` 入队与调度/清理循环；
//! - 配置（`config`）与时钟（`clock`）。
//!
//! 典型用法：
//! 1. 选择 `DataStore` 与 `EventStream` 实现，构造 `Outbox`；
//! 2. 调用 `Outbox::start` 启动后台任务，消费 `OutboxHandle` 上报的错误与投递结果；
//! 3. 业务侧调用 `enqueue`（或 `enqueue_in` 与业务写入同事务）；
//! 4. 退出时调用 `OutboxHandle::stop`。
//!
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod eventing;
pub mod persist;
