//! 事件记录（Event Record）
//!
//! 定义 Outbox 中持久化的最小工作单元：
//! - `EventId`：雪花算法生成的时间有序 64 位标识；
//! - `IdGenerator` / `SnowflakeGenerator`：多实例无协调的 ID 生成；
//! - `EventRecord`：存储层读出的完整记录（含投递状态）；
//! - `NewEvent`：生产方待入队的事件（载荷、路由选项与头信息）。
//!
//! 载荷对存储层不透明，`options` 只由通道（`EventStream`）解释，
//! `headers` 作为传输元数据随记录持久化。

mod event_id;
mod event_record;
mod id_generator;

pub use event_id::EventId;
pub use event_record::{EventRecord, NewEvent, Options};
pub use id_generator::{IdGenerator, SnowflakeGenerator};
