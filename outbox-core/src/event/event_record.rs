//! 事件记录持久化模型
//!
//! `EventRecord` 是存储层中的一行：`dispatched = false` 时对调度器可见，
//! 翻转为 `true` 的同时写入 `dispatched_at`，之后只会被清理任务删除。
//!
use super::EventId;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 路由选项 / 头信息：字符串键到任意 JSON 值的映射
pub type Options = HashMap<String, Value>;

/// 待入队的事件
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize, PartialEq)]
pub struct NewEvent {
    /// 序列化后的领域事件，存储层不解析
    #[builder(into)]
    payload: Vec<u8>,
    /// 通道路由选项（如目标 channel 名称）
    #[builder(default)]
    options: Options,
    /// 传输元数据（追踪、content-type 等）
    #[builder(default)]
    headers: Options,
}

impl NewEvent {
    pub fn new(payload: impl Into<Vec<u8>>, options: Options, headers: Options) -> Self {
        Self {
            payload: payload.into(),
            options,
            headers,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn headers(&self) -> &Options {
        &self.headers
    }

    /// 分配 ID 后转换为待投递记录
    pub fn into_record(self, id: EventId) -> EventRecord {
        EventRecord {
            id,
            dispatched: false,
            dispatched_at: None,
            payload: self.payload,
            options: self.options,
            headers: self.headers,
        }
    }
}

/// 存储中的事件记录
///
/// 只能由存储层构造（`NewEvent::into_record` 或读回数据库行），
/// 外部无法拼出 `dispatched = true` 而缺少 `dispatched_at` 的记录：
///
/// ```compile_fail
/// let _ = outbox_core::event::EventRecord::builder();
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[builder(builder_type(vis = "pub(crate)"), start_fn(vis = "pub(crate)"))]
pub struct EventRecord {
    id: EventId,
    #[builder(default)]
    dispatched: bool,
    dispatched_at: Option<DateTime<Utc>>,
    #[builder(into)]
    payload: Vec<u8>,
    #[builder(default)]
    options: Options,
    #[builder(default)]
    headers: Options,
}

impl EventRecord {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn dispatched_at(&self) -> Option<DateTime<Utc>> {
        self.dispatched_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn headers(&self) -> &Options {
        &self.headers
    }

    /// 翻转投递标记，两个字段同时写入
    pub(crate) fn mark_dispatched(&mut self, at: DateTime<Utc>) {
        self.dispatched = true;
        self.dispatched_at = Some(at);
    }

    /// 已投递且 `dispatched_at` 早于截止时间
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.dispatched && self.dispatched_at.is_some_and(|at| at < cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn new_event_becomes_pending_record() {
        let event = NewEvent::builder()
            .payload(b"evt-A")
            .options(Options::from([("channel".to_string(), json!("orders"))]))
            .build();

        let record = event.into_record(EventId::new(9));

        assert_eq!(record.id(), EventId::new(9));
        assert!(!record.is_dispatched());
        assert_eq!(record.dispatched_at(), None);
        assert_eq!(record.payload(), b"evt-A");
        assert_eq!(record.options()["channel"], json!("orders"));
        assert!(record.headers().is_empty());
    }

    #[test]
    fn mark_dispatched_sets_both_fields() {
        let mut record = NewEvent::builder()
            .payload(vec![1, 2, 3])
            .build()
            .into_record(EventId::new(1));
        let at = Utc::now();

        record.mark_dispatched(at);

        assert!(record.is_dispatched());
        assert_eq!(record.dispatched_at(), Some(at));
    }

    #[test]
    fn only_dispatched_records_past_cutoff_expire() {
        let now = Utc::now();
        let mut record = NewEvent::builder()
            .payload(vec![])
            .build()
            .into_record(EventId::new(1));

        assert!(!record.is_expired(now));

        record.mark_dispatched(now - Duration::hours(2));
        assert!(record.is_expired(now - Duration::hours(1)));
        assert!(!record.is_expired(now - Duration::hours(3)));
    }
}
