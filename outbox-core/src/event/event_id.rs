use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) const SEQUENCE_BITS: u32 = 12;
pub(crate) const MACHINE_BITS: u32 = 10;
pub(crate) const TIMESTAMP_BITS: u32 = 41;

pub(crate) const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
pub(crate) const MAX_MACHINE_ID: u16 = (1 << MACHINE_BITS) - 1;
pub(crate) const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

pub(crate) const MACHINE_SHIFT: u32 = SEQUENCE_BITS;
pub(crate) const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_BITS;

/// 自定义纪元：2020-01-01T00:00:00Z（毫秒）
pub(crate) const EPOCH_MS: i64 = 1_577_836_800_000;

/// 事件标识
///
/// 布局（高位到低位）：41 位毫秒时间戳（相对自定义纪元）| 10 位机器号 | 12 位序列号。
/// 最高位恒为 0，因此可无损存入有符号 BIGINT。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub(crate) fn from_parts(timestamp_ms: u64, machine_id: u16, sequence: u64) -> Self {
        Self(
            (timestamp_ms & MAX_TIMESTAMP) << TIMESTAMP_SHIFT
                | u64::from(machine_id & MAX_MACHINE_ID) << MACHINE_SHIFT
                | (sequence & MAX_SEQUENCE),
        )
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 相对自定义纪元的毫秒数
    pub fn timestamp_ms(&self) -> u64 {
        self.0 >> TIMESTAMP_SHIFT
    }

    /// 生成时的 Unix 毫秒时间戳
    pub fn unix_timestamp_ms(&self) -> i64 {
        // timestamp 最多 41 位，转换不会溢出
        self.timestamp_ms() as i64 + EPOCH_MS
    }

    pub fn machine_id(&self) -> u16 {
        ((self.0 >> MACHINE_SHIFT) & u64::from(MAX_MACHINE_ID)) as u16
    }

    pub fn sequence(&self) -> u64 {
        self.0 & MAX_SEQUENCE
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EventId> for u64 {
    fn from(id: EventId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_round_trip_through_layout() {
        let id = EventId::from_parts(123_456, 42, 7);

        assert_eq!(id.timestamp_ms(), 123_456);
        assert_eq!(id.machine_id(), 42);
        assert_eq!(id.sequence(), 7);
        assert_eq!(id.unix_timestamp_ms(), EPOCH_MS + 123_456);
    }

    #[test]
    fn ids_fit_in_signed_bigint() {
        let id = EventId::from_parts(MAX_TIMESTAMP, MAX_MACHINE_ID, MAX_SEQUENCE);
        assert!(i64::try_from(id.value()).is_ok());
    }

    #[test]
    fn later_timestamp_orders_after_any_sequence() {
        let a = EventId::from_parts(10, MAX_MACHINE_ID, MAX_SEQUENCE);
        let b = EventId::from_parts(11, 0, 0);
        assert!(a < b);
    }
}
