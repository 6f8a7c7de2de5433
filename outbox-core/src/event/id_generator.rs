//! ID 生成器（IdGenerator）
//!
//! 雪花算法：时间戳 + 机器号 + 序列号，多个服务实例各自持有不同机器号即可
//! 无协调地生成全局唯一、近似按时间排序的 ID。
//!
use super::event_id::{EPOCH_MS, EventId, MAX_MACHINE_ID, MAX_SEQUENCE, MAX_TIMESTAMP};
use crate::clock::Clock;
use crate::error::{OutboxError, OutboxResult as Result};
use std::sync::{Arc, Mutex};

/// 分布式 ID 生成器
pub trait IdGenerator: Send + Sync {
    /// 时间戳位耗尽（纪元结束）后返回存储错误
    fn next_id(&self) -> Result<EventId>;
}

impl<T> IdGenerator for Arc<T>
where
    T: IdGenerator + ?Sized,
{
    fn next_id(&self) -> Result<EventId> {
        (**self).next_id()
    }
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_timestamp: u64,
    sequence: u64,
}

/// 雪花 ID 生成器
///
/// 同一生成器产生的 ID 严格递增：时钟停滞或回拨时沿用上次时间戳继续累加序列号，
/// 序列号用尽时借用下一毫秒；时间戳已到 41 位上限时不再借用，直接报错。
pub struct SnowflakeGenerator<C> {
    machine_id: u16,
    clock: C,
    state: Mutex<SnowflakeState>,
}

impl<C: Clock> SnowflakeGenerator<C> {
    /// `machine_id` 取值范围 0..=1023
    pub fn new(machine_id: u16, clock: C) -> Result<Self> {
        if machine_id > MAX_MACHINE_ID {
            return Err(OutboxError::configuration(format!(
                "machine id {machine_id} exceeds {MAX_MACHINE_ID}"
            )));
        }

        Ok(Self {
            machine_id,
            clock,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    /// 单实例部署：机器号固定为 0
    pub(crate) fn single_node(clock: C) -> Self {
        Self {
            machine_id: 0,
            clock,
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    pub fn machine_id(&self) -> u16 {
        self.machine_id
    }

    fn current_timestamp(&self) -> u64 {
        let elapsed = self.clock.now().timestamp_millis() - EPOCH_MS;
        (elapsed.max(0) as u64).min(MAX_TIMESTAMP)
    }
}

impl<C: Clock> IdGenerator for SnowflakeGenerator<C> {
    fn next_id(&self) -> Result<EventId> {
        let now = self.current_timestamp();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now > state.last_timestamp {
            state.last_timestamp = now;
            state.sequence = 0;
        } else if state.sequence < MAX_SEQUENCE {
            state.sequence += 1;
        } else if state.last_timestamp < MAX_TIMESTAMP {
            state.last_timestamp += 1;
            state.sequence = 0;
        } else {
            return Err(OutboxError::storage(format!(
                "snowflake id space exhausted for machine {}",
                self.machine_id
            )));
        }

        Ok(EventId::from_parts(
            state.last_timestamp,
            self.machine_id,
            state.sequence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashSet;

    fn fixed_clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn rejects_out_of_range_machine_id() {
        let err = SnowflakeGenerator::new(1024, SystemClock).err().unwrap();
        assert!(err.is_configuration());
        assert!(SnowflakeGenerator::new(1023, SystemClock).is_ok());
    }

    #[test]
    fn embeds_machine_id_and_timestamp() {
        let clock = fixed_clock();
        let ids = SnowflakeGenerator::new(7, clock.clone()).unwrap();

        let id = ids.next_id().unwrap();

        assert_eq!(id.machine_id(), 7);
        assert_eq!(id.unix_timestamp_ms(), clock.now().timestamp_millis());
        assert_eq!(id.sequence(), 0);
    }

    #[test]
    fn same_millisecond_increments_sequence() {
        let ids = SnowflakeGenerator::new(1, fixed_clock()).unwrap();

        let a = ids.next_id().unwrap();
        let b = ids.next_id().unwrap();

        assert_eq!(a.timestamp_ms(), b.timestamp_ms());
        assert_eq!(b.sequence(), a.sequence() + 1);
        assert!(b > a);
    }

    #[test]
    fn stays_monotonic_when_clock_moves_backwards() {
        let clock = fixed_clock();
        let ids = SnowflakeGenerator::new(1, clock.clone()).unwrap();

        let before = ids.next_id().unwrap();
        clock.advance(Duration::seconds(-5));
        let after = ids.next_id().unwrap();

        assert!(after > before);
    }

    #[test]
    fn sequence_overflow_borrows_next_millisecond() {
        let ids = SnowflakeGenerator::new(1, fixed_clock()).unwrap();

        let first = ids.next_id().unwrap();
        let mut last = first;
        for _ in 0..=MAX_SEQUENCE {
            let next = ids.next_id().unwrap();
            assert!(next > last);
            last = next;
        }

        assert_eq!(last.timestamp_ms(), first.timestamp_ms() + 1);
        assert_eq!(last.sequence(), 0);
    }

    #[test]
    fn end_of_epoch_fails_instead_of_wrapping() {
        let last_ms = DateTime::from_timestamp_millis(EPOCH_MS + MAX_TIMESTAMP as i64).unwrap();
        let ids = SnowflakeGenerator::new(2, ManualClock::new(last_ms)).unwrap();

        let mut last = ids.next_id().unwrap();
        assert_eq!(last.timestamp_ms(), MAX_TIMESTAMP);
        for _ in 0..MAX_SEQUENCE {
            let next = ids.next_id().unwrap();
            assert!(next > last);
            last = next;
        }

        let err = ids.next_id().unwrap_err();
        assert!(err.is_storage());
        assert!(ids.next_id().is_err());
    }

    #[test]
    fn concurrent_generation_is_unique() {
        let ids = Arc::new(SnowflakeGenerator::new(3, SystemClock).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..2_000).map(|_| ids.next_id().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
