//! Outbox 配置
//!
//! 调度 tick 间隔、单条投递超时、清理间隔、保留时长与清理批量大小，
//! 以及上报通道容量。可通过 builder 构造，也可从环境变量读取。
//!
use crate::error::{OutboxError, OutboxResult as Result};
use bon::Builder;
use std::time::Duration;

pub const ENV_DRAIN_INTERVAL_MS: &str = "OUTBOX_DRAIN_INTERVAL_MS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "OUTBOX_CLEANUP_INTERVAL_SECS";
pub const ENV_CLEANUP_RETENTION_SECS: &str = "OUTBOX_CLEANUP_RETENTION_SECS";
pub const ENV_CLEANUP_BATCH_SIZE: &str = "OUTBOX_CLEANUP_BATCH_SIZE";
pub const ENV_REPORT_CAPACITY: &str = "OUTBOX_REPORT_CAPACITY";
pub const ENV_DISPATCH_TIMEOUT_MS: &str = "OUTBOX_DISPATCH_TIMEOUT_MS";

/// Outbox 运行配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Builder)]
pub struct OutboxConfig {
    /// 周期性排空的间隔（入队触发之外的兜底轮询）
    #[builder(default = Duration::from_secs(5))]
    pub drain_interval: Duration,
    /// 单条记录认领、发布到提交前的最长耗时，超时按发布失败回滚
    #[builder(default = Duration::from_secs(30))]
    pub dispatch_timeout: Duration,
    /// 清理任务的执行间隔
    #[builder(default = Duration::from_secs(60))]
    pub cleanup_interval: Duration,
    /// 已投递记录的保留时长
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    pub cleanup_retention: Duration,
    /// 单次清理最多删除的记录数
    #[builder(default = 1000)]
    pub cleanup_batch_size: usize,
    /// 错误/投递上报通道的容量
    #[builder(default = 1024)]
    pub report_capacity: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OutboxConfig {
    /// 从进程环境变量读取，缺省项使用默认值
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parse = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|e| {
                        OutboxError::configuration(format!("{key}={raw:?}: {e}"))
                    })
                })
                .transpose()
        };

        if let Some(ms) = parse(ENV_DRAIN_INTERVAL_MS)? {
            config.drain_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(ENV_DISPATCH_TIMEOUT_MS)? {
            config.dispatch_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(ENV_CLEANUP_INTERVAL_SECS)? {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(ENV_CLEANUP_RETENTION_SECS)? {
            config.cleanup_retention = Duration::from_secs(secs);
        }
        if let Some(n) = parse(ENV_CLEANUP_BATCH_SIZE)? {
            config.cleanup_batch_size = to_usize(ENV_CLEANUP_BATCH_SIZE, n)?;
        }
        if let Some(n) = parse(ENV_REPORT_CAPACITY)? {
            config.report_capacity = to_usize(ENV_REPORT_CAPACITY, n)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drain_interval.is_zero() {
            return Err(OutboxError::configuration("drain_interval must be non-zero"));
        }
        if self.dispatch_timeout.is_zero() {
            return Err(OutboxError::configuration(
                "dispatch_timeout must be non-zero",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(OutboxError::configuration(
                "cleanup_interval must be non-zero",
            ));
        }
        if self.cleanup_batch_size == 0 {
            return Err(OutboxError::configuration(
                "cleanup_batch_size must be greater than zero",
            ));
        }
        if self.report_capacity == 0 {
            return Err(OutboxError::configuration(
                "report_capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn to_usize(key: &str, value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|e| OutboxError::configuration(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = OutboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.drain_interval, Duration::from_secs(5));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(config.cleanup_batch_size, 1000);
    }

    #[test]
    fn lookup_overrides_present_keys_only() {
        let config = OutboxConfig::from_lookup(lookup_from(&[
            (ENV_DRAIN_INTERVAL_MS, "250"),
            (ENV_CLEANUP_BATCH_SIZE, " 50 "),
        ]))
        .unwrap();

        assert_eq!(config.drain_interval, Duration::from_millis(250));
        assert_eq!(config.cleanup_batch_size, 50);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }

    #[test]
    fn malformed_value_is_configuration_error() {
        let err =
            OutboxConfig::from_lookup(lookup_from(&[(ENV_CLEANUP_RETENTION_SECS, "a day")]))
                .unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains(ENV_CLEANUP_RETENTION_SECS));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = OutboxConfig::builder()
            .drain_interval(Duration::ZERO)
            .build();
        assert!(config.validate().unwrap_err().is_configuration());

        let err =
            OutboxConfig::from_lookup(lookup_from(&[(ENV_CLEANUP_BATCH_SIZE, "0")])).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn dispatch_timeout_is_read_and_must_be_non_zero() {
        let config =
            OutboxConfig::from_lookup(lookup_from(&[(ENV_DISPATCH_TIMEOUT_MS, "1500")])).unwrap();
        assert_eq!(config.dispatch_timeout, Duration::from_millis(1500));

        let err =
            OutboxConfig::from_lookup(lookup_from(&[(ENV_DISPATCH_TIMEOUT_MS, "0")])).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("dispatch_timeout"));
    }
}
