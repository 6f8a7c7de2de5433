//! Outbox 统一错误定义
//!
//! 按失败来源划分为存储、发布、配置三类，另附序列化错误，
//! 便于调度循环统一上报而不中断后台任务。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OutboxError {
    // --- 存储 ---
    /// 认领/更新/删除等存储操作失败，下一次 tick/触发时自动重试
    #[error("storage error: {reason}")]
    Storage { reason: String },

    // --- 通道 ---
    /// 通道拒绝或投递失败，外层事务回滚，事件保持待投递
    #[error("publish error: {reason}")]
    Publish { reason: String },

    // --- 配置 ---
    /// 路由信息无法解析或配置非法
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

impl OutboxError {
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    pub fn publish(reason: impl Into<String>) -> Self {
        Self::Publish {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// 统一 Result 类型别名
pub type OutboxResult<T> = Result<T, OutboxError>;

// ---- 基础设施错误转换 ----
// 允许在存储/通道实现中直接使用 `?`

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        OutboxError::Storage {
            reason: err.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for OutboxError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OutboxError::Storage {
            reason: err.to_string(),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for OutboxError {
    fn from(err: redis::RedisError) -> Self {
        OutboxError::Publish {
            reason: err.to_string(),
        }
    }
}
