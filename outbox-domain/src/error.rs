//! 领域层统一错误定义
//!
//! 聚焦事件日志状态机、投递、序列化与事务等最小必要集合，
//! 便于在各实现层统一转换为 `OutboxError`。
//!
use crate::event_log::EventState;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OutboxError {
    // --- 序列化/类型解析 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("unknown event type: {type_name}")]
    UnknownEventType { type_name: String },
    #[error("event deserialization failed: type={type_name}, reason={reason}")]
    Deserialization { type_name: String, reason: String },

    // --- 事件日志状态机 ---
    #[error("stale state transition: event={event_id}, expected={expected:?}, actual={actual:?}")]
    StaleStateTransition {
        event_id: Uuid,
        expected: EventState,
        actual: EventState,
    },
    #[error("event log entry not found: {event_id}")]
    EventNotFound { event_id: Uuid },

    // --- 投递 ---
    #[error("delivery failed: {reason}")]
    Delivery { reason: String },
    #[error("broker not ready after {waited:?}")]
    BrokerUnavailable { waited: Duration },

    // --- 事务/存储 ---
    #[error("transaction error: {reason}")]
    Transaction { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("transient infrastructure fault: {reason}")]
    Transient { reason: String },

    // --- 通用 ---
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
}

impl OutboxError {
    /// 是否为可重试的瞬时基础设施故障（连接抖动、锁超时等）；
    /// 业务失败不在此列，须立即向调用方传播
    pub fn is_transient(&self) -> bool {
        matches!(self, OutboxError::Transient { .. })
    }
}

/// 统一 Result 类型别名
pub type OutboxResult<T> = Result<T, OutboxError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx 等错误转换为 OutboxError

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OutboxError::NotFound {
                reason: "row not found".to_string(),
            },
            sqlx::Error::Io(e) => OutboxError::Transient {
                reason: e.to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => OutboxError::Transient {
                reason: err.to_string(),
            },
            other => OutboxError::Database {
                reason: other.to_string(),
            },
        }
    }
}
