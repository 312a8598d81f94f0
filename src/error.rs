//! 协调层错误类型
//!
//! - 锁获取超时与并发冲突是可预期、可重试的结果
//! - 存储故障对当前调用是致命的，绝不能被当作“锁空闲”或“会话无效”

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = CoordinationError> = std::result::Result<T, E>;

/// 并发冲突的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// 等待窗口内未能获取锁
    Timeout,
    /// 等待过程中被取消
    Interrupted,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::Timeout => f.write_str("timeout"),
            ConflictReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("lock acquisition for key {key} timed out after {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    #[error("{message}")]
    ConcurrencyConflict {
        key: String,
        reason: ConflictReason,
        message: String,
    },

    #[error("coordination store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("malformed record at {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoordinationError {
    /// 将锁超时包装为面向调用方的并发冲突
    pub fn conflict_from_timeout(key: impl Into<String>, message: impl Into<String>) -> Self {
        CoordinationError::ConcurrencyConflict {
            key: key.into(),
            reason: ConflictReason::Timeout,
            message: message.into(),
        }
    }

    pub fn interrupted(key: impl Into<String>) -> Self {
        let key = key.into();
        let message = format!("lock acquisition for {key} was interrupted");
        CoordinationError::ConcurrencyConflict {
            key,
            reason: ConflictReason::Interrupted,
            message,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoordinationError::LockTimeout { .. } | CoordinationError::ConcurrencyConflict { .. }
        )
    }

    /// 调用方可以稍后重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinationError::LockTimeout { .. } => true,
            CoordinationError::ConcurrencyConflict { reason, .. } => {
                *reason == ConflictReason::Timeout
            }
            CoordinationError::Store(err) => {
                err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
            }
            CoordinationError::StoreUnavailable(_) => true,
            CoordinationError::Serialization { .. } | CoordinationError::Config(_) => false,
        }
    }
}
