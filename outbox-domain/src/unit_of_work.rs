//! 工作单元（UnitOfWork）与瞬时故障重试
//!
//! 事务边界协议：实体变更与事件日志写入必须落在同一边界内，
//! 边界内任何失败都要在控制流离开前触发回滚（由应用层编排保证）。
//!
//! `RetryPolicy` 面向瞬时基础设施故障（连接抖动、锁超时），按指数退避
//! 有界重试；业务失败立即传播，重试耗尽后向调用方呈现原始错误。
//!
use crate::error::OutboxResult;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 有作用域的事务边界
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin_transaction(&self) -> OutboxResult<()>;

    async fn commit_transaction(&self) -> OutboxResult<()>;

    async fn rollback_transaction(&self) -> OutboxResult<()>;
}

/// 瞬时故障的有界重试策略
///
/// 退避间隔为 `base_delay * 2^(n-1)`，上限 `max_delay`。
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// 运行 `op`：仅当错误被归类为瞬时故障且尝试次数未耗尽时重试
    pub async fn run<T, F, Fut>(&self, op: F) -> OutboxResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = OutboxResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient fault, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutboxError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OutboxError::Transient {
                        reason: "connection reset".to_string(),
                    })
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_original_error_on_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: OutboxResult<()> = policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OutboxError::Transient {
                    reason: "lock timeout".to_string(),
                })
            })
            .await;

        match result.unwrap_err() {
            OutboxError::Transient { reason } => assert_eq!(reason, "lock timeout"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: OutboxResult<()> = policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OutboxError::InvalidState {
                    reason: "duplicate entity".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(8), Duration::from_millis(350));
    }
}
