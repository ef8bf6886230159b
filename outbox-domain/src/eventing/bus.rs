//! 消息总线（EventBus）协议
//!
//! 发布者视角的最小总线抽象：就绪探测与单事件发布。
//! 任何发布错误都视为一次投递失败（触发失败定稿与失败链记录）；
//! `is_ready() == false` 表示尚未与中间件建立连接。
//!
use crate::error::OutboxResult;
use crate::integration_event::IntegrationEvent;
use async_trait::async_trait;

/// 消息总线：负责把集成事件交付给消息中间件
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 与中间件的连接是否就绪
    async fn is_ready(&self) -> bool;

    async fn publish(&self, event: &dyn IntegrationEvent) -> OutboxResult<()>;
}
