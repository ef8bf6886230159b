//! 待派发事件（OutboundEvent）与事件来源协议
//!
//! 发布者的工作单元：一条来自 Outbox 或失败链的事件，连同按条目归属的
//! 类型解析结果。解析失败是数据而非批次级异常：带着错误进入派发环节，
//! 由发布者按来源作隔离处置，不会中断同批其余事件。
//!
use crate::error::OutboxResult;
use crate::integration_event::IntegrationEvent;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// 事件的派发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    /// Outbox 中待发布的日志条目：走 抢占 → 发布 → 定稿 的状态机
    Outbox { event_id: Uuid },
    /// 失败链中等待重发的消息：结果只记在链上，不再触碰日志状态机
    FailedChain {
        message_id: Uuid,
        event_id: Option<Uuid>,
    },
}

/// 一条待派发的事件
pub struct OutboundEvent {
    pub origin: DispatchOrigin,
    /// 产生该事件的实体标识（失败链分组键）
    pub entity_id: String,
    pub event_type_short_name: String,
    /// 序列化负载（解析失败时仍可入链留痕）
    pub body: Value,
    /// 按条目归属的类型解析结果
    pub resolution: OutboxResult<Box<dyn IntegrationEvent>>,
}

/// 发布者轮询的事件来源：普通待发布批次与失败链重发批次
#[async_trait]
pub trait OutboundEventSource: Send + Sync {
    /// 拉取至多 `batch_size` 条待发布事件（旧者优先）
    async fn fetch_pending(&self, batch_size: usize) -> OutboxResult<Vec<OutboundEvent>>;

    /// 拉取至多 `chain_batch_size` 条链的可重发事件（链内旧者优先）
    async fn fetch_republishable(
        &self,
        chain_batch_size: usize,
    ) -> OutboxResult<Vec<OutboundEvent>>;
}
