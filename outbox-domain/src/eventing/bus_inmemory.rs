//! 内存版消息总线（InMemoryEventBus）
//!
//! 基于 `tokio::sync::broadcast` 实现的轻量总线，满足 `EventBus` 协议：
//! - `publish`：把事件压成可克隆的记录后广播；
//! - `subscribe`：返回接收端，便于测试与示例观察投递结果；
//! - 就绪标志可在运行中切换，用于演练“等待中间件连接”的场景。
//!
//! 注意：无订阅者时发送将被忽略，属“至少一次”语义下的非致命情况。
//!
use crate::error::OutboxResult;
use crate::eventing::EventBus;
use crate::integration_event::IntegrationEvent;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// 总线收到的事件记录（可克隆的观察形态）
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub event_id: Uuid,
    pub event_type_name: String,
    pub payload: Value,
}

/// 简单的内存总线实现
pub struct InMemoryEventBus {
    ready: AtomicBool,
    tx: broadcast::Sender<PublishedRecord>,
}

impl InMemoryEventBus {
    /// 创建一个内存总线，`capacity` 为广播缓冲区容量；初始即就绪
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            ready: AtomicBool::new(true),
            tx,
        }
    }

    /// 切换就绪标志
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// 订阅发布记录流
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedRecord> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn publish(&self, event: &dyn IntegrationEvent) -> OutboxResult<()> {
        let record = PublishedRecord {
            event_id: event.event_id(),
            event_type_name: event.event_type_name().to_string(),
            payload: event.payload()?,
        };
        // 若当前无订阅者，broadcast 的 send 会返回错误，这里视为非致命并忽略
        let _ = self.tx.send(record);
        Ok(())
    }
}
