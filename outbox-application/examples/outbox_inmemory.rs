/// 事务性 Outbox（内存版）示例
/// 展示 实体变更 + 事件记录 原子提交 -> 发布者抢占并交付总线 -> 失败入链与恢复后重发 的闭环
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_application::{EventService, InMemoryEntityStore, InMemoryUnitOfWork};
use outbox_domain::entity::Entity;
use outbox_domain::error::{OutboxError, OutboxResult};
use outbox_domain::event_log::{EventLogStore, InMemoryEventLogStore};
use outbox_domain::eventing::{EventBus, Publisher, PublisherConfig};
use outbox_domain::integration_event::{IntegrationEvent, IntegrationEventType};
use outbox_domain::registry::EventTypeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// 示例领域：订单与下单事件
// ============================================================================

struct Order {
    id: String,
}

impl Entity for Order {
    fn entity_id(&self) -> String {
        self.id.clone()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    id: Uuid,
    order_id: String,
    amount: i64,
    occurred_at: DateTime<Utc>,
}

impl OrderPlaced {
    fn new(order_id: &str, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            amount,
            occurred_at: Utc::now(),
        }
    }
}

impl IntegrationEvent for OrderPlaced {
    fn event_id(&self) -> Uuid {
        self.id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type_name(&self) -> &str {
        Self::NAME
    }
    fn entity_id(&self) -> String {
        self.order_id.clone()
    }
    fn payload(&self) -> OutboxResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl IntegrationEventType for OrderPlaced {
    const NAME: &'static str = "OrderPlaced";
}

// ============================================================================
// 会故障的总线：演示失败入链与恢复后重发
// ============================================================================

#[derive(Default)]
struct UnreliableBus {
    broken: AtomicBool,
    published: Mutex<Vec<String>>,
}

#[async_trait]
impl EventBus for UnreliableBus {
    async fn is_ready(&self) -> bool {
        true
    }

    async fn publish(&self, event: &dyn IntegrationEvent) -> OutboxResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(OutboxError::Delivery {
                reason: "broker connection lost".to_string(),
            });
        }
        println!(
            "bus <- type={} event={} entity={}",
            event.event_type_name(),
            event.event_id(),
            event.entity_id()
        );
        self.published
            .lock()
            .unwrap()
            .push(event.event_id().to_string());
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    println!("=== 事务性 Outbox（内存版）示例 ===\n");

    // 存储、工作单元与注册表
    let bus = Arc::new(UnreliableBus::default());
    let entities = Arc::new(InMemoryEntityStore::new());
    let event_log = Arc::new(InMemoryEventLogStore::new());
    let unit_of_work = Arc::new(InMemoryUnitOfWork::new(event_log.clone(), entities.clone()));

    let mut registry = EventTypeRegistry::new("shop::events");
    registry.register::<OrderPlaced>();

    let service = Arc::new(EventService::new(
        entities.clone(),
        event_log.clone(),
        unit_of_work,
        Arc::new(registry),
    ));

    // 实体变更与事件记录原子提交
    let order = Order { id: "o-1001".into() };
    service.add(&order, &OrderPlaced::new("o-1001", 4200)).await?;
    println!("✅ 订单 o-1001 与 OrderPlaced 已原子落库");

    // 第二单在总线故障期间发布，进入失败链
    bus.broken.store(true, Ordering::SeqCst);
    let order2 = Order { id: "o-1002".into() };
    let second = OrderPlaced::new("o-1002", 990);
    service.add(&order2, &second).await?;

    let publisher = Arc::new(
        Publisher::builder()
            .event_bus(bus.clone())
            .event_source(service.clone())
            .event_log(event_log.clone())
            .config(PublisherConfig {
                poll_delay: Duration::from_millis(100),
                ..PublisherConfig::default()
            })
            .build(),
    );
    let handle = publisher.start();
    println!("✅ 发布者已启动");

    tokio::time::sleep(Duration::from_millis(400)).await;
    if event_log.failed_message_chain_exists("o-1002").await? {
        println!("✅ o-1002 的投递失败已记入失败链");
    }

    // 总线恢复，失败链批次把事件重新送达
    bus.broken.store(false, Ordering::SeqCst);
    println!("✅ 总线恢复，等待重发…");
    tokio::time::sleep(Duration::from_millis(400)).await;

    handle.shutdown();
    handle.join().await;

    let published = bus.published.lock().unwrap().clone();
    println!("\n共交付 {} 条事件: {:?}", published.len(), published);
    println!("✅ 优雅关闭完成");
    Ok(())
}
