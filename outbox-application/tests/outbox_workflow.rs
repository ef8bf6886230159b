use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_application::{EventService, InMemoryEntityStore, InMemoryUnitOfWork};
use outbox_domain::entity::Entity;
use outbox_domain::error::{OutboxError, OutboxResult};
use outbox_domain::event_log::{EventLogStore, EventState, InMemoryEventLogStore};
use outbox_domain::eventing::{EventBus, Publisher, PublisherConfig};
use outbox_domain::integration_event::{IntegrationEvent, IntegrationEventType};
use outbox_domain::registry::EventTypeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

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
    occurred_at: DateTime<Utc>,
}

impl OrderPlaced {
    fn new(order_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
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

/// 可注入失败的总线
#[derive(Default)]
struct FlakyBus {
    published: Mutex<Vec<Uuid>>,
    fail_ids: Mutex<HashSet<Uuid>>,
}

impl FlakyBus {
    fn fail_on(&self, id: Uuid) {
        self.fail_ids.lock().unwrap().insert(id);
    }
    fn heal(&self, id: Uuid) {
        self.fail_ids.lock().unwrap().remove(&id);
    }
    fn published(&self) -> Vec<Uuid> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn is_ready(&self) -> bool {
        true
    }

    async fn publish(&self, event: &dyn IntegrationEvent) -> OutboxResult<()> {
        if self.fail_ids.lock().unwrap().contains(&event.event_id()) {
            return Err(OutboxError::Delivery {
                reason: "saw nack or return".to_string(),
            });
        }
        self.published.lock().unwrap().push(event.event_id());
        Ok(())
    }
}

struct Fixture {
    bus: Arc<FlakyBus>,
    entities: Arc<InMemoryEntityStore>,
    event_log: Arc<InMemoryEventLogStore>,
    service: Arc<EventService>,
}

fn fixture() -> Fixture {
    let bus = Arc::new(FlakyBus::default());
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

    Fixture {
        bus,
        entities,
        event_log,
        service,
    }
}

fn start_publisher(f: &Fixture) -> outbox_domain::eventing::PublisherHandle {
    Arc::new(
        Publisher::builder()
            .event_bus(f.bus.clone())
            .event_source(f.service.clone())
            .event_log(f.event_log.clone())
            .config(PublisherConfig {
                poll_delay: Duration::from_millis(20),
                broker_probe_interval: Duration::from_millis(5),
                broker_wait_timeout: Duration::from_millis(500),
                ..PublisherConfig::default()
            })
            .build(),
    )
    .start()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn add_then_publish_end_to_end() -> AnyResult<()> {
    let f = fixture();
    let order = Order { id: "o-1".into() };
    let event = OrderPlaced::new("o-1");

    f.service.add(&order, &event).await?;
    assert!(f.entities.exists("o-1"));

    // 提交后恰好出现一次在待发布批次中
    let pending = f.service.get_pending_events(10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, "o-1");

    let handle = start_publisher(&f);
    wait_until(|| f.bus.published().len() == 1).await;
    handle.shutdown();
    handle.join().await;

    assert_eq!(f.bus.published(), vec![event.id]);
    let entry = f.event_log.find_event(event.id).unwrap();
    assert_eq!(entry.state(), EventState::Published);
    assert_eq!(entry.times_sent(), 1);

    // 已发布的事件不再出现在待发布批次中
    assert!(f.service.get_pending_events(10).await?.is_empty());
    assert!(!f.event_log.failed_message_chain_exists("o-1").await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_publish_lands_in_the_entity_chain() -> AnyResult<()> {
    let f = fixture();
    let order = Order { id: "o-2".into() };
    let event = OrderPlaced::new("o-2");
    f.bus.fail_on(event.id);

    f.service.add(&order, &event).await?;

    let handle = start_publisher(&f);
    wait_until(|| {
        matches!(
            f.event_log.find_event(event.id).map(|e| e.state()),
            Some(EventState::PublishedFailed)
        )
    })
    .await;
    handle.shutdown();
    handle.join().await;

    assert!(f.event_log.failed_message_chain_exists("o-2").await?);
    let chain = f.event_log.chain("o-2").unwrap();
    assert_eq!(chain.failed_messages().len(), 1);
    let message = &chain.failed_messages()[0];
    assert_eq!(message.event_id(), Some(event.id));
    assert_eq!(message.event_type_short_name(), "OrderPlaced");
    assert!(message.message().contains("saw nack or return"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_event_is_republished_once_the_bus_recovers() -> AnyResult<()> {
    let f = fixture();
    let order = Order { id: "o-3".into() };
    let event = OrderPlaced::new("o-3");
    f.bus.fail_on(event.id);
    f.service.add(&order, &event).await?;

    let handle = start_publisher(&f);
    wait_until(|| f.event_log.chain("o-3").is_some()).await;

    // 总线恢复后，失败链批次把事件重新送达
    f.bus.heal(event.id);
    wait_until(|| f.bus.published().contains(&event.id)).await;
    handle.shutdown();
    handle.join().await;

    let chain = f.event_log.chain("o-3").unwrap();
    assert!(chain.failed_messages()[0].republished_at().is_some());
    // 日志条目保持 PublishedFailed，重发结局只记在链上
    assert_eq!(
        f.event_log.find_event(event.id).unwrap().state(),
        EventState::PublishedFailed
    );

    // 链上不再有可重试消息，后续批次为空
    assert!(f
        .service
        .retrieve_failed_events_to_republish(10)
        .await?
        .is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rolled_back_mutation_never_reaches_the_bus() -> AnyResult<()> {
    let f = fixture();
    let order = Order { id: "o-4".into() };
    let event = OrderPlaced::new("o-4");
    f.entities.fail_on("o-4");

    assert!(f.service.add(&order, &event).await.is_err());

    let handle = start_publisher(&f);
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown();
    handle.join().await;

    assert!(f.bus.published().is_empty());
    assert!(!f.entities.exists("o-4"));
    assert!(f.event_log.find_event(event.id).is_none());
    Ok(())
}
