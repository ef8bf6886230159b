//! 集成事件服务（EventService）
//!
//! 应用层编排：
//! - `add/update/remove`：实体变更与事件日志写入在同一工作单元内原子提交，
//!   任何失败先回滚再传播；原子性正是 Outbox 模式的全部意义；
//! - `get_pending_events`/`retrieve_failed_events_to_republish`：为发布者
//!   装配待发布批次与失败链重发批次，逐条经类型注册表重建事件，
//!   单条解析失败不拖垮整批；
//! - 作为 `OutboundEventSource` 注入发布者。
//!
use crate::entity_store::EntityStore;
use crate::error::AppError;
use async_trait::async_trait;
use outbox_domain::entity::Entity;
use outbox_domain::error::OutboxResult;
use outbox_domain::event_log::{EventLogEntry, EventLogStore};
use outbox_domain::eventing::{DispatchOrigin, OutboundEvent, OutboundEventSource};
use outbox_domain::integration_event::IntegrationEvent;
use outbox_domain::registry::EventTypeRegistry;
use outbox_domain::unit_of_work::{RetryPolicy, UnitOfWork};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone, Copy)]
enum Mutation {
    Insert,
    Update,
    Remove,
}

/// 实体变更与事件记录的原子编排，兼发布批次的装配
pub struct EventService {
    entity_store: Arc<dyn EntityStore>,
    event_log: Arc<dyn EventLogStore>,
    unit_of_work: Arc<dyn UnitOfWork>,
    registry: Arc<EventTypeRegistry>,
    retry: RetryPolicy,
}

impl EventService {
    pub fn new(
        entity_store: Arc<dyn EntityStore>,
        event_log: Arc<dyn EventLogStore>,
        unit_of_work: Arc<dyn UnitOfWork>,
        registry: Arc<EventTypeRegistry>,
    ) -> Self {
        Self {
            entity_store,
            event_log,
            unit_of_work,
            registry,
            retry: RetryPolicy::default(),
        }
    }

    /// 替换瞬时故障重试策略
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 新增实体并记录事件（同一事务）
    pub async fn add(
        &self,
        entity: &dyn Entity,
        event: &dyn IntegrationEvent,
    ) -> Result<(), AppError> {
        self.mutate(Mutation::Insert, entity, event).await
    }

    /// 更新实体并记录事件（同一事务）
    pub async fn update(
        &self,
        entity: &dyn Entity,
        event: &dyn IntegrationEvent,
    ) -> Result<(), AppError> {
        self.mutate(Mutation::Update, entity, event).await
    }

    /// 删除实体并记录事件（同一事务）
    pub async fn remove(
        &self,
        entity: &dyn Entity,
        event: &dyn IntegrationEvent,
    ) -> Result<(), AppError> {
        self.mutate(Mutation::Remove, entity, event).await
    }

    async fn mutate(
        &self,
        mutation: Mutation,
        entity: &dyn Entity,
        event: &dyn IntegrationEvent,
    ) -> Result<(), AppError> {
        if entity.entity_id() != event.entity_id() {
            return Err(AppError::Validation(format!(
                "event entity id `{}` does not match entity `{}`",
                event.entity_id(),
                entity.entity_id()
            )));
        }

        let entry = EventLogEntry::from_event(event, self.registry.qualifier())
            .map_err(AppError::from)?;

        self.retry
            .run(|| self.attempt(mutation, entity, &entry))
            .await?;
        Ok(())
    }

    /// 单次事务尝试：边界内任何失败都先回滚再离开
    async fn attempt(
        &self,
        mutation: Mutation,
        entity: &dyn Entity,
        entry: &EventLogEntry,
    ) -> OutboxResult<()> {
        self.unit_of_work.begin_transaction().await?;

        let written = async {
            match mutation {
                Mutation::Insert => self.entity_store.insert(entity).await?,
                Mutation::Update => self.entity_store.update(entity).await?,
                Mutation::Remove => self.entity_store.remove(entity).await?,
            }
            self.event_log.save_event(entry).await
        }
        .await;

        match written {
            Ok(()) => {
                if let Err(err) = self.unit_of_work.commit_transaction().await {
                    let _ = self.unit_of_work.rollback_transaction().await;
                    return Err(err);
                }
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.unit_of_work.rollback_transaction().await {
                    warn!(error = %rollback_err, "rollback after failed mutation also failed");
                }
                Err(err)
            }
        }
    }

    /// 装配待发布批次：逐条经注册表重建事件，解析失败按条目记录
    pub async fn get_pending_events(
        &self,
        batch_size: usize,
    ) -> OutboxResult<Vec<OutboundEvent>> {
        let entries = self
            .event_log
            .retrieve_pending_event_logs(batch_size)
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let resolution = self
                    .registry
                    .deserialize(entry.event_type_name(), entry.content());
                if let Err(err) = &resolution {
                    warn!(
                        event_id = %entry.event_id(),
                        event_type = %entry.event_type_name(),
                        error = %err,
                        "pending event could not be resolved"
                    );
                }

                OutboundEvent {
                    origin: DispatchOrigin::Outbox {
                        event_id: entry.event_id(),
                    },
                    entity_id: entry.entity_id().to_string(),
                    event_type_short_name: entry.event_type_short_name().to_string(),
                    body: entry.content().clone(),
                    resolution,
                }
            })
            .collect())
    }

    /// 装配失败链重发批次：链内旧者优先，链间顺序不作保证
    pub async fn retrieve_failed_events_to_republish(
        &self,
        chain_batch_size: usize,
    ) -> OutboxResult<Vec<OutboundEvent>> {
        let chains = self.event_log.republishable_chains(chain_batch_size).await?;

        let mut events = Vec::new();
        for chain in chains {
            for message in chain.failed_messages() {
                let resolution = self
                    .registry
                    .deserialize_short(message.event_type_short_name(), message.body());
                if let Err(err) = &resolution {
                    warn!(
                        message_id = %message.id(),
                        event_type = %message.event_type_short_name(),
                        error = %err,
                        "failed message could not be resolved"
                    );
                }

                events.push(OutboundEvent {
                    origin: DispatchOrigin::FailedChain {
                        message_id: message.id(),
                        event_id: message.event_id(),
                    },
                    entity_id: chain.entity_id().to_string(),
                    event_type_short_name: message.event_type_short_name().to_string(),
                    body: message.body().clone(),
                    resolution,
                });
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl OutboundEventSource for EventService {
    async fn fetch_pending(&self, batch_size: usize) -> OutboxResult<Vec<OutboundEvent>> {
        self.get_pending_events(batch_size).await
    }

    async fn fetch_republishable(
        &self,
        chain_batch_size: usize,
    ) -> OutboxResult<Vec<OutboundEvent>> {
        self.retrieve_failed_events_to_republish(chain_batch_size)
            .await
    }
}
