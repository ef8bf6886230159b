//! 实体存储（EntityStore）协议
//!
//! 领域实体的外部存储协作方。实现方（通常是应用的持久层）负责把
//! `&dyn Entity` 向下转型到具体实体类型并落库；三个操作都必须在
//! 工作单元的进行中事务内执行，才能与事件日志写入保持原子。
//!
use async_trait::async_trait;
use outbox_domain::entity::Entity;
use outbox_domain::error::OutboxResult;

/// 领域实体的事务性 CRUD
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn insert(&self, entity: &dyn Entity) -> OutboxResult<()>;

    async fn update(&self, entity: &dyn Entity) -> OutboxResult<()>;

    async fn remove(&self, entity: &dyn Entity) -> OutboxResult<()>;
}
