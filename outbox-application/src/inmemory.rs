//! 内存版应用基础设施
//!
//! - `InMemoryEntityStore`：带事务暂存与故障注入的实体存储；
//! - `InMemoryUnitOfWork`：把事务边界扇出到内存存储的暂存钩子。
//!
//! 典型用途：测试环境、示例与本地开发；事务语义为测试级实现，
//! 不追求生产级的隔离性。
//!
use crate::entity_store::EntityStore;
use async_trait::async_trait;
use outbox_domain::entity::Entity;
use outbox_domain::error::{OutboxError, OutboxResult};
use outbox_domain::event_log::InMemoryEventLogStore;
use outbox_domain::unit_of_work::UnitOfWork;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

enum StagedOp {
    Upsert(String),
    Remove(String),
}

#[derive(Default)]
struct EntityState {
    committed: HashSet<String>,
    staged: Vec<StagedOp>,
    txn_active: bool,
    fail_on: HashSet<String>,
}

impl EntityState {
    /// 已提交与暂存叠加后的可见性
    fn visible(&self, entity_id: &str) -> bool {
        let mut present = self.committed.contains(entity_id);
        for op in &self.staged {
            match op {
                StagedOp::Upsert(id) if id == entity_id => present = true,
                StagedOp::Remove(id) if id == entity_id => present = false,
                _ => {}
            }
        }
        present
    }
}

/// 简单的内存实体存储实现
#[derive(Default)]
pub struct InMemoryEntityStore {
    inner: Mutex<EntityState>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, EntityState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 故障注入：对指定实体的后续写入一律失败
    pub fn fail_on(&self, entity_id: &str) {
        self.locked().fail_on.insert(entity_id.to_string());
    }

    /// 实体（已提交）是否存在
    pub fn exists(&self, entity_id: &str) -> bool {
        self.locked().committed.contains(entity_id)
    }

    pub fn begin(&self) -> OutboxResult<()> {
        let mut state = self.locked();
        if state.txn_active {
            return Err(OutboxError::Transaction {
                reason: "transaction already active".to_string(),
            });
        }
        state.txn_active = true;
        Ok(())
    }

    pub fn commit(&self) -> OutboxResult<()> {
        let mut state = self.locked();
        if !state.txn_active {
            return Err(OutboxError::Transaction {
                reason: "no active transaction".to_string(),
            });
        }
        let staged = std::mem::take(&mut state.staged);
        for op in staged {
            match op {
                StagedOp::Upsert(id) => {
                    state.committed.insert(id);
                }
                StagedOp::Remove(id) => {
                    state.committed.remove(&id);
                }
            }
        }
        state.txn_active = false;
        Ok(())
    }

    pub fn rollback(&self) -> OutboxResult<()> {
        let mut state = self.locked();
        if !state.txn_active {
            return Err(OutboxError::Transaction {
                reason: "no active transaction".to_string(),
            });
        }
        state.staged.clear();
        state.txn_active = false;
        Ok(())
    }

    fn write(&self, entity_id: String, op: StagedOp) -> OutboxResult<()> {
        let mut state = self.locked();
        if state.fail_on.contains(&entity_id) {
            return Err(OutboxError::Database {
                reason: format!("write rejected for entity {entity_id}"),
            });
        }
        if state.txn_active {
            state.staged.push(op);
        } else {
            match op {
                StagedOp::Upsert(id) => {
                    state.committed.insert(id);
                }
                StagedOp::Remove(id) => {
                    state.committed.remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert(&self, entity: &dyn Entity) -> OutboxResult<()> {
        let id = entity.entity_id();
        if self.locked().visible(&id) {
            return Err(OutboxError::InvalidState {
                reason: format!("entity already exists: {id}"),
            });
        }
        self.write(id.clone(), StagedOp::Upsert(id))
    }

    async fn update(&self, entity: &dyn Entity) -> OutboxResult<()> {
        let id = entity.entity_id();
        if !self.locked().visible(&id) {
            return Err(OutboxError::NotFound {
                reason: format!("entity not found: {id}"),
            });
        }
        self.write(id.clone(), StagedOp::Upsert(id))
    }

    async fn remove(&self, entity: &dyn Entity) -> OutboxResult<()> {
        let id = entity.entity_id();
        if !self.locked().visible(&id) {
            return Err(OutboxError::NotFound {
                reason: format!("entity not found: {id}"),
            });
        }
        self.write(id.clone(), StagedOp::Remove(id))
    }
}

/// 内存版工作单元：把事务边界扇出到两个内存存储
pub struct InMemoryUnitOfWork {
    event_log: Arc<InMemoryEventLogStore>,
    entities: Arc<InMemoryEntityStore>,
}

impl InMemoryUnitOfWork {
    pub fn new(event_log: Arc<InMemoryEventLogStore>, entities: Arc<InMemoryEntityStore>) -> Self {
        Self {
            event_log,
            entities,
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn begin_transaction(&self) -> OutboxResult<()> {
        self.entities.begin()?;
        if let Err(err) = self.event_log.begin() {
            let _ = self.entities.rollback();
            return Err(err);
        }
        Ok(())
    }

    async fn commit_transaction(&self) -> OutboxResult<()> {
        self.entities.commit()?;
        self.event_log.commit()
    }

    async fn rollback_transaction(&self) -> OutboxResult<()> {
        let entities = self.entities.rollback();
        let event_log = self.event_log.rollback();
        entities.and(event_log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

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

    #[test]
    fn entities_downcast_through_as_any() {
        let order = Order { id: "o-1".into() };
        let entity: &dyn Entity = &order;
        let concrete = entity.as_any().downcast_ref::<Order>().unwrap();
        assert_eq!(concrete.id, "o-1");
    }

    #[tokio::test]
    async fn autocommit_without_transaction() {
        let store = InMemoryEntityStore::new();
        let order = Order { id: "o-1".into() };

        store.insert(&order).await.unwrap();
        assert!(store.exists("o-1"));

        store.remove(&order).await.unwrap();
        assert!(!store.exists("o-1"));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryEntityStore::new();
        let order = Order { id: "o-1".into() };
        store.insert(&order).await.unwrap();

        let err = store.insert(&order).await.unwrap_err();
        assert!(matches!(err, OutboxError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn update_of_missing_entity_is_rejected() {
        let store = InMemoryEntityStore::new();
        let order = Order { id: "o-1".into() };
        let err = store.update(&order).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotFound { .. }));
    }

    #[tokio::test]
    async fn staged_writes_apply_on_commit_only() {
        let store = InMemoryEntityStore::new();
        let order = Order { id: "o-1".into() };

        store.begin().unwrap();
        store.insert(&order).await.unwrap();
        assert!(!store.exists("o-1"));
        store.commit().unwrap();
        assert!(store.exists("o-1"));

        store.begin().unwrap();
        store.remove(&order).await.unwrap();
        store.rollback().unwrap();
        assert!(store.exists("o-1"));
    }

    #[tokio::test]
    async fn unit_of_work_fans_out_to_both_stores() {
        let event_log = Arc::new(InMemoryEventLogStore::new());
        let entities = Arc::new(InMemoryEntityStore::new());
        let uow = InMemoryUnitOfWork::new(event_log.clone(), entities.clone());

        uow.begin_transaction().await.unwrap();
        // 双方都进入事务态：再次 begin 均报错
        assert!(entities.begin().is_err());
        assert!(event_log.begin().is_err());
        uow.rollback_transaction().await.unwrap();

        assert!(entities.begin().is_ok());
        entities.rollback().unwrap();
    }
}
