//! 内存版事件日志存储（InMemoryEventLogStore）
//!
//! 满足 `EventLogStore` 协议的轻量实现，带最小的事务暂存语义：
//! - `begin/commit/rollback` 由内存版工作单元驱动，`save_event` 在事务
//!   开启期间写入暂存区，提交时一并落账，回滚时整体丢弃；
//! - 状态转移直接复用条目上的“比较并转移”，单把锁保证抢占互斥；
//! - 典型用途：测试环境、示例与本地开发。
//!
use crate::error::{OutboxError, OutboxResult};
use crate::event_log::{
    EventLogEntry, EventLogStore, EventState, FailedMessage, FailedMessageChain,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    /// 已提交条目，插入顺序即时间顺序
    entries: Vec<EventLogEntry>,
    /// 当前事务的暂存写入
    staged: Vec<EventLogEntry>,
    txn_active: bool,
    chains: HashMap<String, FailedMessageChain>,
}

/// 简单的内存事件日志存储实现
#[derive(Default)]
pub struct InMemoryEventLogStore {
    inner: Mutex<State>,
}

impl InMemoryEventLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 开启事务暂存（由内存版工作单元调用）
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

    /// 提交：暂存写入落账
    pub fn commit(&self) -> OutboxResult<()> {
        let mut state = self.locked();
        if !state.txn_active {
            return Err(OutboxError::Transaction {
                reason: "no active transaction".to_string(),
            });
        }
        let staged = std::mem::take(&mut state.staged);
        state.entries.extend(staged);
        state.txn_active = false;
        Ok(())
    }

    /// 回滚：丢弃全部暂存写入
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

    /// 按标识查找已提交条目（测试与示例观察用）
    pub fn find_event(&self, event_id: Uuid) -> Option<EventLogEntry> {
        self.locked()
            .entries
            .iter()
            .find(|e| e.event_id() == event_id)
            .cloned()
    }

    /// 按实体查找失败链（测试与示例观察用）
    pub fn chain(&self, entity_id: &str) -> Option<FailedMessageChain> {
        self.locked().chains.get(entity_id).cloned()
    }

    fn transition(&self, event_id: Uuid, to: EventState) -> OutboxResult<()> {
        let mut state = self.locked();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.event_id() == event_id)
            .ok_or(OutboxError::EventNotFound { event_id })?;
        entry.transition_to(to)
    }

    fn with_message<F>(&self, message_id: Uuid, f: F) -> OutboxResult<()>
    where
        F: FnOnce(&mut FailedMessage),
    {
        let mut state = self.locked();
        for chain in state.chains.values_mut() {
            if let Some(message) = chain
                .failed_messages_mut()
                .iter_mut()
                .find(|m| m.id() == message_id)
            {
                f(message);
                return Ok(());
            }
        }
        Err(OutboxError::NotFound {
            reason: format!("failed message not found: {message_id}"),
        })
    }
}

#[async_trait]
impl EventLogStore for InMemoryEventLogStore {
    async fn retrieve_pending_event_logs(
        &self,
        batch_size: usize,
    ) -> OutboxResult<Vec<EventLogEntry>> {
        let state = self.locked();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.state() == EventState::NotPublished)
            .take(batch_size)
            .cloned()
            .collect())
    }

    async fn save_event(&self, entry: &EventLogEntry) -> OutboxResult<()> {
        let mut state = self.locked();
        if state.txn_active {
            state.staged.push(entry.clone());
        } else {
            state.entries.push(entry.clone());
        }
        Ok(())
    }

    async fn mark_event_as_in_progress(&self, event_id: Uuid) -> OutboxResult<()> {
        self.transition(event_id, EventState::InProgress)
    }

    async fn mark_event_as_published(&self, event_id: Uuid) -> OutboxResult<()> {
        self.transition(event_id, EventState::Published)
    }

    async fn mark_event_as_failed(&self, event_id: Uuid) -> OutboxResult<()> {
        self.transition(event_id, EventState::PublishedFailed)
    }

    async fn failed_message_chain_exists(&self, entity_id: &str) -> OutboxResult<bool> {
        Ok(self.locked().chains.contains_key(entity_id))
    }

    async fn add_in_failed_message_chain(
        &self,
        entity_id: &str,
        event_type_short_name: &str,
        body: &Value,
        event_id: Option<Uuid>,
        error: &OutboxError,
    ) -> OutboxResult<Uuid> {
        let mut state = self.locked();
        let now = Utc::now();
        let chain = state
            .chains
            .entry(entity_id.to_string())
            .or_insert_with(|| {
                FailedMessageChain::builder()
                    .id(Uuid::new_v4())
                    .creation_time(now)
                    .entity_id(entity_id.to_string())
                    .build()
            });

        let message = FailedMessage::builder()
            .id(Uuid::new_v4())
            .creation_time(now)
            .body(body.clone())
            .message(error.to_string())
            .stack_trace(format!("{error:?}"))
            .event_type_short_name(event_type_short_name.to_string())
            .maybe_event_id(event_id)
            .build();
        let message_id = message.id();
        chain.push(message);
        Ok(message_id)
    }

    async fn republishable_chains(
        &self,
        chain_batch_size: usize,
    ) -> OutboxResult<Vec<FailedMessageChain>> {
        let state = self.locked();
        let mut chains: Vec<&FailedMessageChain> = state
            .chains
            .values()
            .filter(|c| c.should_republish() && c.retryable_messages().next().is_some())
            .collect();
        // 链间顺序不作保证，这里按创建时间排序以便观察
        chains.sort_by_key(|c| c.creation_time());

        Ok(chains
            .into_iter()
            .take(chain_batch_size)
            .map(|c| {
                let mut chain = c.clone();
                chain.retain_retryable();
                chain
            })
            .collect())
    }

    async fn mark_failed_message_republished(&self, message_id: Uuid) -> OutboxResult<()> {
        self.with_message(message_id, |m| m.mark_republished(Utc::now()))
    }

    async fn skip_failed_message(&self, message_id: Uuid) -> OutboxResult<()> {
        self.with_message(message_id, |m| m.set_should_skip(true))
    }

    async fn set_chain_republish(
        &self,
        entity_id: &str,
        should_republish: bool,
    ) -> OutboxResult<()> {
        let mut state = self.locked();
        let chain = state
            .chains
            .get_mut(entity_id)
            .ok_or_else(|| OutboxError::NotFound {
                reason: format!("failed message chain not found: {entity_id}"),
            })?;
        chain.set_should_republish(should_republish);
        Ok(())
    }
}
